//! Sliding replay window over message ids.
//!
//! Tracks the highest accepted id and a bitmap of the ids just below it.
//! Ids older than `highest - window_size` are rejected outright.
//!
//! Not thread-safe; a window belongs to one receiving direction.

/// Replay window for inbound message ids.
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    /// Highest id accepted so far, `None` before the first one
    highest: Option<u64>,
    /// Bit 0 = highest, bit 1 = highest - 1, ...
    bitmap: u128,
    window_size: u64,
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceWindow {
    pub const DEFAULT_WINDOW_SIZE: u64 = 128;

    pub fn new() -> Self {
        Self::with_size(Self::DEFAULT_WINDOW_SIZE)
    }

    /// Window tracking `size` ids, clamped to `1..=128`.
    pub fn with_size(size: u64) -> Self {
        Self {
            highest: None,
            bitmap: 0,
            window_size: size.clamp(1, 128),
        }
    }

    /// Whether `id` would be accepted. Does not record it.
    pub fn check(&self, id: u64) -> bool {
        let Some(highest) = self.highest else {
            return true;
        };

        if id > highest {
            return true;
        }

        let offset = highest - id;
        if offset >= self.window_size {
            return false;
        }
        self.bitmap & (1u128 << offset) == 0
    }

    /// Record `id` as seen. Call only after [`check`](Self::check) passed
    /// and the message authenticated.
    pub fn update(&mut self, id: u64) {
        let Some(highest) = self.highest else {
            self.highest = Some(id);
            self.bitmap = 1;
            return;
        };

        if id > highest {
            let shift = id - highest;
            self.bitmap = if shift >= 128 {
                1
            } else {
                (self.bitmap << shift) | 1
            };
            self.highest = Some(id);
            return;
        }

        let offset = highest - id;
        if offset < self.window_size {
            self.bitmap |= 1u128 << offset;
        }
    }

    /// Check and record in one step; `false` for a replay.
    pub fn check_and_update(&mut self, id: u64) -> bool {
        if !self.check(id) {
            return false;
        }
        self.update(id);
        true
    }

    pub fn highest(&self) -> Option<u64> {
        self.highest
    }

    pub fn reset(&mut self) {
        self.highest = None;
        self.bitmap = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let mut window = SequenceWindow::new();
        for i in 0..300 {
            assert!(window.check_and_update(i), "id {i} should be accepted");
        }
        assert_eq!(window.highest(), Some(299));
    }

    #[test]
    fn test_id_zero_is_tracked() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_update(0));
        assert!(!window.check_and_update(0));
        assert!(window.check_and_update(1));
        assert!(!window.check_and_update(0));
    }

    #[test]
    fn test_replay_detection() {
        let mut window = SequenceWindow::new();
        for i in 1..=3 {
            assert!(window.check_and_update(i));
        }
        for i in 1..=3 {
            assert!(!window.check_and_update(i));
        }
    }

    #[test]
    fn test_out_of_order() {
        let mut window = SequenceWindow::new();
        for id in [5, 3, 4, 1, 2] {
            assert!(window.check_and_update(id));
        }
        for id in 1..=5 {
            assert!(!window.check_and_update(id));
        }
    }

    #[test]
    fn test_window_slides() {
        let mut window = SequenceWindow::with_size(10);
        for i in 1..=10 {
            assert!(window.check_and_update(i));
        }

        assert!(window.check_and_update(20));
        // 10 is exactly window_size behind 20
        assert!(!window.check(10));
        assert!(window.check(11));
    }

    #[test]
    fn test_large_jump() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_update(1));
        assert!(window.check_and_update(1000));
        assert!(!window.check_and_update(1));
        assert!(window.check_and_update(999));
    }

    #[test]
    fn test_near_u64_max() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_update(u64::MAX - 1));
        assert!(window.check_and_update(u64::MAX));
        assert!(!window.check_and_update(u64::MAX));
        assert!(!window.check(0));
    }

    #[test]
    fn test_check_without_update() {
        let mut window = SequenceWindow::new();
        window.update(1);

        assert!(window.check(2));
        assert!(window.check(2));

        window.update(2);
        assert!(!window.check(2));

        window.reset();
        assert!(window.check(2));
    }
}
