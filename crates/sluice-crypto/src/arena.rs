//! Fixed-capacity marshalling arena.
//!
//! Every buffer handed to a [`CryptoCapability`](crate::capability::CryptoCapability)
//! call is carved out of one linear region by bump allocation. The arena never
//! frees individual buffers: a [`reset`](Arena::reset) (or
//! [`reset_to`](Arena::reset_to) a previously taken [`ArenaMark`]) zeroes
//! everything above the mark and rewinds the cursor.
//!
//! # Layout
//!
//! ```text
//! 0                      mark                     cursor           capacity
//! |  long-lived buffers   |  per-operation buffers  |   free space    |
//! ```
//!
//! Handles carry the id of the arena that issued them and the serial number
//! of the reservation that produced them. A handle retained across a reset
//! that released its bytes, or presented to a different arena, is rejected
//! with [`ArenaError::StaleHandle`] instead of silently aliasing whatever
//! was reserved there.
//!
//! # Thread Safety
//!
//! An arena has exactly one owner; it is `Send` but all access goes
//! through `&mut self`. There is no internal locking.

use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{trace, warn};
use zeroize::Zeroize;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Arena errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("arena capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("stale buffer handle at offset {offset} (len {len})")]
    StaleHandle { offset: usize, len: usize },

    #[error("buffer length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("sub-range {start}..{end} outside buffer of {len} bytes")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

/// View into an [`Arena`] region: `[offset, offset + len)`.
///
/// Handles are plain values; the arena validates them on every access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    offset: usize,
    len: usize,
    arena: u64,
    serial: u64,
}

impl BufferHandle {
    /// Start of the buffer within the arena region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// A handle covering `start..start + len` of this buffer.
    ///
    /// The sub-handle stays valid exactly as long as its parent.
    pub fn sub(&self, start: usize, len: usize) -> Result<BufferHandle, ArenaError> {
        let end = start.checked_add(len).filter(|&end| end <= self.len).ok_or(
            ArenaError::OutOfBounds {
                start,
                end: start.saturating_add(len),
                len: self.len,
            },
        )?;

        Ok(BufferHandle {
            offset: self.offset + start,
            len: end - start,
            arena: self.arena,
            serial: self.serial,
        })
    }
}

/// Saved cursor position; see [`Arena::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaMark {
    arena: u64,
    cursor: usize,
    live: usize,
    last_serial: Option<u64>,
}

impl ArenaMark {
    /// The empty arena.
    pub const ZERO: ArenaMark = ArenaMark {
        arena: 0,
        cursor: 0,
        live: 0,
        last_serial: None,
    };

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Fixed-capacity bump allocator for crypto call buffers.
pub struct Arena {
    id: u64,
    region: Box<[u8]>,
    cursor: usize,
    /// Live reservations, ordered by both offset and serial.
    live: Vec<BufferHandle>,
    next_serial: u64,
}

impl Arena {
    /// Default capacity: one 64 KiB page, the size of a single sandbox memory page.
    pub const DEFAULT_CAPACITY: usize = 64 * 1024;

    /// Create an arena with a zeroed region of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            region: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
            live: Vec::new(),
            next_serial: 0,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes reserved so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.region.len() - self.cursor
    }

    /// Reserve `len` contiguous bytes at the cursor.
    ///
    /// Fails without moving the cursor if the region cannot hold them.
    pub fn reserve(&mut self, len: usize) -> Result<BufferHandle, ArenaError> {
        let available = self.remaining();
        if len > available {
            return Err(ArenaError::CapacityExceeded {
                requested: len,
                available,
            });
        }

        let handle = BufferHandle {
            offset: self.cursor,
            len,
            arena: self.id,
            serial: self.next_serial,
        };
        self.next_serial += 1;
        self.cursor += len;
        self.live.push(handle);

        trace!(offset = handle.offset, len, "arena reserve");
        Ok(handle)
    }

    /// Reserve a buffer and copy `bytes` into it.
    pub fn stage(&mut self, bytes: &[u8]) -> Result<BufferHandle, ArenaError> {
        let handle = self.reserve(bytes.len())?;
        self.region[handle.range()].copy_from_slice(bytes);
        Ok(handle)
    }

    /// Read access to a live buffer.
    pub fn bytes(&self, handle: BufferHandle) -> Result<&[u8], ArenaError> {
        let range = self.check(handle)?;
        Ok(&self.region[range])
    }

    /// Write access to a live buffer.
    pub fn bytes_mut(&mut self, handle: BufferHandle) -> Result<&mut [u8], ArenaError> {
        let range = self.check(handle)?;
        Ok(&mut self.region[range])
    }

    /// Read a live buffer as a fixed-size array.
    pub fn array<const N: usize>(&self, handle: BufferHandle) -> Result<&[u8; N], ArenaError> {
        self.bytes(handle)?
            .try_into()
            .map_err(|_| ArenaError::LengthMismatch {
                expected: N,
                actual: handle.len,
            })
    }

    /// Overwrite a live buffer; `bytes` must match its length exactly.
    pub fn write(&mut self, handle: BufferHandle, bytes: &[u8]) -> Result<(), ArenaError> {
        let dst = self.bytes_mut(handle)?;
        if dst.len() != bytes.len() {
            return Err(ArenaError::LengthMismatch {
                expected: dst.len(),
                actual: bytes.len(),
            });
        }
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Copy one live buffer onto another of the same length.
    pub fn copy_within(&mut self, src: BufferHandle, dst: BufferHandle) -> Result<(), ArenaError> {
        let src_range = self.check(src)?;
        let dst_range = self.check(dst)?;
        if src_range.len() != dst_range.len() {
            return Err(ArenaError::LengthMismatch {
                expected: dst_range.len(),
                actual: src_range.len(),
            });
        }
        self.region.copy_within(src_range, dst_range.start);
        Ok(())
    }

    /// Current position, for a later [`reset_to`](Self::reset_to).
    pub fn mark(&self) -> ArenaMark {
        ArenaMark {
            arena: self.id,
            cursor: self.cursor,
            live: self.live.len(),
            last_serial: self.live.last().map(|h| h.serial),
        }
    }

    /// Zero every reserved byte and rewind the cursor to zero.
    pub fn reset(&mut self) {
        self.reset_to(ArenaMark::ZERO);
    }

    /// Zero `[mark, cursor)` and rewind the cursor to `mark`.
    ///
    /// Handles reserved after the mark become stale. A mark that no longer
    /// describes a live prefix of this arena falls back to a full reset.
    pub fn reset_to(&mut self, mark: ArenaMark) {
        let mark = if self.is_live_prefix(&mark) {
            mark
        } else {
            warn!(
                mark = mark.cursor,
                cursor = self.cursor,
                "arena mark is not a live prefix, zeroing whole arena"
            );
            ArenaMark::ZERO
        };

        self.region[mark.cursor..self.cursor].zeroize();
        trace!(from = self.cursor, to = mark.cursor, "arena reset");

        self.cursor = mark.cursor;
        self.live.truncate(mark.live);
    }

    /// Open a scope whose reservations are zeroed and released when it drops.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        let mark = self.mark();
        ArenaScope { arena: self, mark }
    }

    fn is_live_prefix(&self, mark: &ArenaMark) -> bool {
        if mark.cursor > self.cursor || mark.live > self.live.len() {
            return false;
        }
        match mark.last_serial {
            None => mark.live == 0 && mark.cursor == 0,
            Some(_) if mark.arena != self.id => false,
            Some(serial) => {
                let last = self.live[mark.live - 1];
                last.serial == serial && last.end() == mark.cursor
            }
        }
    }

    fn check(&self, handle: BufferHandle) -> Result<Range<usize>, ArenaError> {
        let stale = ArenaError::StaleHandle {
            offset: handle.offset,
            len: handle.len,
        };
        if handle.arena != self.id {
            return Err(stale);
        }

        let idx = self
            .live
            .binary_search_by_key(&handle.serial, |h| h.serial)
            .map_err(|_| stale.clone())?;
        let parent = self.live[idx];

        if handle.offset < parent.offset || handle.end() > parent.end() {
            return Err(stale);
        }
        Ok(handle.range())
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.region.zeroize();
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.region.len())
            .field("cursor", &self.cursor)
            .field("live", &self.live.len())
            .finish()
    }
}

/// Guard returned by [`Arena::scope`].
///
/// Dereferences to the arena. On drop, everything reserved through the
/// guard is zeroed and released, whichever way the scope is left.
pub struct ArenaScope<'a> {
    arena: &'a mut Arena,
    mark: ArenaMark,
}

impl ArenaScope<'_> {
    /// Position the scope rewinds to.
    pub fn base(&self) -> ArenaMark {
        self.mark
    }
}

impl Deref for ArenaScope<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

impl DerefMut for ArenaScope<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        self.arena
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        self.arena.reset_to(self.mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservations_tile_region() {
        let mut arena = Arena::new(200);

        let ctx = arena.reserve(8).unwrap();
        let msg = arena.reserve(22).unwrap();
        let digest = arena.reserve(32).unwrap();

        assert_eq!(ctx.offset(), 0);
        assert_eq!(msg.offset(), 8);
        assert_eq!(digest.offset(), 8 + 22);
        assert_eq!(arena.cursor(), 8 + 22 + 32);

        arena.reset();

        let ctx = arena.reserve(8).unwrap();
        let msg = arena.reserve(22).unwrap();
        let digest = arena.reserve(32).unwrap();
        assert_eq!(ctx.offset(), 0);
        assert_eq!(msg.offset(), 8);
        assert_eq!(digest.offset(), 30);
    }

    #[test]
    fn test_capacity_exceeded_keeps_cursor() {
        let mut arena = Arena::new(16);
        arena.reserve(10).unwrap();

        let err = arena.reserve(7).unwrap_err();
        assert_eq!(
            err,
            ArenaError::CapacityExceeded {
                requested: 7,
                available: 6
            }
        );
        assert_eq!(arena.cursor(), 10);

        // Exactly filling the region is fine
        arena.reserve(6).unwrap();
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn test_reset_zeroes_used_prefix() {
        let mut arena = Arena::new(64);
        arena.stage(&[0xAA; 40]).unwrap();

        arena.reset();

        assert_eq!(arena.cursor(), 0);
        assert!(arena.region.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reset_to_mark_keeps_prefix() {
        let mut arena = Arena::new(64);
        let keep = arena.stage(&[0x11; 16]).unwrap();
        let mark = arena.mark();
        let scratch = arena.stage(&[0x22; 16]).unwrap();

        arena.reset_to(mark);

        assert_eq!(arena.cursor(), 16);
        assert_eq!(arena.bytes(keep).unwrap(), &[0x11; 16]);
        assert!(arena.region[16..32].iter().all(|&b| b == 0));
        assert!(matches!(
            arena.bytes(scratch),
            Err(ArenaError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_stale_handle_not_aliased_after_reuse() {
        let mut arena = Arena::new(64);
        let old = arena.stage(b"secret").unwrap();
        arena.reset();

        // Same offset and length, new reservation
        let new = arena.stage(b"public").unwrap();
        assert_eq!(old.offset(), new.offset());
        assert!(arena.bytes(old).is_err());
        assert_eq!(arena.bytes(new).unwrap(), b"public");
    }

    #[test]
    fn test_handle_from_other_arena_rejected() {
        let mut alice = Arena::new(64);
        let mut bob = Arena::new(64);
        let theirs = alice.stage(b"alice").unwrap();
        let ours = bob.stage(b"bobby").unwrap();
        assert_eq!(theirs.offset(), ours.offset());

        assert!(matches!(
            bob.bytes(theirs),
            Err(ArenaError::StaleHandle { .. })
        ));
        assert!(bob.bytes_mut(theirs).is_err());
        assert!(bob.copy_within(theirs, ours).is_err());
        assert_eq!(bob.bytes(ours).unwrap(), b"bobby");
    }

    #[test]
    fn test_mark_from_other_arena_resets_fully() {
        let mut alice = Arena::new(64);
        let mut bob = Arena::new(64);
        alice.stage(&[1; 8]).unwrap();
        let mark = alice.mark();
        bob.stage(&[2; 16]).unwrap();

        bob.reset_to(mark);
        assert_eq!(bob.cursor(), 0);
        assert!(bob.region.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_mark_falls_back_to_full_reset() {
        let mut arena = Arena::new(64);
        arena.stage(&[1; 8]).unwrap();
        let mark = arena.mark();
        arena.reset();
        arena.stage(&[2; 4]).unwrap();

        // `mark` now points past the cursor
        arena.reset_to(mark);
        assert_eq!(arena.cursor(), 0);
        assert!(arena.region.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scope_releases_on_drop() {
        let mut arena = Arena::new(64);
        let key = arena.stage(&[7; 8]).unwrap();

        {
            let mut scope = arena.scope();
            scope.stage(&[9; 32]).unwrap();
            assert_eq!(scope.cursor(), 40);
        }

        assert_eq!(arena.cursor(), 8);
        assert_eq!(arena.bytes(key).unwrap(), &[7; 8]);
        assert!(arena.region[8..40].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scope_releases_on_error_path() {
        fn fails(arena: &mut Arena) -> Result<(), ArenaError> {
            let mut scope = arena.scope();
            scope.stage(&[0xFF; 20])?;
            scope.reserve(1000)?;
            Ok(())
        }

        let mut arena = Arena::new(64);
        let err = fails(&mut arena).unwrap_err();
        assert!(matches!(err, ArenaError::CapacityExceeded { .. }));
        assert_eq!(arena.cursor(), 0);
        assert!(arena.region.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_nested_scopes() {
        let mut arena = Arena::new(64);
        let mut outer = arena.scope();
        let a = outer.stage(&[1; 4]).unwrap();
        {
            let mut inner = outer.scope();
            inner.stage(&[2; 4]).unwrap();
            assert_eq!(inner.cursor(), 8);
        }
        assert_eq!(outer.cursor(), 4);
        assert_eq!(outer.bytes(a).unwrap(), &[1; 4]);
    }

    #[test]
    fn test_sub_handles() {
        let mut arena = Arena::new(64);
        let buf = arena.stage(b"0123456789").unwrap();

        let tail = buf.sub(4, 6).unwrap();
        assert_eq!(arena.bytes(tail).unwrap(), b"456789");
        assert!(buf.sub(4, 7).is_err());

        arena.reset();
        assert!(arena.bytes(tail).is_err());
    }

    #[test]
    fn test_copy_within_and_array() {
        let mut arena = Arena::new(64);
        let src = arena.stage(&[5; 4]).unwrap();
        let dst = arena.reserve(4).unwrap();
        let short = arena.reserve(3).unwrap();

        arena.copy_within(src, dst).unwrap();
        assert_eq!(arena.array::<4>(dst).unwrap(), &[5; 4]);
        assert!(arena.copy_within(src, short).is_err());
        assert!(arena.array::<8>(dst).is_err());
    }

    #[test]
    fn test_zero_length_reservations() {
        let mut arena = Arena::new(8);
        let empty = arena.reserve(0).unwrap();
        let next = arena.reserve(8).unwrap();

        assert!(empty.is_empty());
        assert_eq!(next.offset(), 0);
        assert_eq!(arena.bytes(empty).unwrap(), b"");
        assert!(arena.reserve(0).is_ok());
    }
}
