//! Post-handshake message exchange.
//!
//! A [`SecureChannel`] pairs the session keys from a completed handshake
//! with a strictly increasing outbound message id and a replay window for
//! inbound ids.

use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::arena::Arena;
use crate::capability::CryptoCapability;
use crate::error::CryptoError;
use crate::keys::{Context, SessionKeyPair};
use crate::ops;
use crate::seq_window::SequenceWindow;

/// A sealed outbound message. The id travels alongside the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub msg_id: u64,
    pub ciphertext: Vec<u8>,
}

/// Encrypted channel to one peer.
pub struct SecureChannel {
    keys: SessionKeyPair,
    ctx: Context,
    /// Last id used with the tx key
    last_tx: Option<u64>,
    rx_window: SequenceWindow,
}

impl SecureChannel {
    pub fn new(keys: SessionKeyPair, ctx: Context) -> Self {
        Self {
            keys,
            ctx,
            last_tx: None,
            rx_window: SequenceWindow::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Next id [`encrypt`](Self::encrypt) will use.
    pub fn next_tx_id(&self) -> Result<u64, CryptoError> {
        match self.last_tx {
            None => Ok(0),
            Some(last) => last.checked_add(1).ok_or(CryptoError::MsgIdExhausted),
        }
    }

    /// Highest inbound id accepted so far.
    pub fn highest_rx_id(&self) -> Option<u64> {
        self.rx_window.highest()
    }

    /// Encrypt under the next message id.
    pub fn encrypt<C: CryptoCapability>(
        &mut self,
        cap: &C,
        arena: &mut Arena,
        msg: &[u8],
    ) -> Result<Sealed, CryptoError> {
        let msg_id = self.next_tx_id()?;
        self.encrypt_with_id(cap, arena, msg_id, msg)
    }

    /// Encrypt under a caller-chosen id, which must exceed every id used so far.
    pub fn encrypt_with_id<C: CryptoCapability>(
        &mut self,
        cap: &C,
        arena: &mut Arena,
        msg_id: u64,
        msg: &[u8],
    ) -> Result<Sealed, CryptoError> {
        if let Some(last) = self.last_tx {
            if msg_id <= last {
                return Err(CryptoError::MsgIdNotIncreasing {
                    attempted: msg_id,
                    last,
                });
            }
        }

        let ciphertext = ops::encrypt(cap, arena, &self.ctx, self.keys.tx(), msg_id, msg)?;
        self.last_tx = Some(msg_id);
        trace!(msg_id, len = msg.len(), "sealed message");

        Ok(Sealed { msg_id, ciphertext })
    }

    /// Decrypt an inbound message.
    ///
    /// The replay window is consulted first and only updated once the
    /// message authenticates, so forged ids cannot burn window slots.
    pub fn decrypt<C: CryptoCapability>(
        &mut self,
        cap: &C,
        arena: &mut Arena,
        msg_id: u64,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if !self.rx_window.check(msg_id) {
            debug!(msg_id, "replayed or stale message id");
            return Err(CryptoError::Replay(msg_id));
        }

        let plaintext = ops::decrypt(cap, arena, &self.ctx, self.keys.rx(), msg_id, ciphertext)?;
        self.rx_window.update(msg_id);
        Ok(plaintext)
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("ctx", &self.ctx)
            .field("last_tx", &self.last_tx)
            .field("highest_rx", &self.rx_window.highest())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SecretboxKey;
    use crate::native::NativeCapability;

    fn channel_pair() -> (SecureChannel, SecureChannel) {
        let a = SecretboxKey::from_bytes([1u8; 32]);
        let b = SecretboxKey::from_bytes([2u8; 32]);
        let ctx = Context::new("Examples").unwrap();

        (
            SecureChannel::new(SessionKeyPair::new(a.clone(), b.clone()), ctx),
            SecureChannel::new(SessionKeyPair::new(b, a), ctx),
        )
    }

    #[test]
    fn test_channel_round_trip() {
        let cap = NativeCapability::new();
        let mut arena = Arena::new(1024);
        let (mut alice, mut bob) = channel_pair();

        let sealed = alice.encrypt(&cap, &mut arena, b"hello from alice").unwrap();
        let opened = bob
            .decrypt(&cap, &mut arena, sealed.msg_id, &sealed.ciphertext)
            .unwrap();
        assert_eq!(&opened[..], b"hello from alice");

        let sealed = bob.encrypt(&cap, &mut arena, b"hello from bob").unwrap();
        let opened = alice
            .decrypt(&cap, &mut arena, sealed.msg_id, &sealed.ciphertext)
            .unwrap();
        assert_eq!(&opened[..], b"hello from bob");
    }

    #[test]
    fn test_msg_ids_increase() {
        let cap = NativeCapability::new();
        let mut arena = Arena::new(1024);
        let (mut alice, _) = channel_pair();

        let ids: Vec<u64> = (0..3)
            .map(|_| alice.encrypt(&cap, &mut arena, b"msg").unwrap().msg_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_rejects_non_increasing_id() {
        let cap = NativeCapability::new();
        let mut arena = Arena::new(1024);
        let (mut alice, _) = channel_pair();

        alice.encrypt_with_id(&cap, &mut arena, 10, b"a").unwrap();
        for id in [0, 9, 10] {
            let err = alice.encrypt_with_id(&cap, &mut arena, id, b"b").unwrap_err();
            assert!(matches!(
                err,
                CryptoError::MsgIdNotIncreasing {
                    attempted,
                    last: 10
                } if attempted == id
            ));
        }
        assert_eq!(alice.encrypt(&cap, &mut arena, b"c").unwrap().msg_id, 11);
    }

    #[test]
    fn test_msg_id_exhaustion() {
        let cap = NativeCapability::new();
        let mut arena = Arena::new(1024);
        let (mut alice, _) = channel_pair();

        alice.encrypt_with_id(&cap, &mut arena, u64::MAX, b"last").unwrap();
        assert!(matches!(
            alice.encrypt(&cap, &mut arena, b"more"),
            Err(CryptoError::MsgIdExhausted)
        ));
    }

    #[test]
    fn test_replay_rejected() {
        let cap = NativeCapability::new();
        let mut arena = Arena::new(1024);
        let (mut alice, mut bob) = channel_pair();

        let sealed = alice.encrypt(&cap, &mut arena, b"once").unwrap();
        bob.decrypt(&cap, &mut arena, sealed.msg_id, &sealed.ciphertext)
            .unwrap();
        assert!(matches!(
            bob.decrypt(&cap, &mut arena, sealed.msg_id, &sealed.ciphertext),
            Err(CryptoError::Replay(0))
        ));
    }

    #[test]
    fn test_forged_message_does_not_advance_window() {
        let cap = NativeCapability::new();
        let mut arena = Arena::new(1024);
        let (mut alice, mut bob) = channel_pair();

        let sealed = alice.encrypt(&cap, &mut arena, b"genuine").unwrap();
        let mut forged = sealed.ciphertext.clone();
        forged[0] ^= 0x80;

        let err = bob
            .decrypt(&cap, &mut arena, sealed.msg_id, &forged)
            .unwrap_err();
        assert!(err.is_authentication_failure());
        assert_eq!(bob.highest_rx_id(), None);

        bob.decrypt(&cap, &mut arena, sealed.msg_id, &sealed.ciphertext)
            .unwrap();
        assert_eq!(bob.highest_rx_id(), Some(0));
    }
}
