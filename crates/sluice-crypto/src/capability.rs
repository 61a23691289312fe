//! Contract of the sandboxed crypto module.
//!
//! The capability sees the [`Arena`] the way a sandboxed module sees its
//! linear memory: every input and output is a [`BufferHandle`] the caller
//! reserved beforehand. The capability validates the lengths it is given
//! and writes results in place.
//!
//! All operations are synchronous and never retain a handle past the call.

use crate::arena::{Arena, ArenaError, BufferHandle};
use crate::error::CryptoError;

/// Fixed parameter sizes, in bytes.
pub mod sizes {
    pub const CONTEXT: usize = 8;

    /// Kept for parity with libhydrogen's constant table; no operation here
    /// takes a seed.
    pub const RANDOM_SEED: usize = 32;

    pub const HASH: usize = 32;
    pub const HASH_MIN: usize = 16;
    pub const HASH_MAX: usize = 65535;
    pub const HASH_KEY: usize = 32;

    pub const KDF_KEY: usize = 32;
    pub const KDF_MIN: usize = 16;
    pub const KDF_MAX: usize = 65535;

    pub const SIGN: usize = 64;
    pub const SIGN_PUBLIC_KEY: usize = 32;
    pub const SIGN_SECRET_KEY: usize = 64;
    pub const SIGN_SEED: usize = 32;

    pub const SECRETBOX_KEY: usize = 32;
    /// 20-byte nonce followed by a 16-byte tag.
    pub const SECRETBOX_NONCE: usize = 20;
    pub const SECRETBOX_TAG: usize = 16;
    pub const SECRETBOX_HEADER: usize = SECRETBOX_NONCE + SECRETBOX_TAG;
    /// Kept for parity with libhydrogen's constant table; probes are not
    /// implemented.
    pub const SECRETBOX_PROBE: usize = 16;

    pub const KX_PUBLIC_KEY: usize = 32;
    pub const KX_SECRET_KEY: usize = 32;
    pub const KX_SESSION_KEY: usize = 32;
    pub const KX_KK_PACKET1: usize = 32 + 16;
    pub const KX_KK_PACKET2: usize = 32 + 16;
}

/// Public/secret halves of a key pair living in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPairHandle {
    pub public: BufferHandle,
    pub secret: BufferHandle,
}

impl KeyPairHandle {
    /// Reserve a contiguous `public || secret` pair.
    pub fn reserve(
        arena: &mut Arena,
        public_len: usize,
        secret_len: usize,
    ) -> Result<Self, ArenaError> {
        let public = arena.reserve(public_len)?;
        let secret = arena.reserve(secret_len)?;
        Ok(Self { public, secret })
    }

    /// Reserve and fill from existing key bytes.
    pub fn stage(arena: &mut Arena, public: &[u8], secret: &[u8]) -> Result<Self, ArenaError> {
        let public = arena.stage(public)?;
        let secret = arena.stage(secret)?;
        Ok(Self { public, secret })
    }
}

/// Directional session keys living in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeysHandle {
    pub rx: BufferHandle,
    pub tx: BufferHandle,
}

impl SessionKeysHandle {
    pub fn reserve(arena: &mut Arena) -> Result<Self, ArenaError> {
        let rx = arena.reserve(sizes::KX_SESSION_KEY)?;
        let tx = arena.reserve(sizes::KX_SESSION_KEY)?;
        Ok(Self { rx, tx })
    }
}

/// Operations exported by the crypto module.
///
/// Length violations are reported as [`CryptoError::Capability`] or
/// [`CryptoError::Arena`]; only genuine rejections of authenticated input
/// produce [`CryptoError::AuthenticationFailure`].
pub trait CryptoCapability {
    /// Opaque handshake state produced by [`kx_kk_step1`](Self::kx_kk_step1).
    ///
    /// Consumed by value in [`kx_kk_step3`](Self::kx_kk_step3), so a state
    /// can be used for at most one completion attempt.
    type KxState;

    /// Uniform integer in `[0, upper_bound)`; `0` when `upper_bound < 2`.
    fn random_uniform(&self, upper_bound: u32) -> u32;

    /// Fill `out` with random bytes.
    fn random_buf(&self, arena: &mut Arena, out: BufferHandle) -> Result<(), CryptoError>;

    /// Generic hash of `msg` under `ctx`, keyed when `key` is present.
    ///
    /// The digest length is `out.len()`, within `HASH_MIN..=HASH_MAX`.
    fn hash(
        &self,
        arena: &mut Arena,
        out: BufferHandle,
        msg: BufferHandle,
        ctx: BufferHandle,
        key: Option<BufferHandle>,
    ) -> Result<(), CryptoError>;

    fn hash_keygen(&self, arena: &mut Arena, key: BufferHandle) -> Result<(), CryptoError>;

    /// Derive `out.len()` bytes of subkey `subkey_id` from `master_key`.
    fn kdf_derive(
        &self,
        arena: &mut Arena,
        out: BufferHandle,
        subkey_id: u64,
        ctx: BufferHandle,
        master_key: BufferHandle,
    ) -> Result<(), CryptoError>;

    fn sign_keygen(&self, arena: &mut Arena, keypair: KeyPairHandle) -> Result<(), CryptoError>;

    fn sign_create(
        &self,
        arena: &mut Arena,
        sig: BufferHandle,
        msg: BufferHandle,
        ctx: BufferHandle,
        secret_key: BufferHandle,
    ) -> Result<(), CryptoError>;

    /// `Ok(false)` for any signature that does not verify.
    fn sign_verify(
        &self,
        arena: &mut Arena,
        sig: BufferHandle,
        msg: BufferHandle,
        ctx: BufferHandle,
        public_key: BufferHandle,
    ) -> Result<bool, CryptoError>;

    fn secretbox_keygen(&self, arena: &mut Arena, key: BufferHandle) -> Result<(), CryptoError>;

    /// Encrypt `msg` into `ciphertext` (`SECRETBOX_HEADER + msg.len()` bytes).
    ///
    /// `msg_id` must never repeat under the same key.
    fn secretbox_encrypt(
        &self,
        arena: &mut Arena,
        ciphertext: BufferHandle,
        msg: BufferHandle,
        msg_id: u64,
        ctx: BufferHandle,
        key: BufferHandle,
    ) -> Result<(), CryptoError>;

    /// Decrypt into `plaintext` (`ciphertext.len() - SECRETBOX_HEADER` bytes).
    ///
    /// On failure `plaintext` is left zeroed.
    fn secretbox_decrypt(
        &self,
        arena: &mut Arena,
        plaintext: BufferHandle,
        ciphertext: BufferHandle,
        msg_id: u64,
        ctx: BufferHandle,
        key: BufferHandle,
    ) -> Result<(), CryptoError>;

    /// Static key-exchange key pair.
    fn kx_keygen(&self, arena: &mut Arena, keypair: KeyPairHandle) -> Result<(), CryptoError>;

    /// Initiator: write packet 1 and return the state for step 3.
    fn kx_kk_step1(
        &self,
        arena: &mut Arena,
        packet1: BufferHandle,
        self_keypair: KeyPairHandle,
        peer_public_key: BufferHandle,
    ) -> Result<Self::KxState, CryptoError>;

    /// Responder: consume packet 1, derive session keys and write packet 2.
    fn kx_kk_step2(
        &self,
        arena: &mut Arena,
        session_keys: SessionKeysHandle,
        packet2: BufferHandle,
        packet1: BufferHandle,
        self_keypair: KeyPairHandle,
        peer_public_key: BufferHandle,
    ) -> Result<(), CryptoError>;

    /// Initiator: consume packet 2 and derive session keys.
    fn kx_kk_step3(
        &self,
        arena: &mut Arena,
        state: Self::KxState,
        session_keys: SessionKeysHandle,
        packet2: BufferHandle,
        self_keypair: KeyPairHandle,
    ) -> Result<(), CryptoError>;
}

#[cfg(test)]
mod tests {
    use super::sizes;
    use sluice_common::config;

    #[test]
    fn test_config_bounds_match_sizes() {
        assert_eq!(config::DEFAULT_ARENA_CAPACITY, crate::Arena::DEFAULT_CAPACITY);
        assert_eq!(config::HASH_LEN_MIN, sizes::HASH_MIN);
        assert_eq!(config::HASH_LEN_MAX, sizes::HASH_MAX);
        assert_eq!(config::CONTEXT_LEN, sizes::CONTEXT);
    }
}
