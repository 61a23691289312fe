//! One-shot operations over a capability.
//!
//! Each function stages its inputs in an [`ArenaScope`](crate::arena::ArenaScope),
//! calls the capability, and copies the result out. The scope zeroes and
//! releases everything it reserved on return, error paths included, so the
//! arena cursor is where the caller left it afterwards.
//!
//! Inputs are staged as `ctx, msg, output, key`, matching the layout the
//! sandboxed module expects.

use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::arena::Arena;
use crate::capability::{sizes, CryptoCapability, KeyPairHandle};
use crate::error::CryptoError;
pub use crate::keys::{
    Context, HashKey, KdfKey, KxKeyPair, SecretboxKey, SignKeyPair, SignPublicKey,
};

pub fn random_uniform<C: CryptoCapability>(cap: &C, upper_bound: u32) -> u32 {
    cap.random_uniform(upper_bound)
}

pub fn random_bytes<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut scope = arena.scope();
    let out = scope.reserve(len)?;
    cap.random_buf(&mut scope, out)?;
    let bytes = scope.bytes(out)?.to_vec();
    Ok(bytes)
}

/// Digest of `len` bytes; keyed when `key` is given.
pub fn hash<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
    ctx: &Context,
    msg: &[u8],
    key: Option<&HashKey>,
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut scope = arena.scope();
    let ctx = scope.stage(ctx.as_bytes())?;
    let msg = scope.stage(msg)?;
    let out = scope.reserve(len)?;
    let key = key.map(|k| scope.stage(k.as_bytes())).transpose()?;

    trace!(
        ctx = ctx.offset(),
        msg = msg.offset(),
        out = out.offset(),
        keyed = key.is_some(),
        "hash"
    );
    cap.hash(&mut scope, out, msg, ctx, key)?;
    let digest = scope.bytes(out)?.to_vec();
    Ok(digest)
}

pub fn hash_keygen<C: CryptoCapability>(cap: &C, arena: &mut Arena) -> Result<HashKey, CryptoError> {
    let mut scope = arena.scope();
    let key = scope.reserve(sizes::HASH_KEY)?;
    cap.hash_keygen(&mut scope, key)?;
    let key = HashKey::from_bytes(*scope.array(key)?);
    Ok(key)
}

/// Subkey `subkey_id` of `len` bytes.
pub fn kdf_derive<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
    ctx: &Context,
    master_key: &KdfKey,
    subkey_id: u64,
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut scope = arena.scope();
    let ctx = scope.stage(ctx.as_bytes())?;
    let out = scope.reserve(len)?;
    let master = scope.stage(master_key.as_bytes())?;

    cap.kdf_derive(&mut scope, out, subkey_id, ctx, master)?;
    let subkey = Zeroizing::new(scope.bytes(out)?.to_vec());
    Ok(subkey)
}

pub fn sign_keygen<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
) -> Result<SignKeyPair, CryptoError> {
    let mut scope = arena.scope();
    let keypair =
        KeyPairHandle::reserve(&mut scope, sizes::SIGN_PUBLIC_KEY, sizes::SIGN_SECRET_KEY)?;
    cap.sign_keygen(&mut scope, keypair)?;

    let public: [u8; sizes::SIGN_PUBLIC_KEY] = *scope.array(keypair.public)?;
    let secret: Zeroizing<[u8; sizes::SIGN_SECRET_KEY]> =
        Zeroizing::new(*scope.array(keypair.secret)?);
    let keypair = SignKeyPair::from_bytes(public, *secret)?;
    debug!(public = %hex::encode(public), "generated signing key pair");
    Ok(keypair)
}

pub fn sign<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
    ctx: &Context,
    msg: &[u8],
    keypair: &SignKeyPair,
) -> Result<[u8; sizes::SIGN], CryptoError> {
    let mut scope = arena.scope();
    let ctx = scope.stage(ctx.as_bytes())?;
    let msg = scope.stage(msg)?;
    let sig = scope.reserve(sizes::SIGN)?;
    let secret = scope.stage(keypair.secret_bytes())?;

    cap.sign_create(&mut scope, sig, msg, ctx, secret)?;
    let sig: [u8; sizes::SIGN] = *scope.array(sig)?;
    Ok(sig)
}

/// `Ok(false)` for a signature that does not verify; `Err` only for
/// arena or capability failures.
pub fn verify<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
    ctx: &Context,
    msg: &[u8],
    sig: &[u8; sizes::SIGN],
    public_key: &SignPublicKey,
) -> Result<bool, CryptoError> {
    let mut scope = arena.scope();
    let ctx = scope.stage(ctx.as_bytes())?;
    let msg = scope.stage(msg)?;
    let sig = scope.stage(sig)?;
    let public = scope.stage(public_key.as_bytes())?;

    let valid = cap.sign_verify(&mut scope, sig, msg, ctx, public)?;
    if !valid {
        debug!("signature rejected");
    }
    Ok(valid)
}

pub fn secretbox_keygen<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
) -> Result<SecretboxKey, CryptoError> {
    let mut scope = arena.scope();
    let key = scope.reserve(sizes::SECRETBOX_KEY)?;
    cap.secretbox_keygen(&mut scope, key)?;
    let key = SecretboxKey::from_bytes(*scope.array(key)?);
    Ok(key)
}

/// Seal `msg` as `header || payload`.
///
/// The caller owns `msg_id` uniqueness; see
/// [`SecureChannel`](crate::session::SecureChannel) for an enforcing wrapper.
pub fn encrypt<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
    ctx: &Context,
    key: &SecretboxKey,
    msg_id: u64,
    msg: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut scope = arena.scope();
    let ctx = scope.stage(ctx.as_bytes())?;
    let msg = scope.stage(msg)?;
    let ciphertext = scope.reserve(sizes::SECRETBOX_HEADER + msg.len())?;
    let key = scope.stage(key.as_bytes())?;

    cap.secretbox_encrypt(&mut scope, ciphertext, msg, msg_id, ctx, key)?;
    let sealed = scope.bytes(ciphertext)?.to_vec();
    Ok(sealed)
}

/// Open a sealed message. Any rejection, including a truncated
/// ciphertext, is [`CryptoError::AuthenticationFailure`].
pub fn decrypt<C: CryptoCapability>(
    cap: &C,
    arena: &mut Arena,
    ctx: &Context,
    key: &SecretboxKey,
    msg_id: u64,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let Some(len) = ciphertext.len().checked_sub(sizes::SECRETBOX_HEADER) else {
        return Err(CryptoError::AuthenticationFailure);
    };

    let mut scope = arena.scope();
    let ctx = scope.stage(ctx.as_bytes())?;
    let ciphertext = scope.stage(ciphertext)?;
    let plaintext = scope.reserve(len)?;
    let key = scope.stage(key.as_bytes())?;

    cap.secretbox_decrypt(&mut scope, plaintext, ciphertext, msg_id, ctx, key)?;
    let opened = Zeroizing::new(scope.bytes(plaintext)?.to_vec());
    Ok(opened)
}

/// Static key-exchange key pair.
pub fn kx_keygen<C: CryptoCapability>(cap: &C, arena: &mut Arena) -> Result<KxKeyPair, CryptoError> {
    let mut scope = arena.scope();
    let keypair = KeyPairHandle::reserve(&mut scope, sizes::KX_PUBLIC_KEY, sizes::KX_SECRET_KEY)?;
    cap.kx_keygen(&mut scope, keypair)?;

    let public: [u8; sizes::KX_PUBLIC_KEY] = *scope.array(keypair.public)?;
    let secret: Zeroizing<[u8; sizes::KX_SECRET_KEY]> =
        Zeroizing::new(*scope.array(keypair.secret)?);
    KxKeyPair::from_bytes(public, *secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeCapability;

    fn setup() -> (NativeCapability, Arena, Context) {
        (
            NativeCapability::new(),
            Arena::new(4096),
            Context::new("Examples").unwrap(),
        )
    }

    #[test]
    fn test_ops_leave_arena_clean() {
        let (cap, mut arena, ctx) = setup();
        let pinned = arena.stage(b"long-lived").unwrap();

        hash(&cap, &mut arena, &ctx, b"abc", None, 32).unwrap();
        let keypair = sign_keygen(&cap, &mut arena).unwrap();
        sign(&cap, &mut arena, &ctx, b"abc", &keypair).unwrap();

        assert_eq!(arena.cursor(), pinned.len());
        assert_eq!(arena.bytes(pinned).unwrap(), b"long-lived");
    }

    #[test]
    fn test_capacity_error_releases_scope() {
        let cap = NativeCapability::new();
        let mut arena = Arena::new(64);
        let ctx = Context::new("Examples").unwrap();

        let err = hash(&cap, &mut arena, &ctx, &[1u8; 40], None, 32).unwrap_err();
        assert!(err.is_capacity_exceeded());
        assert_eq!(arena.cursor(), 0);
    }

    #[test]
    fn test_hash_determinism_and_keying() {
        let (cap, mut arena, ctx) = setup();
        let msg = b"Arbitrary data to hash";
        let key = hash_keygen(&cap, &mut arena).unwrap();

        let a = hash(&cap, &mut arena, &ctx, msg, None, 32).unwrap();
        let b = hash(&cap, &mut arena, &ctx, msg, None, 32).unwrap();
        let keyed = hash(&cap, &mut arena, &ctx, msg, Some(&key), 32).unwrap();
        let keyed_again = hash(&cap, &mut arena, &ctx, msg, Some(&key), 32).unwrap();

        assert_eq!(a, b);
        assert_eq!(keyed, keyed_again);
        assert_ne!(a, keyed);
    }

    #[test]
    fn test_truncated_ciphertext_is_auth_failure() {
        let (cap, mut arena, ctx) = setup();
        let key = secretbox_keygen(&cap, &mut arena).unwrap();

        let err = decrypt(&cap, &mut arena, &ctx, &key, 0, &[0u8; 35]).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_empty_message_round_trip() {
        let (cap, mut arena, ctx) = setup();
        let key = secretbox_keygen(&cap, &mut arena).unwrap();

        let sealed = encrypt(&cap, &mut arena, &ctx, &key, 0, b"").unwrap();
        assert_eq!(sealed.len(), sizes::SECRETBOX_HEADER);
        let opened = decrypt(&cap, &mut arena, &ctx, &key, 0, &sealed).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn test_kdf_subkeys_differ() {
        let (cap, mut arena, ctx) = setup();
        let master = KdfKey::from_bytes([9u8; 32]);

        let k1 = kdf_derive(&cap, &mut arena, &ctx, &master, 1, 32).unwrap();
        let k2 = kdf_derive(&cap, &mut arena, &ctx, &master, 2, 32).unwrap();
        let k1_again = kdf_derive(&cap, &mut arena, &ctx, &master, 1, 32).unwrap();

        assert_ne!(*k1, *k2);
        assert_eq!(*k1, *k1_again);
    }

    #[test]
    fn test_kx_keygen_is_consistent() {
        let (cap, mut arena, _) = setup();
        let a = kx_keygen(&cap, &mut arena).unwrap();
        let b = kx_keygen(&cap, &mut arena).unwrap();
        assert_ne!(a.public_bytes(), b.public_bytes());
        assert_eq!(arena.cursor(), 0);
    }
}
