//! Owned key material and context tags.
//!
//! Key types copy their bytes out of the arena before the owning scope
//! zeroes it. They are zeroized on drop and never print their contents.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::capability::sizes;
use crate::error::CryptoError;

/// 8-byte domain-separation tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context([u8; sizes::CONTEXT]);

impl Context {
    /// Context from an 8-byte string such as `"Examples"`.
    pub fn new(tag: &str) -> Result<Self, CryptoError> {
        let bytes: [u8; sizes::CONTEXT] = tag
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidContext(tag.len()))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; sizes::CONTEXT]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; sizes::CONTEXT] {
        &self.0
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Context({s:?})"),
            Err(_) => write!(f, "Context({})", hex::encode(self.0)),
        }
    }
}

fn decode_hex<const N: usize>(what: &str, s: &str) -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s.trim(), &mut out)
        .map_err(|e| CryptoError::InvalidKey(format!("{what}: {e}")))?;
    Ok(out)
}

macro_rules! secret_key {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Zeroize, ZeroizeOnDrop)]
        pub struct $name([u8; $len]);

        impl $name {
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Parse from lowercase or uppercase hex.
            pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
                decode_hex::<{ $len }>(stringify!($name), s).map(Self)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        }
    };
}

secret_key!(
    /// Key for keyed generic hashing.
    HashKey,
    sizes::HASH_KEY
);

secret_key!(
    /// Master key for subkey derivation.
    KdfKey,
    sizes::KDF_KEY
);

secret_key!(
    /// Symmetric key for the secretbox AEAD. Session keys are secretbox keys.
    SecretboxKey,
    sizes::SECRETBOX_KEY
);

/// Ed25519 public key, safe to share.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignPublicKey([u8; sizes::SIGN_PUBLIC_KEY]);

impl SignPublicKey {
    pub fn from_bytes(bytes: [u8; sizes::SIGN_PUBLIC_KEY]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        decode_hex::<{ sizes::SIGN_PUBLIC_KEY }>("sign public key", s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; sizes::SIGN_PUBLIC_KEY] {
        &self.0
    }
}

impl fmt::Debug for SignPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignPublicKey({})", hex::encode(self.0))
    }
}

/// Ed25519 key pair; the secret half is `seed || public key`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SignKeyPair {
    public: [u8; sizes::SIGN_PUBLIC_KEY],
    secret: [u8; sizes::SIGN_SECRET_KEY],
}

impl SignKeyPair {
    /// Build from raw halves. The secret key must end with the public key.
    pub fn from_bytes(
        public: [u8; sizes::SIGN_PUBLIC_KEY],
        secret: [u8; sizes::SIGN_SECRET_KEY],
    ) -> Result<Self, CryptoError> {
        if secret[sizes::SIGN_SEED..] != public {
            return Err(CryptoError::InvalidKey(
                "secret key does not embed the public key".into(),
            ));
        }
        Ok(Self { public, secret })
    }

    pub fn from_hex(public: &str, secret: &str) -> Result<Self, CryptoError> {
        let public = decode_hex::<{ sizes::SIGN_PUBLIC_KEY }>("sign public key", public)?;
        let mut secret = decode_hex::<{ sizes::SIGN_SECRET_KEY }>("sign secret key", secret)?;
        let keypair = Self::from_bytes(public, secret);
        secret.zeroize();
        keypair
    }

    pub fn public_key(&self) -> SignPublicKey {
        SignPublicKey(self.public)
    }

    pub fn public_bytes(&self) -> &[u8; sizes::SIGN_PUBLIC_KEY] {
        &self.public
    }

    pub fn secret_bytes(&self) -> &[u8; sizes::SIGN_SECRET_KEY] {
        &self.secret
    }
}

impl fmt::Debug for SignKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignKeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Static X25519 key pair identifying a handshake party.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KxKeyPair {
    public: [u8; sizes::KX_PUBLIC_KEY],
    secret: [u8; sizes::KX_SECRET_KEY],
}

impl KxKeyPair {
    /// Build from raw halves; the public key is recomputed and checked.
    pub fn from_bytes(
        public: [u8; sizes::KX_PUBLIC_KEY],
        secret: [u8; sizes::KX_SECRET_KEY],
    ) -> Result<Self, CryptoError> {
        let static_secret = x25519_dalek::StaticSecret::from(secret);
        if x25519_dalek::PublicKey::from(&static_secret).as_bytes() != &public {
            return Err(CryptoError::InvalidKey(
                "kx public key does not match secret key".into(),
            ));
        }
        Ok(Self { public, secret })
    }

    pub fn public_bytes(&self) -> &[u8; sizes::KX_PUBLIC_KEY] {
        &self.public
    }

    pub fn secret_bytes(&self) -> &[u8; sizes::KX_SECRET_KEY] {
        &self.secret
    }
}

impl fmt::Debug for KxKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KxKeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Directional keys from a completed handshake.
///
/// `tx` encrypts outbound traffic, `rx` decrypts inbound traffic. The
/// initiator's `tx` is the responder's `rx` and vice versa.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyPair {
    rx: SecretboxKey,
    tx: SecretboxKey,
}

impl SessionKeyPair {
    pub fn new(rx: SecretboxKey, tx: SecretboxKey) -> Self {
        Self { rx, tx }
    }

    pub fn rx(&self) -> &SecretboxKey {
        &self.rx
    }

    pub fn tx(&self) -> &SecretboxKey {
        &self.tx
    }
}

impl fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeyPair(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUB_HEX: &str = "f0560a5b53ce2028f0cbe7cd197d3bae2cc03b354cdc55d912ca7a02074e9626";
    const PRIV_HEX: &str = "d9293348c2abd81c3f52c827640860f10faaf9a9304dce71dde2f5f10fec502cf0560a5b53ce2028f0cbe7cd197d3bae2cc03b354cdc55d912ca7a02074e9626";

    #[test]
    fn test_context_length() {
        assert!(Context::new("Examples").is_ok());
        assert!(matches!(
            Context::new("Example"),
            Err(CryptoError::InvalidContext(7))
        ));
        assert!(Context::new("Examples!").is_err());
    }

    #[test]
    fn test_context_debug() {
        let ctx = Context::new("StatusCX").unwrap();
        assert_eq!(format!("{ctx:?}"), "Context(\"StatusCX\")");
    }

    #[test]
    fn test_sign_keypair_from_hex() {
        let keypair = SignKeyPair::from_hex(PUB_HEX, PRIV_HEX).unwrap();
        assert_eq!(hex::encode(keypair.public_bytes()), PUB_HEX);
        assert_eq!(hex::encode(keypair.secret_bytes()), PRIV_HEX);
    }

    #[test]
    fn test_sign_keypair_mismatch_rejected() {
        let other_pub = "00".repeat(32);
        assert!(SignKeyPair::from_hex(&other_pub, PRIV_HEX).is_err());
        assert!(SignKeyPair::from_hex(PUB_HEX, "abcd").is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let key = HashKey::from_bytes([0x42; 32]);
        assert_eq!(format!("{key:?}"), "HashKey(..)");

        let keypair = SignKeyPair::from_hex(PUB_HEX, PRIV_HEX).unwrap();
        assert!(!format!("{keypair:?}").contains("d9293348"));
    }

    #[test]
    fn test_hash_key_from_hex() {
        let key =
            HashKey::from_hex("1876bc54ddeeee715f9a191ec676fd45af4f008a05c21cc7cd67ecbceadb6c1f")
                .unwrap();
        assert_eq!(key.as_bytes()[0], 0x18);
        assert!(HashKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_kx_keypair_checks_public() {
        let secret = [7u8; 32];
        let public = *x25519_dalek::PublicKey::from(&x25519_dalek::StaticSecret::from(secret))
            .as_bytes();

        assert!(KxKeyPair::from_bytes(public, secret).is_ok());
        assert!(KxKeyPair::from_bytes([0u8; 32], secret).is_err());
    }
}
