//! In-process implementation of the crypto capability.
//!
//! | Operation  | Primitive |
//! |------------|-----------|
//! | hash, kdf  | BLAKE3 (keyed / unkeyed XOF) |
//! | sign       | Ed25519 over `context || message` |
//! | secretbox  | XChaCha20-Poly1305, detached tag |
//! | kx         | `Noise_KK_25519_ChaChaPoly_BLAKE2s` |
//!
//! # Secretbox Layout
//!
//! ```text
//! [20 bytes: random nonce] [16 bytes: tag] [payload]
//! ```
//!
//! The 24-byte XChaCha nonce is the random prefix followed by four zero
//! bytes. `context || msg_id (LE)` is authenticated as associated data, so
//! decrypting under another id or context fails like a wrong key does.
//!
//! # Key Exchange
//!
//! KK requires both static public keys up front:
//!
//! ```text
//! Initiator                                Responder
//!     |  -> e, es, ss      (packet 1, 48 B)    |
//!     |--------------------------------------->|
//!     |  <- e, ee, se      (packet 2, 48 B)    |
//!     |<---------------------------------------|
//!     [        raw split -> session keys        ]
//! ```
//!
//! Both packets carry an empty, authenticated payload; any tampering makes
//! the receiving side's `read_message` fail.

use blake3::Hasher;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use snow::params::NoiseParams;
use snow::{Builder, HandshakeState};
use zeroize::{Zeroize, Zeroizing};

use crate::arena::{Arena, BufferHandle};
use crate::capability::{sizes, CryptoCapability, KeyPairHandle, SessionKeysHandle};
use crate::error::CryptoError;

/// Noise protocol pattern (KK with X25519, ChaCha20-Poly1305, BLAKE2s)
const NOISE_PATTERN: &str = "Noise_KK_25519_ChaChaPoly_BLAKE2s";

const HASH_DOMAIN: &[u8] = b"sluice:hash";
const KDF_DOMAIN: &[u8] = b"sluice:kdf";

/// Handshake payloads are always empty.
const PAYLOAD_SCRATCH: usize = 64;

/// Capability backed by RustCrypto / dalek / snow.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCapability;

impl NativeCapability {
    pub fn new() -> Self {
        Self
    }
}

/// Initiator handshake state between steps 1 and 3.
pub struct NativeKxState {
    handshake: Box<HandshakeState>,
    local_public: [u8; sizes::KX_PUBLIC_KEY],
}

impl std::fmt::Debug for NativeKxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeKxState").finish_non_exhaustive()
    }
}

fn expect_len(what: &str, handle: BufferHandle, expected: usize) -> Result<(), CryptoError> {
    if handle.len() != expected {
        return Err(CryptoError::capability(format!(
            "{what}: expected {expected} bytes, got {}",
            handle.len()
        )));
    }
    Ok(())
}

fn expect_range(what: &str, handle: BufferHandle, min: usize, max: usize) -> Result<(), CryptoError> {
    if !(min..=max).contains(&handle.len()) {
        return Err(CryptoError::capability(format!(
            "{what}: length {} outside {min}..={max}",
            handle.len()
        )));
    }
    Ok(())
}

fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::capability(format!("OS random generator unavailable: {e}")))
}

fn signed_message(ctx: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(ctx.len() + msg.len());
    signed.extend_from_slice(ctx);
    signed.extend_from_slice(msg);
    signed
}

fn associated_data(ctx: &[u8], msg_id: u64) -> [u8; sizes::CONTEXT + 8] {
    let mut aad = [0u8; sizes::CONTEXT + 8];
    aad[..sizes::CONTEXT].copy_from_slice(ctx);
    aad[sizes::CONTEXT..].copy_from_slice(&msg_id.to_le_bytes());
    aad
}

fn secretbox_cipher(arena: &Arena, key: BufferHandle) -> Result<XChaCha20Poly1305, CryptoError> {
    expect_len("secretbox key", key, sizes::SECRETBOX_KEY)?;
    Ok(XChaCha20Poly1305::new(Key::from_slice(arena.bytes(key)?)))
}

fn noise_params() -> Result<NoiseParams, CryptoError> {
    NOISE_PATTERN
        .parse()
        .map_err(|e| CryptoError::capability(format!("noise params: {e}")))
}

fn check_kx_keypair(keypair: KeyPairHandle) -> Result<(), CryptoError> {
    expect_len("kx public key", keypair.public, sizes::KX_PUBLIC_KEY)?;
    expect_len("kx secret key", keypair.secret, sizes::KX_SECRET_KEY)
}

/// Noise split: (initiator -> responder, responder -> initiator).
fn raw_split(
    handshake: &mut HandshakeState,
) -> (
    Zeroizing<[u8; sizes::KX_SESSION_KEY]>,
    Zeroizing<[u8; sizes::KX_SESSION_KEY]>,
) {
    let (i2r, r2i) = handshake.dangerously_get_raw_split();
    (Zeroizing::new(i2r), Zeroizing::new(r2i))
}

impl CryptoCapability for NativeCapability {
    type KxState = NativeKxState;

    fn random_uniform(&self, upper_bound: u32) -> u32 {
        if upper_bound < 2 {
            return 0;
        }
        rand::thread_rng().gen_range(0..upper_bound)
    }

    fn random_buf(&self, arena: &mut Arena, out: BufferHandle) -> Result<(), CryptoError> {
        fill_random(arena.bytes_mut(out)?)
    }

    fn hash(
        &self,
        arena: &mut Arena,
        out: BufferHandle,
        msg: BufferHandle,
        ctx: BufferHandle,
        key: Option<BufferHandle>,
    ) -> Result<(), CryptoError> {
        expect_range("hash output", out, sizes::HASH_MIN, sizes::HASH_MAX)?;
        expect_len("hash context", ctx, sizes::CONTEXT)?;

        let mut hasher = match key {
            Some(key) => {
                expect_len("hash key", key, sizes::HASH_KEY)?;
                Hasher::new_keyed(arena.array::<{ sizes::HASH_KEY }>(key)?)
            }
            None => Hasher::new(),
        };

        // Output length is bound in so a short digest is not a prefix of a long one
        hasher
            .update(HASH_DOMAIN)
            .update(arena.bytes(ctx)?)
            .update(&(out.len() as u16).to_le_bytes())
            .update(arena.bytes(msg)?);
        hasher.finalize_xof().fill(arena.bytes_mut(out)?);
        Ok(())
    }

    fn hash_keygen(&self, arena: &mut Arena, key: BufferHandle) -> Result<(), CryptoError> {
        expect_len("hash key", key, sizes::HASH_KEY)?;
        fill_random(arena.bytes_mut(key)?)
    }

    fn kdf_derive(
        &self,
        arena: &mut Arena,
        out: BufferHandle,
        subkey_id: u64,
        ctx: BufferHandle,
        master_key: BufferHandle,
    ) -> Result<(), CryptoError> {
        expect_range("kdf output", out, sizes::KDF_MIN, sizes::KDF_MAX)?;
        expect_len("kdf context", ctx, sizes::CONTEXT)?;
        expect_len("kdf master key", master_key, sizes::KDF_KEY)?;

        let mut hasher = Hasher::new_keyed(arena.array::<{ sizes::KDF_KEY }>(master_key)?);
        hasher
            .update(KDF_DOMAIN)
            .update(arena.bytes(ctx)?)
            .update(&subkey_id.to_le_bytes())
            .update(&(out.len() as u16).to_le_bytes());
        hasher.finalize_xof().fill(arena.bytes_mut(out)?);
        Ok(())
    }

    fn sign_keygen(&self, arena: &mut Arena, keypair: KeyPairHandle) -> Result<(), CryptoError> {
        expect_len("sign public key", keypair.public, sizes::SIGN_PUBLIC_KEY)?;
        expect_len("sign secret key", keypair.secret, sizes::SIGN_SECRET_KEY)?;

        let signing_key = SigningKey::generate(&mut OsRng);
        let secret = Zeroizing::new(signing_key.to_keypair_bytes());

        arena.write(keypair.public, signing_key.verifying_key().as_bytes())?;
        arena.write(keypair.secret, &secret[..])?;
        Ok(())
    }

    fn sign_create(
        &self,
        arena: &mut Arena,
        sig: BufferHandle,
        msg: BufferHandle,
        ctx: BufferHandle,
        secret_key: BufferHandle,
    ) -> Result<(), CryptoError> {
        expect_len("signature", sig, sizes::SIGN)?;
        expect_len("sign context", ctx, sizes::CONTEXT)?;
        expect_len("sign secret key", secret_key, sizes::SIGN_SECRET_KEY)?;

        let signing_key =
            SigningKey::from_keypair_bytes(arena.array::<{ sizes::SIGN_SECRET_KEY }>(secret_key)?)
                .map_err(|_| {
                    CryptoError::InvalidKey("secret key does not match its public half".into())
                })?;

        let signed = signed_message(arena.bytes(ctx)?, arena.bytes(msg)?);
        let signature = signing_key.sign(&signed);
        arena.write(sig, &signature.to_bytes())?;
        Ok(())
    }

    fn sign_verify(
        &self,
        arena: &mut Arena,
        sig: BufferHandle,
        msg: BufferHandle,
        ctx: BufferHandle,
        public_key: BufferHandle,
    ) -> Result<bool, CryptoError> {
        expect_len("signature", sig, sizes::SIGN)?;
        expect_len("sign context", ctx, sizes::CONTEXT)?;
        expect_len("sign public key", public_key, sizes::SIGN_PUBLIC_KEY)?;

        let verifying_key =
            match VerifyingKey::from_bytes(arena.array::<{ sizes::SIGN_PUBLIC_KEY }>(public_key)?) {
                Ok(key) => key,
                Err(_) => return Ok(false),
            };
        let signature = Signature::from_bytes(arena.array::<{ sizes::SIGN }>(sig)?);
        let signed = signed_message(arena.bytes(ctx)?, arena.bytes(msg)?);

        Ok(verifying_key.verify_strict(&signed, &signature).is_ok())
    }

    fn secretbox_keygen(&self, arena: &mut Arena, key: BufferHandle) -> Result<(), CryptoError> {
        expect_len("secretbox key", key, sizes::SECRETBOX_KEY)?;
        fill_random(arena.bytes_mut(key)?)
    }

    fn secretbox_encrypt(
        &self,
        arena: &mut Arena,
        ciphertext: BufferHandle,
        msg: BufferHandle,
        msg_id: u64,
        ctx: BufferHandle,
        key: BufferHandle,
    ) -> Result<(), CryptoError> {
        expect_len("secretbox context", ctx, sizes::CONTEXT)?;
        expect_len("secretbox ciphertext", ciphertext, sizes::SECRETBOX_HEADER + msg.len())?;

        let cipher = secretbox_cipher(arena, key)?;
        let aad = associated_data(arena.bytes(ctx)?, msg_id);

        let mut nonce = [0u8; 24];
        fill_random(&mut nonce[..sizes::SECRETBOX_NONCE])?;

        let header = ciphertext.sub(0, sizes::SECRETBOX_HEADER)?;
        let body = ciphertext.sub(sizes::SECRETBOX_HEADER, msg.len())?;
        arena.copy_within(msg, body)?;

        let tag = cipher
            .encrypt_in_place_detached(XNonce::from_slice(&nonce), &aad, arena.bytes_mut(body)?)
            .map_err(|_| CryptoError::capability("secretbox encryption failed"))?;

        let header = arena.bytes_mut(header)?;
        header[..sizes::SECRETBOX_NONCE].copy_from_slice(&nonce[..sizes::SECRETBOX_NONCE]);
        header[sizes::SECRETBOX_NONCE..].copy_from_slice(&tag);
        Ok(())
    }

    fn secretbox_decrypt(
        &self,
        arena: &mut Arena,
        plaintext: BufferHandle,
        ciphertext: BufferHandle,
        msg_id: u64,
        ctx: BufferHandle,
        key: BufferHandle,
    ) -> Result<(), CryptoError> {
        expect_len("secretbox context", ctx, sizes::CONTEXT)?;
        expect_len(
            "secretbox ciphertext",
            ciphertext,
            sizes::SECRETBOX_HEADER + plaintext.len(),
        )?;

        let cipher = secretbox_cipher(arena, key)?;
        let aad = associated_data(arena.bytes(ctx)?, msg_id);

        let header = ciphertext.sub(0, sizes::SECRETBOX_HEADER)?;
        let body = ciphertext.sub(sizes::SECRETBOX_HEADER, plaintext.len())?;

        let (nonce, tag) = {
            let header = arena.bytes(header)?;
            let mut nonce = [0u8; 24];
            nonce[..sizes::SECRETBOX_NONCE].copy_from_slice(&header[..sizes::SECRETBOX_NONCE]);
            (nonce, Tag::clone_from_slice(&header[sizes::SECRETBOX_NONCE..]))
        };

        arena.copy_within(body, plaintext)?;
        let out = arena.bytes_mut(plaintext)?;
        if cipher
            .decrypt_in_place_detached(XNonce::from_slice(&nonce), &aad, out, &tag)
            .is_err()
        {
            out.zeroize();
            return Err(CryptoError::AuthenticationFailure);
        }
        Ok(())
    }

    fn kx_keygen(&self, arena: &mut Arena, keypair: KeyPairHandle) -> Result<(), CryptoError> {
        check_kx_keypair(keypair)?;

        let mut secret = Zeroizing::new([0u8; sizes::KX_SECRET_KEY]);
        fill_random(&mut secret[..])?;

        let static_secret = x25519_dalek::StaticSecret::from(*secret);
        let public = x25519_dalek::PublicKey::from(&static_secret);

        arena.write(keypair.public, public.as_bytes())?;
        arena.write(keypair.secret, &secret[..])?;
        Ok(())
    }

    fn kx_kk_step1(
        &self,
        arena: &mut Arena,
        packet1: BufferHandle,
        self_keypair: KeyPairHandle,
        peer_public_key: BufferHandle,
    ) -> Result<NativeKxState, CryptoError> {
        expect_len("kk packet 1", packet1, sizes::KX_KK_PACKET1)?;
        check_kx_keypair(self_keypair)?;
        expect_len("kx peer public key", peer_public_key, sizes::KX_PUBLIC_KEY)?;

        let local_public = *arena.array::<{ sizes::KX_PUBLIC_KEY }>(self_keypair.public)?;
        let mut handshake = Builder::new(noise_params()?)
            .local_private_key(arena.bytes(self_keypair.secret)?)
            .remote_public_key(arena.bytes(peer_public_key)?)
            .build_initiator()
            .map_err(|e| CryptoError::capability(format!("failed to build initiator: {e}")))?;

        let written = handshake
            .write_message(&[], arena.bytes_mut(packet1)?)
            .map_err(|e| CryptoError::capability(format!("kk packet 1: {e}")))?;
        if written != sizes::KX_KK_PACKET1 {
            return Err(CryptoError::capability(format!(
                "kk packet 1: wrote {written} bytes"
            )));
        }

        Ok(NativeKxState {
            handshake: Box::new(handshake),
            local_public,
        })
    }

    fn kx_kk_step2(
        &self,
        arena: &mut Arena,
        session_keys: SessionKeysHandle,
        packet2: BufferHandle,
        packet1: BufferHandle,
        self_keypair: KeyPairHandle,
        peer_public_key: BufferHandle,
    ) -> Result<(), CryptoError> {
        expect_len("kk packet 1", packet1, sizes::KX_KK_PACKET1)?;
        expect_len("kk packet 2", packet2, sizes::KX_KK_PACKET2)?;
        expect_len("session rx key", session_keys.rx, sizes::KX_SESSION_KEY)?;
        expect_len("session tx key", session_keys.tx, sizes::KX_SESSION_KEY)?;
        check_kx_keypair(self_keypair)?;
        expect_len("kx peer public key", peer_public_key, sizes::KX_PUBLIC_KEY)?;

        let mut handshake = Builder::new(noise_params()?)
            .local_private_key(arena.bytes(self_keypair.secret)?)
            .remote_public_key(arena.bytes(peer_public_key)?)
            .build_responder()
            .map_err(|e| CryptoError::capability(format!("failed to build responder: {e}")))?;

        let mut payload = [0u8; PAYLOAD_SCRATCH];
        if handshake
            .read_message(arena.bytes(packet1)?, &mut payload)
            .is_err()
        {
            return Err(CryptoError::AuthenticationFailure);
        }

        let written = handshake
            .write_message(&[], arena.bytes_mut(packet2)?)
            .map_err(|e| CryptoError::capability(format!("kk packet 2: {e}")))?;
        if written != sizes::KX_KK_PACKET2 || !handshake.is_handshake_finished() {
            return Err(CryptoError::capability("kk handshake did not complete"));
        }

        let (i2r, r2i) = raw_split(&mut handshake);
        arena.write(session_keys.rx, &i2r[..])?;
        arena.write(session_keys.tx, &r2i[..])?;
        Ok(())
    }

    fn kx_kk_step3(
        &self,
        arena: &mut Arena,
        state: NativeKxState,
        session_keys: SessionKeysHandle,
        packet2: BufferHandle,
        self_keypair: KeyPairHandle,
    ) -> Result<(), CryptoError> {
        let NativeKxState {
            mut handshake,
            local_public,
        } = state;

        expect_len("kk packet 2", packet2, sizes::KX_KK_PACKET2)?;
        expect_len("session rx key", session_keys.rx, sizes::KX_SESSION_KEY)?;
        expect_len("session tx key", session_keys.tx, sizes::KX_SESSION_KEY)?;
        check_kx_keypair(self_keypair)?;

        if arena.array::<{ sizes::KX_PUBLIC_KEY }>(self_keypair.public)? != &local_public {
            return Err(CryptoError::capability(
                "handshake state belongs to a different key pair",
            ));
        }

        let mut payload = [0u8; PAYLOAD_SCRATCH];
        if handshake
            .read_message(arena.bytes(packet2)?, &mut payload)
            .is_err()
        {
            return Err(CryptoError::AuthenticationFailure);
        }
        if !handshake.is_handshake_finished() {
            return Err(CryptoError::capability("kk handshake did not complete"));
        }

        let (i2r, r2i) = raw_split(&mut handshake);
        arena.write(session_keys.rx, &r2i[..])?;
        arena.write(session_keys.tx, &i2r[..])?;
        Ok(())
    }
}
