//! Marshalling core for Sluice.
//!
//! This crate provides:
//! - A fixed-capacity [`Arena`] that stages every buffer crossing the
//!   crypto boundary and zeroes it on release
//! - The [`CryptoCapability`] contract and an in-process implementation
//! - One-shot hash / sign / secretbox operations ([`ops`])
//! - Mutually-authenticated KK handshake orchestration ([`kx`])
//! - A replay-protected [`SecureChannel`] for post-handshake traffic
//! - Key-material export to C array and hex files ([`export`])
//!
//! # Design
//!
//! Nothing here holds ambient state: each party owns one arena and passes
//! it by `&mut` into every call. Per-operation buffers live in an
//! [`ArenaScope`] that zeroes them on every exit path.

#![forbid(unsafe_code)]

pub mod arena;
pub mod capability;
pub mod error;
pub mod export;
pub mod keys;
pub mod kx;
pub mod native;
pub mod ops;
pub mod seq_window;
pub mod session;

pub use arena::{Arena, ArenaError, ArenaMark, ArenaScope, BufferHandle};
pub use capability::{sizes, CryptoCapability, KeyPairHandle, SessionKeysHandle};
pub use error::CryptoError;
pub use export::{export_keypair, export_sign_keypair, ExportError, ExportReport};
pub use keys::{
    Context, HashKey, KdfKey, KxKeyPair, SecretboxKey, SessionKeyPair, SignKeyPair, SignPublicKey,
};
pub use kx::{HandshakePhase, Initiator, KxIdentity, Packet1, Packet2, Responder};
pub use native::NativeCapability;
pub use seq_window::SequenceWindow;
pub use session::{Sealed, SecureChannel};
