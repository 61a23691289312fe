//! Mutually-authenticated key exchange over the capability.
//!
//! Both parties know each other's static public key in advance. The
//! initiator sends one packet, the responder answers with one packet and
//! derives its session keys, and the initiator derives its own on receipt:
//!
//! ```text
//! Initiator                                    Responder
//!   start()      -- Packet1 (48 B) -->
//!                                              respond() -> SessionKeyPair
//!                <-- Packet2 (48 B) --
//!   finish()  -> SessionKeyPair
//! ```
//!
//! On success `initiator.tx == responder.rx` and `initiator.rx == responder.tx`.
//!
//! A party that fails any step, authentication or otherwise, is `Failed`
//! for good. Its handshake state is dropped and a retry needs a new
//! [`Initiator`] with fresh ephemeral material.
//!
//! Every step runs inside an arena scope, so per-step buffers are zeroed
//! on every exit path. The static identity is staged once, below those
//! scopes, and survives them.

use std::fmt;

use tracing::{debug, warn};

use crate::arena::{Arena, BufferHandle};
use crate::capability::{sizes, CryptoCapability, KeyPairHandle, SessionKeysHandle};
use crate::error::CryptoError;
use crate::keys::{KxKeyPair, SecretboxKey, SessionKeyPair};

macro_rules! packet {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Parse a packet received from the peer.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
                bytes
                    .try_into()
                    .map(Self)
                    .map_err(|_| CryptoError::InvalidPacket {
                        expected: $len,
                        actual: bytes.len(),
                    })
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }
    };
}

packet!(
    /// Initiator to responder.
    Packet1,
    sizes::KX_KK_PACKET1
);

packet!(
    /// Responder to initiator.
    Packet2,
    sizes::KX_KK_PACKET2
);

/// A party's static key pair and its peer's static public key, staged in
/// the party's arena.
#[derive(Debug, Clone, Copy)]
pub struct KxIdentity {
    keypair: KeyPairHandle,
    peer_public: BufferHandle,
}

impl KxIdentity {
    /// Stage the identity at the arena cursor.
    ///
    /// Stage it before taking any mark that will later be reset to;
    /// resetting below it invalidates the identity.
    pub fn stage(
        arena: &mut Arena,
        keypair: &KxKeyPair,
        peer_public: &[u8; sizes::KX_PUBLIC_KEY],
    ) -> Result<Self, CryptoError> {
        let keypair = KeyPairHandle::stage(arena, keypair.public_bytes(), keypair.secret_bytes())?;
        let peer_public = arena.stage(peer_public)?;
        Ok(Self {
            keypair,
            peer_public,
        })
    }

    pub fn keypair(&self) -> KeyPairHandle {
        self.keypair
    }

    pub fn peer_public(&self) -> BufferHandle {
        self.peer_public
    }
}

/// Observable handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Init,
    AwaitingPacket2,
    Complete,
    Failed,
}

enum InitiatorState<S> {
    Init,
    AwaitingPacket2(S),
    Complete,
    Failed,
}

fn read_session_keys(
    arena: &Arena,
    keys: SessionKeysHandle,
) -> Result<SessionKeyPair, CryptoError> {
    let rx = SecretboxKey::from_bytes(*arena.array(keys.rx)?);
    let tx = SecretboxKey::from_bytes(*arena.array(keys.tx)?);
    Ok(SessionKeyPair::new(rx, tx))
}

fn log_failure(role: &str, err: &CryptoError) {
    if err.is_authentication_failure() {
        warn!(role, "handshake packet rejected, attempt abandoned");
    } else {
        debug!(role, error = %err, "handshake step failed");
    }
}

/// Initiating party.
pub struct Initiator<C: CryptoCapability> {
    cap: C,
    identity: KxIdentity,
    state: InitiatorState<C::KxState>,
}

impl<C: CryptoCapability> Initiator<C> {
    pub fn new(cap: C, identity: KxIdentity) -> Self {
        Self {
            cap,
            identity,
            state: InitiatorState::Init,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        match self.state {
            InitiatorState::Init => HandshakePhase::Init,
            InitiatorState::AwaitingPacket2(_) => HandshakePhase::AwaitingPacket2,
            InitiatorState::Complete => HandshakePhase::Complete,
            InitiatorState::Failed => HandshakePhase::Failed,
        }
    }

    /// Produce packet 1 with fresh ephemeral material.
    pub fn start(&mut self, arena: &mut Arena) -> Result<Packet1, CryptoError> {
        if !matches!(self.state, InitiatorState::Init) {
            return Err(CryptoError::HandshakeState("start requires a fresh initiator"));
        }
        self.state = InitiatorState::Failed;

        let mut scope = arena.scope();
        let result = (|| {
            let packet1 = scope.reserve(sizes::KX_KK_PACKET1)?;
            let kx = self.cap.kx_kk_step1(
                &mut scope,
                packet1,
                self.identity.keypair,
                self.identity.peer_public,
            )?;
            let packet = Packet1(*scope.array(packet1)?);
            Ok::<_, CryptoError>((kx, packet))
        })();

        match result {
            Ok((kx, packet)) => {
                self.state = InitiatorState::AwaitingPacket2(kx);
                debug!("initiator sent packet 1");
                Ok(packet)
            }
            Err(e) => {
                log_failure("initiator", &e);
                Err(e)
            }
        }
    }

    /// Consume packet 2 and derive the session keys.
    ///
    /// The handshake state is consumed whether or not this succeeds.
    pub fn finish(
        &mut self,
        arena: &mut Arena,
        packet2: &Packet2,
    ) -> Result<SessionKeyPair, CryptoError> {
        let kx = match std::mem::replace(&mut self.state, InitiatorState::Failed) {
            InitiatorState::AwaitingPacket2(kx) => kx,
            other => {
                self.state = other;
                return Err(CryptoError::HandshakeState(
                    "finish requires packet 1 to have been sent",
                ));
            }
        };

        let mut scope = arena.scope();
        let result = (|| {
            let packet2 = scope.stage(packet2.as_bytes())?;
            let keys = SessionKeysHandle::reserve(&mut scope)?;
            self.cap
                .kx_kk_step3(&mut scope, kx, keys, packet2, self.identity.keypair)?;
            read_session_keys(&scope, keys)
        })();

        match result {
            Ok(session) => {
                self.state = InitiatorState::Complete;
                debug!("initiator handshake complete");
                Ok(session)
            }
            Err(e) => {
                log_failure("initiator", &e);
                Err(e)
            }
        }
    }
}

impl<C: CryptoCapability> fmt::Debug for Initiator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initiator")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Responding party.
pub struct Responder<C: CryptoCapability> {
    cap: C,
    identity: KxIdentity,
    phase: HandshakePhase,
}

impl<C: CryptoCapability> Responder<C> {
    pub fn new(cap: C, identity: KxIdentity) -> Self {
        Self {
            cap,
            identity,
            phase: HandshakePhase::Init,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Consume packet 1, derive the session keys and produce packet 2.
    ///
    /// No keys are derived or returned when packet 1 fails to authenticate.
    pub fn respond(
        &mut self,
        arena: &mut Arena,
        packet1: &Packet1,
    ) -> Result<(SessionKeyPair, Packet2), CryptoError> {
        if self.phase != HandshakePhase::Init {
            return Err(CryptoError::HandshakeState("respond requires a fresh responder"));
        }
        self.phase = HandshakePhase::Failed;

        let mut scope = arena.scope();
        let result = (|| {
            let packet1 = scope.stage(packet1.as_bytes())?;
            let packet2 = scope.reserve(sizes::KX_KK_PACKET2)?;
            let keys = SessionKeysHandle::reserve(&mut scope)?;
            self.cap.kx_kk_step2(
                &mut scope,
                keys,
                packet2,
                packet1,
                self.identity.keypair,
                self.identity.peer_public,
            )?;
            let session = read_session_keys(&scope, keys)?;
            Ok::<_, CryptoError>((session, Packet2(*scope.array(packet2)?)))
        })();

        match result {
            Ok(out) => {
                self.phase = HandshakePhase::Complete;
                debug!("responder sent packet 2, handshake complete");
                Ok(out)
            }
            Err(e) => {
                log_failure("responder", &e);
                Err(e)
            }
        }
    }
}

impl<C: CryptoCapability> fmt::Debug for Responder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
