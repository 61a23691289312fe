//! Runtime configuration shared by the core and the harness.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

// The constants below mirror `sluice_crypto::Arena::DEFAULT_CAPACITY` and
// `sluice_crypto::sizes::{HASH_MIN, HASH_MAX, CONTEXT}`; this crate sits
// below sluice-crypto and cannot import them. sluice-crypto tests keep
// them in sync.

/// Default arena capacity in bytes.
pub const DEFAULT_ARENA_CAPACITY: usize = 64 * 1024;

/// Smallest arena able to hold a full handshake: static key pair, peer
/// public key, one packet and the derived session keys.
pub const MIN_ARENA_CAPACITY: usize = 256;

/// Default digest length for generic hashing.
pub const DEFAULT_HASH_LEN: usize = 32;

/// Digest length bounds accepted by the hash primitive.
pub const HASH_LEN_MIN: usize = 16;
pub const HASH_LEN_MAX: usize = 65535;

/// Context tags are fixed 8-byte identifiers.
pub const CONTEXT_LEN: usize = 8;

const DEFAULT_CONTEXT: &str = "Examples";
const DEFAULT_EXPORT_DIR: &str = "keys";

/// Configuration for a bridge run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Fixed capacity of the marshalling arena
    pub arena_capacity: usize,

    /// Digest length for `hash` scenarios
    pub hash_len: usize,

    /// Destination directory for exported key material
    pub export_dir: PathBuf,

    /// Domain-separation tag used when the caller does not supply one
    pub context: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            hash_len: DEFAULT_HASH_LEN,
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            context: DEFAULT_CONTEXT.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Build a config from defaults overridden by `SLUICE_*` environment variables.
    ///
    /// Recognised variables: `SLUICE_ARENA_CAPACITY`, `SLUICE_HASH_BYTES`,
    /// `SLUICE_EXPORT_DIR`, `SLUICE_CONTEXT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(capacity) = env_usize("SLUICE_ARENA_CAPACITY")? {
            debug!(capacity, "arena capacity from SLUICE_ARENA_CAPACITY");
            config.arena_capacity = capacity;
        }
        if let Some(hash_len) = env_usize("SLUICE_HASH_BYTES")? {
            debug!(hash_len, "hash length from SLUICE_HASH_BYTES");
            config.hash_len = hash_len;
        }
        if let Ok(dir) = std::env::var("SLUICE_EXPORT_DIR") {
            debug!(dir = %dir, "export dir from SLUICE_EXPORT_DIR");
            config.export_dir = PathBuf::from(dir);
        }
        if let Ok(context) = std::env::var("SLUICE_CONTEXT") {
            debug!(context = %context, "context from SLUICE_CONTEXT");
            config.context = context;
        }

        Ok(config)
    }

    /// Check every setting the core depends on.
    pub fn validate(&self) -> Result<()> {
        if self.arena_capacity < MIN_ARENA_CAPACITY {
            return Err(Error::config(format!(
                "arena capacity {} is below the minimum of {} bytes",
                self.arena_capacity, MIN_ARENA_CAPACITY
            )));
        }

        if !(HASH_LEN_MIN..=HASH_LEN_MAX).contains(&self.hash_len) {
            return Err(Error::config(format!(
                "hash length {} outside {}..={}",
                self.hash_len, HASH_LEN_MIN, HASH_LEN_MAX
            )));
        }

        if self.context.len() != CONTEXT_LEN {
            return Err(Error::config(format!(
                "context {:?} must be exactly {} bytes",
                self.context, CONTEXT_LEN
            )));
        }

        Ok(())
    }

    /// Create the export directory if needed and return it.
    ///
    /// An unusable destination is a configuration error, not an I/O one:
    /// nothing has been exported yet.
    pub fn prepare_export_dir(&self) -> Result<&Path> {
        if !self.export_dir.exists() {
            debug!(dir = %self.export_dir.display(), "creating export dir");
        }
        std::fs::create_dir_all(&self.export_dir).map_err(|e| {
            Error::config(format!(
                "failed to create export dir {}: {}",
                self.export_dir.display(),
                e
            ))
        })?;

        if !self.export_dir.is_dir() {
            return Err(Error::config(format!(
                "export path {} is not a directory",
                self.export_dir.display()
            )));
        }

        Ok(&self.export_dir)
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(format!("{name}={value:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
