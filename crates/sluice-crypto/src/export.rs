//! Key-material export.
//!
//! Writes each half of a key pair straight from its arena buffer in two
//! encodings:
//!
//! - a C source array (`static uint8_t pub_key[] = { 0x.., ... };`),
//!   sixteen values per line
//! - bare lowercase hex with no prefix or separators
//!
//! Every file is attempted independently. A failed write is recorded in
//! the [`ExportReport`] and does not stop the remaining files.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::arena::Arena;
use crate::capability::KeyPairHandle;
use crate::error::CryptoError;

const VALUES_PER_LINE: usize = 16;

/// A single file that could not be written.
#[derive(Debug, Error)]
#[error("failed to write {}: {source}", .path.display())]
pub struct ExportError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Outcome of an export run.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<ExportError>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// File stems and C symbol names for the two halves of a key pair.
#[derive(Debug, Clone, Copy)]
pub struct KeyFileNames<'a> {
    pub public_stem: &'a str,
    pub public_symbol: &'a str,
    pub secret_stem: &'a str,
    pub secret_symbol: &'a str,
}

/// `pubKey.{h,hex}` / `privKey.{h,hex}` with symbols `pub_key` / `priv_key`.
pub const SIGN_KEY_FILES: KeyFileNames<'static> = KeyFileNames {
    public_stem: "pubKey",
    public_symbol: "pub_key",
    secret_stem: "privKey",
    secret_symbol: "priv_key",
};

/// Render `bytes` as a C array definition named `name`.
pub fn render_c_array(name: &str, bytes: &[u8]) -> String {
    let mut out = String::with_capacity(32 + bytes.len() * 7);
    // Writing to a String cannot fail
    let _ = writeln!(out, "static uint8_t {name}[] = {{");
    for (i, byte) in bytes.iter().enumerate() {
        let _ = write!(out, "0x{byte:02x}, ");
        if (i + 1) % VALUES_PER_LINE == 0 {
            out.push('\n');
        }
    }
    out.push_str("};\n");
    out
}

/// Lowercase hex, no prefix or separators.
pub fn render_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Export a signing key pair as `pubKey.h`, `privKey.h`, `pubKey.hex`
/// and `privKey.hex` in `dir`.
pub fn export_sign_keypair(
    arena: &Arena,
    keypair: KeyPairHandle,
    dir: &Path,
) -> Result<ExportReport, CryptoError> {
    export_keypair(arena, keypair, dir, &SIGN_KEY_FILES)
}

/// Export any key pair under the given names.
///
/// Returns `Err` only if the arena buffers are unusable, before anything
/// is written. I/O failures are reported per file in the report.
pub fn export_keypair(
    arena: &Arena,
    keypair: KeyPairHandle,
    dir: &Path,
    names: &KeyFileNames<'_>,
) -> Result<ExportReport, CryptoError> {
    let public = arena.bytes(keypair.public)?;
    let secret = arena.bytes(keypair.secret)?;

    let files = [
        (
            dir.join(format!("{}.h", names.public_stem)),
            Zeroizing::new(render_c_array(names.public_symbol, public)),
            false,
        ),
        (
            dir.join(format!("{}.h", names.secret_stem)),
            Zeroizing::new(render_c_array(names.secret_symbol, secret)),
            true,
        ),
        (
            dir.join(format!("{}.hex", names.public_stem)),
            Zeroizing::new(render_hex(public)),
            false,
        ),
        (
            dir.join(format!("{}.hex", names.secret_stem)),
            Zeroizing::new(render_hex(secret)),
            true,
        ),
    ];

    let mut report = ExportReport::default();
    for (path, contents, private) in files {
        match write_file(&path, contents.as_bytes(), private) {
            Ok(()) => {
                info!("Created {}", path.display());
                report.written.push(path);
            }
            Err(source) => {
                warn!(path = %path.display(), error = %source, "key export failed");
                report.failed.push(ExportError { path, source });
            }
        }
    }

    Ok(report)
}

/// Write `contents`; secret files are restricted to the owner on Unix.
fn write_file(path: &Path, contents: &[u8], private: bool) -> io::Result<()> {
    fs::write(path, contents)?;

    #[cfg(unix)]
    {
        if private {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    Ok(())
}
