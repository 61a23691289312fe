//! Sluice CLI: runs each crypto scenario once against a fresh arena.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use sluice_common::helpers::constant_time_eq;
use sluice_common::BridgeConfig;
use sluice_crypto::{
    export_sign_keypair, ops, sizes, Arena, Context, CryptoCapability, HashKey, Initiator,
    KeyPairHandle, KxIdentity, NativeCapability, Responder, SecureChannel, SignPublicKey,
};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(about = "Sluice crypto scenario harness")]
struct Args {
    /// Arena capacity in bytes
    #[arg(long, global = true, env = "SLUICE_ARENA_CAPACITY")]
    arena_capacity: Option<usize>,

    /// 8-byte context tag
    #[arg(long, global = true, env = "SLUICE_CONTEXT")]
    context: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Draw random values
    Random {
        /// Exclusive upper bound for the uniform draw
        #[arg(long, default_value_t = 20)]
        bound: u32,

        /// Number of random bytes to print
        #[arg(long, default_value_t = 32)]
        bytes: usize,
    },

    /// Unkeyed hash of a message
    Hash {
        message: String,

        /// Digest length
        #[arg(long, env = "SLUICE_HASH_BYTES")]
        len: Option<usize>,
    },

    /// Keyed hash of a message
    KeyedHash {
        message: String,

        /// Hash key as hex; a fresh key is generated if omitted
        #[arg(long)]
        key: Option<String>,

        /// Expected digest as hex, compared in constant time
        #[arg(long)]
        expect: Option<String>,
    },

    /// Sign a message with a fresh key pair and verify it
    Sign { message: String },

    /// Verify a signature
    Verify {
        message: String,

        /// Signer public key as hex
        #[arg(long)]
        public: String,

        /// Signature as hex
        #[arg(long)]
        signature: String,
    },

    /// Secretbox round trip with a fresh key
    Aead {
        message: String,

        #[arg(long, default_value_t = 0)]
        msg_id: u64,
    },

    /// Run a KK handshake between two local parties and exchange a message
    Handshake {
        #[arg(default_value = "Hello from the initiator")]
        message: String,
    },

    /// Generate a signing key pair and export it as .h and .hex files
    Keygen {
        /// Destination directory
        #[arg(env = "SLUICE_EXPORT_DIR")]
        dir: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[derive(Serialize)]
struct KeygenReport {
    public_key: String,
    written: Vec<String>,
    failed: Vec<String>,
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::from_env()?;
    if let Some(capacity) = args.arena_capacity {
        config.arena_capacity = capacity;
    }
    if let Some(context) = &args.context {
        config.context = context.clone();
    }
    if let Command::Hash { len: Some(len), .. } = &args.command {
        config.hash_len = *len;
    }
    if let Command::Keygen { dir: Some(dir) } = &args.command {
        config.export_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn emit(as_json: bool, report: &Value) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if let Value::Object(fields) = report {
        for (name, value) in fields {
            match value {
                Value::String(s) => println!("{name}: {s}"),
                other => println!("{name}: {other}"),
            }
        }
    }
    Ok(())
}

fn parse_hex<const N: usize>(what: &str, s: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s.trim()).with_context(|| format!("{what} is not valid hex"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("{what}: expected {N} bytes, got {}", b.len()))
}

fn main() -> Result<()> {
    sluice_common::init_tracing();

    let args = Args::parse();
    let config = load_config(&args)?;
    debug!(?config, "loaded configuration");

    let cap = NativeCapability::new();
    let mut arena = Arena::new(config.arena_capacity);
    let ctx = Context::new(&config.context)?;

    let report = match args.command {
        Command::Random { bound, bytes } => {
            let value = ops::random_uniform(&cap, bound);
            let buf = ops::random_bytes(&cap, &mut arena, bytes)?;
            json!({
                "uniform": value,
                "bound": bound,
                "bytes": hex::encode(buf),
            })
        }
        Command::Hash { message, .. } => {
            let digest = ops::hash(&cap, &mut arena, &ctx, message.as_bytes(), None, config.hash_len)?;
            json!({
                "context": config.context,
                "hash": hex::encode(digest),
            })
        }
        Command::KeyedHash {
            message,
            key,
            expect,
        } => {
            let key = match key {
                Some(hex) => HashKey::from_hex(&hex)?,
                None => ops::hash_keygen(&cap, &mut arena)?,
            };
            let digest =
                ops::hash(&cap, &mut arena, &ctx, message.as_bytes(), Some(&key), config.hash_len)?;

            let mut report = json!({
                "key": hex::encode(key.as_bytes()),
                "hash": hex::encode(&digest),
            });
            if let Some(expected) = expect {
                let expected = hex::decode(expected.trim()).context("--expect is not valid hex")?;
                report["matches"] = Value::Bool(constant_time_eq(&digest, &expected));
            }
            report
        }
        Command::Sign { message } => {
            let keypair = ops::sign_keygen(&cap, &mut arena)?;
            let sig = ops::sign(&cap, &mut arena, &ctx, message.as_bytes(), &keypair)?;
            let valid = ops::verify(
                &cap,
                &mut arena,
                &ctx,
                message.as_bytes(),
                &sig,
                &keypair.public_key(),
            )?;

            let mut tampered = sig;
            tampered[0] ^= 0x01;
            let tampered_valid = ops::verify(
                &cap,
                &mut arena,
                &ctx,
                message.as_bytes(),
                &tampered,
                &keypair.public_key(),
            )?;

            json!({
                "public_key": hex::encode(keypair.public_bytes()),
                "signature": hex::encode(sig),
                "valid": valid,
                "tampered_valid": tampered_valid,
            })
        }
        Command::Verify {
            message,
            public,
            signature,
        } => {
            let public = SignPublicKey::from_hex(&public)?;
            let sig = parse_hex::<{ sizes::SIGN }>("signature", &signature)?;
            let valid = ops::verify(&cap, &mut arena, &ctx, message.as_bytes(), &sig, &public)?;
            json!({ "valid": valid })
        }
        Command::Aead { message, msg_id } => {
            let key = ops::secretbox_keygen(&cap, &mut arena)?;
            let sealed = ops::encrypt(&cap, &mut arena, &ctx, &key, msg_id, message.as_bytes())?;
            let opened = ops::decrypt(&cap, &mut arena, &ctx, &key, msg_id, &sealed)?;

            let wrong_id = msg_id.wrapping_add(1);
            let rejected = match ops::decrypt(&cap, &mut arena, &ctx, &key, wrong_id, &sealed) {
                Err(e) if e.is_authentication_failure() => true,
                Err(e) => return Err(e.into()),
                Ok(_) => false,
            };

            json!({
                "msg_id": msg_id,
                "ciphertext": hex::encode(&sealed),
                "plaintext": String::from_utf8_lossy(&opened),
                "wrong_id_rejected": rejected,
            })
        }
        Command::Handshake { message } => handshake(&cap, &config, ctx, &message)?,
        Command::Keygen { .. } => {
            let dir = config.prepare_export_dir()?;

            let mut scope = arena.scope();
            let keypair =
                KeyPairHandle::reserve(&mut scope, sizes::SIGN_PUBLIC_KEY, sizes::SIGN_SECRET_KEY)?;
            cap.sign_keygen(&mut scope, keypair)?;
            let export = export_sign_keypair(&scope, keypair, dir)?;

            let report = KeygenReport {
                public_key: hex::encode(scope.bytes(keypair.public)?),
                written: export.written.iter().map(|p| p.display().to_string()).collect(),
                failed: export.failed.iter().map(|e| e.to_string()).collect(),
            };
            drop(scope);

            emit(args.json, &serde_json::to_value(&report)?)?;
            if !export.is_complete() {
                bail!("{} of 4 key files could not be written", export.failed.len());
            }
            return Ok(());
        }
        Command::Version => {
            println!("sluice {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };

    emit(args.json, &report)
}

/// Two parties, each with its own arena, run the handshake and exchange
/// one message in each direction.
fn handshake(cap: &NativeCapability, config: &BridgeConfig, ctx: Context, message: &str) -> Result<Value> {
    let mut alice_arena = Arena::new(config.arena_capacity);
    let mut bob_arena = Arena::new(config.arena_capacity);

    let alice_kp = ops::kx_keygen(cap, &mut alice_arena)?;
    let bob_kp = ops::kx_keygen(cap, &mut bob_arena)?;

    let alice_id = KxIdentity::stage(&mut alice_arena, &alice_kp, bob_kp.public_bytes())?;
    let bob_id = KxIdentity::stage(&mut bob_arena, &bob_kp, alice_kp.public_bytes())?;

    let mut initiator = Initiator::new(*cap, alice_id);
    let mut responder = Responder::new(*cap, bob_id);

    let packet1 = initiator.start(&mut alice_arena)?;
    let (bob_keys, packet2) = responder.respond(&mut bob_arena, &packet1)?;
    let alice_keys = initiator.finish(&mut alice_arena, &packet2)?;

    let keys_match = alice_keys.tx().as_bytes() == bob_keys.rx().as_bytes()
        && alice_keys.rx().as_bytes() == bob_keys.tx().as_bytes();
    info!(keys_match, "handshake complete");

    let mut alice = SecureChannel::new(alice_keys, ctx);
    let mut bob = SecureChannel::new(bob_keys, ctx);

    let to_bob = alice.encrypt(cap, &mut alice_arena, message.as_bytes())?;
    let received = bob.decrypt(cap, &mut bob_arena, to_bob.msg_id, &to_bob.ciphertext)?;

    let reply = bob.encrypt(cap, &mut bob_arena, b"ack")?;
    let acked = alice.decrypt(cap, &mut alice_arena, reply.msg_id, &reply.ciphertext)?;

    let replay_rejected = bob
        .decrypt(cap, &mut bob_arena, to_bob.msg_id, &to_bob.ciphertext)
        .is_err();

    Ok(json!({
        "packet1": hex::encode(packet1.as_bytes()),
        "packet2": hex::encode(packet2.as_bytes()),
        "keys_match": keys_match,
        "received": String::from_utf8_lossy(&received),
        "reply": String::from_utf8_lossy(&acked),
        "replay_rejected": replay_rejected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_fall_back_to_env() {
        // Only test in this binary that touches SLUICE_* variables
        std::env::set_var("SLUICE_CONTEXT", "Envctx01");
        std::env::set_var("SLUICE_HASH_BYTES", "48");

        let args = Args::try_parse_from(["sluice", "hash", "msg"]).unwrap();
        assert_eq!(args.context.as_deref(), Some("Envctx01"));
        let config = load_config(&args).unwrap();
        assert_eq!(config.context, "Envctx01");
        assert_eq!(config.hash_len, 48);

        let args =
            Args::try_parse_from(["sluice", "--context", "Flagctx1", "hash", "msg", "--len", "20"])
                .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.context, "Flagctx1");
        assert_eq!(config.hash_len, 20);

        std::env::remove_var("SLUICE_CONTEXT");
        std::env::remove_var("SLUICE_HASH_BYTES");
    }

    #[test]
    fn test_parse_hex_length_checked() {
        assert_eq!(parse_hex::<2>("key", "abcd").unwrap(), [0xab, 0xcd]);
        assert!(parse_hex::<2>("key", "abcdef").is_err());
        assert!(parse_hex::<2>("key", "zz").is_err());
    }
}
