//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

/// Relays used when the environment does not name any.
pub const DEFAULT_RELAYS: [&str; 5] = [
    "wss://relay.damus.io/",
    "wss://nos.lol/",
    "wss://relay.nostr.band/",
    "wss://offchain.pub/",
    "wss://nostr.wine/",
];

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory where per-user snapshot files are written.
    pub snapshot_root: PathBuf,
    /// Relays queried and published to.
    pub relays: Vec<String>,
    /// Optional SOCKS5 proxy (host:port).
    pub tor_socks: Option<String>,
    /// Quiescence window for live subscriptions and publish acknowledgments.
    pub quiet: Duration,
    /// Hex-encoded secret key, if configured.
    pub secret_key: Option<String>,
    /// Passphrase fallback; the secret becomes SHA-256 of it.
    pub passphrase: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let snapshot_root = PathBuf::from(env::var("SNAPSHOT_ROOT")?);
        // RELAYS unset falls back to the public defaults; RELAYS= (present
        // but empty) means deliberately offline.
        let relays = match env::var("RELAYS") {
            Ok(csv) => csv_strings(csv),
            Err(_) => DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
        };
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        let quiet_ms = env::var("QUIET_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2000u64);
        let secret_key = env::var("SECRET_KEY").ok().filter(|s| !s.is_empty());
        let passphrase = env::var("PASSPHRASE").ok().filter(|s| !s.is_empty());
        Ok(Self {
            snapshot_root,
            relays,
            tor_socks,
            quiet: Duration::from_millis(quiet_ms),
            secret_key,
            passphrase,
        })
    }

    /// Raw secret material for the signer and self-cipher: the decoded
    /// `SECRET_KEY`, or SHA-256 of `PASSPHRASE`.
    pub fn secret_bytes(&self) -> Result<Vec<u8>> {
        if let Some(hex_key) = &self.secret_key {
            return hex::decode(hex_key.trim()).context("SECRET_KEY is not valid hex");
        }
        if let Some(passphrase) = &self.passphrase {
            return Ok(Sha256::digest(passphrase.as_bytes()).to_vec());
        }
        bail!("no identity configured: set SECRET_KEY or PASSPHRASE")
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
