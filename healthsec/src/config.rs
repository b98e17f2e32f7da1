//! Process-wide security configuration.
//!
//! Key material is loaded exactly once at startup into a [`SharedSecret`] and
//! handed by reference to every component constructor. Nothing in this crate
//! looks secrets up from ambient state after that point.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL_SAFE};
use rand::RngCore;
use rand::rngs::OsRng;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{SecurityError, SecurityResult};
use crate::server::hasher::HashCost;

pub const PAYLOAD_KEY_SIZE: usize = 32;
pub const MIN_SIGNING_KEY_SIZE: usize = 32;

const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Symmetric key for the payload cipher plus the MAC key for bearer tokens.
///
/// Deliberately not `Serialize` and not `Clone`; `Debug` prints nothing secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    payload_key: [u8; PAYLOAD_KEY_SIZE],
    signing_key: Vec<u8>,
}

impl SharedSecret {
    pub fn new(payload_key: [u8; PAYLOAD_KEY_SIZE], signing_key: Vec<u8>) -> SecurityResult<Self> {
        if signing_key.len() < MIN_SIGNING_KEY_SIZE {
            return Err(SecurityError::Config(format!(
                "signing key must be at least {} bytes, got {}",
                MIN_SIGNING_KEY_SIZE,
                signing_key.len()
            )));
        }
        Ok(Self { payload_key, signing_key })
    }

    /// Fresh random key material from the OS RNG.
    pub fn generate() -> Self {
        let mut payload_key = [0u8; PAYLOAD_KEY_SIZE];
        OsRng.fill_bytes(&mut payload_key);
        Self {
            payload_key,
            signing_key: random_signing_key(),
        }
    }

    /// Decode both keys from URL-safe base64 (no padding).
    pub fn from_base64(payload_key_b64: &str, signing_key_b64: &str) -> SecurityResult<Self> {
        let payload_key = decode_payload_key(payload_key_b64)?;
        let signing_key = BASE64_URL_SAFE
            .decode(signing_key_b64.trim())
            .map_err(|_| SecurityError::Config("signing key is not valid base64url".into()))?;
        Self::new(payload_key, signing_key)
    }

    pub(crate) fn payload_key(&self) -> &[u8; PAYLOAD_KEY_SIZE] {
        &self.payload_key
    }

    pub(crate) fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("payload_key", &"<redacted>")
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Everything the security core needs, read once at process start.
#[derive(Debug)]
pub struct SecurityConfig {
    pub secret: SharedSecret,
    pub token_ttl: Duration,
    pub hash_cost: HashCost,
}

impl SecurityConfig {
    pub fn new(secret: SharedSecret) -> Self {
        Self {
            secret,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            hash_cost: HashCost::default(),
        }
    }

    /// Create from environment variables
    ///
    /// - `HEALTH_PAYLOAD_KEY`: required, base64url, 32 bytes
    /// - `HEALTH_SIGNING_KEY`: optional, base64url, at least 32 bytes
    /// - `HEALTH_TOKEN_TTL_SECS`: token lifetime (default 3600)
    /// - `HEALTH_HASH_MEMORY_KIB`, `HEALTH_HASH_ITERATIONS`,
    ///   `HEALTH_HASH_PARALLELISM`: Argon2id cost (memory at most 256 MiB)
    pub fn from_env() -> SecurityResult<Self> {
        let payload_b64 = std::env::var("HEALTH_PAYLOAD_KEY")
            .map_err(|_| SecurityError::Config("HEALTH_PAYLOAD_KEY is not set".into()))?;
        let payload_key = decode_payload_key(&payload_b64)?;

        let signing_key = match std::env::var("HEALTH_SIGNING_KEY") {
            Ok(b64) => BASE64_URL_SAFE
                .decode(b64.trim())
                .map_err(|_| SecurityError::Config("HEALTH_SIGNING_KEY is not valid base64url".into()))?,
            Err(_) => {
                tracing::warn!("HEALTH_SIGNING_KEY not set - generated a random signing key, tokens will not survive a restart");
                random_signing_key()
            }
        };

        let secret = SharedSecret::new(payload_key, signing_key)?;

        let token_ttl = Duration::from_secs(env_number("HEALTH_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?);

        let defaults = HashCost::default();
        let hash_cost = HashCost::new(
            env_number("HEALTH_HASH_MEMORY_KIB", defaults.memory_kib)?,
            env_number("HEALTH_HASH_ITERATIONS", defaults.iterations)?,
            env_number("HEALTH_HASH_PARALLELISM", defaults.parallelism)?,
        )?;

        tracing::info!(
            "Security configuration loaded (token ttl: {}s, argon2 m={} t={} p={})",
            token_ttl.as_secs(),
            hash_cost.memory_kib,
            hash_cost.iterations,
            hash_cost.parallelism
        );

        Ok(Self { secret, token_ttl, hash_cost })
    }
}

pub(crate) fn decode_payload_key(b64: &str) -> SecurityResult<[u8; PAYLOAD_KEY_SIZE]> {
    let bytes = BASE64_URL_SAFE
        .decode(b64.trim())
        .map_err(|_| SecurityError::Config("payload key is not valid base64url".into()))?;
    bytes.as_slice().try_into().map_err(|_| {
        SecurityError::Config(format!(
            "payload key must be {} bytes, got {}",
            PAYLOAD_KEY_SIZE,
            bytes.len()
        ))
    })
}

fn random_signing_key() -> Vec<u8> {
    let mut key = vec![0u8; 64];
    OsRng.fill_bytes(&mut key);
    key
}

fn env_number<T>(name: &str, default: T) -> SecurityResult<T>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SecurityError::Config(format!("{} must be a number", name))),
        Err(_) => Ok(default),
    }
}
