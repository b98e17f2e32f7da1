use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::config::SharedSecret;
use crate::error::{SecurityError, SecurityResult};

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Hand-driven clock, shared between clones. Lets tests step time forward.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self { now: Arc::new(AtomicI64::new(start)) }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Signed (not encrypted) identity carried inside a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub")]
    pub subject: String,    // user identifier
    pub role: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,     // unix seconds
    #[serde(rename = "exp")]
    pub expires_at: i64,    // unix seconds
}

/// Opaque bearer credential: `header.claims.signature`, base64url segments.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn from_string(raw: impl Into<String>) -> Self {
        Token(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the full credential
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "Token({}...)", prefix)
    }
}

/// Issues and verifies HS256 bearer tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(secret: &SharedSecret) -> Self {
        Self::with_clock(secret, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: &SharedSecret, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against our own clock, strictly and without leeway
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.signing_key()),
            decoding_key: DecodingKey::from_secret(secret.signing_key()),
            validation,
            clock,
        }
    }

    pub fn issue(&self, subject: &str, role: &str, ttl: Duration) -> SecurityResult<Token> {
        let now = self.clock.now();
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| SecurityError::Internal("token ttl out of range".into()))?;

        let claims = Claims {
            subject: subject.to_string(),
            role: role.to_string(),
            issued_at: now,
            expires_at: now.saturating_add(ttl_secs),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SecurityError::Internal(format!("token signing failed: {}", e)))?;

        tracing::debug!("Issued token for subject {} (role: {}, ttl: {}s)", subject, role, ttl_secs);
        Ok(Token(token))
    }

    /// Check signature, then expiry (`now >= exp` is expired).
    pub fn verify(&self, token: &str) -> SecurityResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => SecurityError::TokenInvalidSignature,
                _ => SecurityError::TokenMalformed,
            }
        })?;

        if self.clock.now() >= data.claims.expires_at {
            return Err(SecurityError::TokenExpired);
        }

        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &"HS256")
            .field("now", &self.clock.now())
            .finish()
    }
}
