use thiserror::Error;

pub type SecurityResult<T> = Result<T, SecurityError>;

/// Every failure the security boundary can produce.
///
/// The variant is for internal logging only. Callers only ever see
/// [`SecurityError::public_message`] and [`SecurityError::status_code`], which
/// merge kinds that an attacker must not be able to tell apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("envelope is malformed: {0}")]
    Decode(String),

    #[error("envelope failed its integrity check")]
    Integrity,

    #[error("bearer token is malformed")]
    TokenMalformed,

    #[error("bearer token signature does not match")]
    TokenInvalidSignature,

    #[error("bearer token has expired")]
    TokenExpired,

    #[error("bearer token missing")]
    MissingToken,

    #[error("credential does not match")]
    HashVerificationFailure,

    #[error("stored credential hash is corrupt: {0}")]
    HashCorrupt(String),

    #[error("invalid security configuration: {0}")]
    Config(String),

    #[error("internal cryptographic failure: {0}")]
    Internal(String),
}

impl SecurityError {
    pub fn status_code(&self) -> u16 {
        match self {
            SecurityError::Decode(_) | SecurityError::Integrity => 400,
            SecurityError::TokenMalformed
            | SecurityError::TokenInvalidSignature
            | SecurityError::TokenExpired
            | SecurityError::MissingToken
            | SecurityError::HashVerificationFailure => 401,
            SecurityError::HashCorrupt(_)
            | SecurityError::Config(_)
            | SecurityError::Internal(_) => 500,
        }
    }

    /// The only text that may leave the process.
    pub fn public_message(&self) -> &'static str {
        match self {
            SecurityError::Decode(_) | SecurityError::Integrity => "Invalid request payload",
            SecurityError::TokenMalformed
            | SecurityError::TokenInvalidSignature
            | SecurityError::TokenExpired
            | SecurityError::MissingToken => "Unauthenticated",
            SecurityError::HashVerificationFailure => "Invalid email or password",
            SecurityError::HashCorrupt(_)
            | SecurityError::Config(_)
            | SecurityError::Internal(_) => "Internal server error",
        }
    }

    /// True for the token family, which the authentication stage collapses
    /// into a single outcome.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            SecurityError::TokenMalformed
                | SecurityError::TokenInvalidSignature
                | SecurityError::TokenExpired
                | SecurityError::MissingToken
        )
    }

    /// Log the error with appropriate security context
    pub fn log_security_event(&self) {
        match self {
            SecurityError::Integrity => {
                tracing::warn!("Envelope integrity check failed - possible tampering or wrong key");
            }
            SecurityError::Decode(reason) => {
                tracing::warn!("Malformed envelope received: {}", reason);
            }
            SecurityError::TokenInvalidSignature => {
                tracing::warn!("SECURITY: bearer token signature mismatch - possible forgery");
            }
            SecurityError::TokenMalformed => {
                tracing::warn!("Malformed bearer token presented");
            }
            SecurityError::TokenExpired => {
                tracing::debug!("Expired bearer token presented");
            }
            SecurityError::MissingToken => {
                tracing::debug!("Request without bearer token on protected route");
            }
            SecurityError::HashVerificationFailure => {
                tracing::info!("Credential verification failed");
            }
            SecurityError::HashCorrupt(reason) => {
                tracing::error!("Stored credential hash is corrupt: {}", reason);
            }
            SecurityError::Config(reason) => {
                tracing::error!("Security configuration error: {}", reason);
            }
            SecurityError::Internal(reason) => {
                tracing::error!("Cryptographic primitive failed: {}", reason);
            }
        }
    }
}
