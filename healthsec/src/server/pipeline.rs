//! Request-side security pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage takes the
//! request context by value and either hands back an updated context or stops
//! the request with a [`Rejection`]. Nothing downstream of a rejection runs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::SecurityError;
use crate::response::ApiResponse;
use crate::server::cipher::{Envelope, PayloadCipher};
use crate::server::token::{Claims, TokenService};

/// Request-scoped identity derived from a verified token. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: String,
}

impl From<Claims> for IdentityContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.subject,
            role: claims.role,
        }
    }
}

/// What the stages thread through: the transport bits they read, plus what
/// they attach.
#[derive(Debug, Default)]
pub struct RequestContext {
    authorization: Option<String>,
    raw_body: Vec<u8>,
    body: Option<serde_json::Value>,
    identity: Option<IdentityContext>,
}

impl RequestContext {
    pub fn new(authorization: Option<String>, raw_body: Vec<u8>) -> Self {
        Self {
            authorization,
            raw_body,
            body: None,
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<&IdentityContext> {
        self.identity.as_ref()
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    /// Identity and decrypted body for the handler. The raw token and the raw
    /// body are dropped here.
    pub fn into_parts(self) -> (Option<IdentityContext>, Option<serde_json::Value>) {
        (self.identity, self.body)
    }
}

/// Terminal outcome of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    error: SecurityError,
}

impl Rejection {
    /// The specific kind is logged here and kept for diagnostics; callers only
    /// ever see its merged status and message.
    pub fn new(error: SecurityError) -> Self {
        error.log_security_event();
        Self { error }
    }

    pub fn status(&self) -> u16 {
        self.error.status_code()
    }

    pub fn error(&self) -> &SecurityError {
        &self.error
    }

    pub fn to_response(&self) -> ApiResponse<()> {
        ApiResponse::failure(self.error.public_message())
    }
}

impl From<SecurityError> for Rejection {
    fn from(error: SecurityError) -> Self {
        Rejection::new(error)
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, ctx: RequestContext) -> Result<RequestContext, Rejection>;
}

/// Verifies `Authorization: Bearer <token>` and attaches the identity.
pub struct AuthenticationStage {
    tokens: Arc<TokenService>,
}

impl AuthenticationStage {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn apply(&self, mut ctx: RequestContext) -> Result<RequestContext, Rejection> {
        let token = bearer_token(ctx.authorization.as_deref())?;

        let claims = self.tokens.verify(token).map_err(|e| {
            // every verification failure looks the same from outside
            debug_assert!(e.is_unauthenticated());
            Rejection::new(e)
        })?;

        tracing::debug!("Authenticated request for subject {}", claims.subject);
        ctx.identity = Some(IdentityContext::from(claims));
        ctx.authorization = None;
        Ok(ctx)
    }
}

fn bearer_token(header: Option<&str>) -> Result<&str, Rejection> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(header) = header else {
        return Err(Rejection::new(SecurityError::MissingToken));
    };

    let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(Rejection::new(SecurityError::TokenMalformed));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(Rejection::new(SecurityError::MissingToken));
    }
    Ok(token)
}

/// Replaces the raw envelope body with the decrypted JSON payload.
pub struct DecryptionStage {
    cipher: PayloadCipher,
}

impl DecryptionStage {
    pub fn new(cipher: PayloadCipher) -> Self {
        Self { cipher }
    }
}

impl Stage for DecryptionStage {
    fn name(&self) -> &'static str {
        "decrypt"
    }

    fn apply(&self, mut ctx: RequestContext) -> Result<RequestContext, Rejection> {
        if ctx.raw_body.is_empty() {
            return Err(Rejection::new(SecurityError::Decode("empty body".into())));
        }

        let envelope = Envelope::from_json_slice(&ctx.raw_body)?;
        let payload: serde_json::Value = self.cipher.decrypt_json(&envelope)?;

        ctx.raw_body = Vec::new();
        ctx.body = Some(payload);
        Ok(ctx)
    }
}

/// Ordered stages for one route.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, stopping at the first rejection.
    pub fn run(&self, ctx: RequestContext) -> Result<RequestContext, Rejection> {
        self.stages.iter().try_fold(ctx, |ctx, stage| {
            stage.apply(ctx).inspect_err(|rejection| {
                tracing::debug!("Stage '{}' rejected request with {}", stage.name(), rejection.status());
            })
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedSecret;
    use crate::server::token::ManualClock;
    use std::time::Duration;

    struct Fixture {
        cipher: PayloadCipher,
        tokens: Arc<TokenService>,
        auth: Arc<AuthenticationStage>,
        decrypt: Arc<DecryptionStage>,
    }

    fn fixture() -> Fixture {
        let secret = SharedSecret::generate();
        let cipher = PayloadCipher::new(&secret);
        let tokens = Arc::new(TokenService::with_clock(&secret, Arc::new(ManualClock::new(1_000))));
        Fixture {
            auth: Arc::new(AuthenticationStage::new(tokens.clone())),
            decrypt: Arc::new(DecryptionStage::new(cipher.clone())),
            cipher,
            tokens,
        }
    }

    fn bearer(f: &Fixture) -> String {
        let token = f.tokens.issue("u7", "User", Duration::from_secs(60)).unwrap();
        format!("Bearer {}", token.as_str())
    }

    #[test]
    fn missing_header_is_missing_token() {
        let f = fixture();
        let err = f.auth.apply(RequestContext::new(None, Vec::new())).unwrap_err();
        assert_eq!(err.error(), &SecurityError::MissingToken);
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn bare_scheme_is_missing_token() {
        let f = fixture();
        let err = f
            .auth
            .apply(RequestContext::new(Some("Bearer ".into()), Vec::new()))
            .unwrap_err();
        assert_eq!(err.error(), &SecurityError::MissingToken);
    }

    #[test]
    fn other_scheme_is_rejected() {
        let f = fixture();
        let err = f
            .auth
            .apply(RequestContext::new(Some("Basic dXNlcjpwdw==".into()), Vec::new()))
            .unwrap_err();
        assert_eq!(err.error(), &SecurityError::TokenMalformed);
        assert_eq!(err.to_response().message, "Unauthenticated");
    }

    #[test]
    fn valid_token_attaches_identity() {
        let f = fixture();
        let ctx = f
            .auth
            .apply(RequestContext::new(Some(bearer(&f)), Vec::new()))
            .unwrap();
        let identity = ctx.identity().unwrap();
        assert_eq!(identity.user_id, "u7");
        assert_eq!(identity.role, "User");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let f = fixture();
        let header = bearer(&f).replacen("Bearer", "bearer", 1);
        assert!(f.auth.apply(RequestContext::new(Some(header), Vec::new())).is_ok());
    }

    #[test]
    fn decryption_replaces_body() {
        let f = fixture();
        let envelope = f.cipher.encrypt_json(&serde_json::json!({"email": "a@b.c"})).unwrap();
        let raw = serde_json::to_vec(&envelope).unwrap();

        let ctx = f.decrypt.apply(RequestContext::new(None, raw)).unwrap();
        assert_eq!(ctx.body().unwrap()["email"], "a@b.c");
    }

    #[test]
    fn plaintext_body_is_rejected_as_bad_request() {
        let f = fixture();
        let err = f
            .decrypt
            .apply(RequestContext::new(None, br#"{"email":"a@b.c"}"#.to_vec()))
            .unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(err.to_response().message, "Invalid request payload");
    }

    #[test]
    fn empty_body_is_rejected() {
        let f = fixture();
        let err = f.decrypt.apply(RequestContext::new(None, Vec::new())).unwrap_err();
        assert!(matches!(err.error(), SecurityError::Decode(_)));
    }

    #[test]
    fn pipeline_short_circuits_before_decryption() {
        let f = fixture();
        let pipeline = Pipeline::new()
            .with_stage(f.auth.clone())
            .with_stage(f.decrypt.clone());

        // garbage body never reaches the decryption stage
        let err = pipeline
            .run(RequestContext::new(None, b"garbage".to_vec()))
            .unwrap_err();
        assert_eq!(err.error(), &SecurityError::MissingToken);
    }

    #[test]
    fn full_pipeline_yields_identity_and_body() {
        let f = fixture();
        let pipeline = Pipeline::new()
            .with_stage(f.auth.clone())
            .with_stage(f.decrypt.clone());
        let envelope = f.cipher.encrypt_json(&serde_json::json!({"calories": 420})).unwrap();

        let ctx = pipeline
            .run(RequestContext::new(Some(bearer(&f)), serde_json::to_vec(&envelope).unwrap()))
            .unwrap();
        let (identity, body) = ctx.into_parts();
        assert_eq!(identity.unwrap().user_id, "u7");
        assert_eq!(body.unwrap()["calories"], 420);
    }

    #[test]
    fn empty_pipeline_passes_through() {
        let ctx = Pipeline::new().run(RequestContext::new(None, Vec::new())).unwrap();
        assert!(ctx.identity().is_none());
        assert!(ctx.body().is_none());
    }
}
