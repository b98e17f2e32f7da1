//! actix glue for the security boundary.
//!
//! The [`security_boundary`] middleware runs the per-route pipeline before any
//! handler and leaves its results in the request extensions. Handlers read
//! them through the [`Identity`] and [`Plain`] extractors and answer with
//! [`Sealed`], so every body that leaves the process is an envelope.

use actix_web::{
    Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, Responder, ResponseError,
    body::{BoxBody, MessageBody},
    dev::{Payload, ServiceRequest, ServiceResponse},
    http::{StatusCode, header},
    middleware::Next,
    web,
};
use serde::{Serialize, de::DeserializeOwned};
use std::future::{Ready, ready};
use std::sync::Arc;

use healthsec::server::cipher::{Envelope, PayloadCipher};
use healthsec::server::pipeline::{AuthenticationStage, DecryptionStage, IdentityContext, RequestContext};
use healthsec::server::policy::{PipelineComposer, RouteTable};
use healthsec::server::sealer::ResponseSealer;
use healthsec::server::token::TokenService;
use healthsec::{ApiResponse, FieldError, SecurityError, SharedSecret};

/// Shared across workers as `web::Data<Boundary>`.
pub struct Boundary {
    composer: PipelineComposer,
    sealer: ResponseSealer,
}

impl Boundary {
    pub fn new(secret: &SharedSecret, tokens: Arc<TokenService>, table: RouteTable) -> Self {
        let cipher = PayloadCipher::new(secret);
        Self {
            composer: PipelineComposer::new(
                AuthenticationStage::new(tokens),
                DecryptionStage::new(cipher.clone()),
                table,
            ),
            sealer: ResponseSealer::new(cipher),
        }
    }

    fn seal<T: Serialize>(&self, status: StatusCode, body: &ApiResponse<T>) -> HttpResponse {
        match self.sealer.seal(status.as_u16(), body) {
            Ok(sealed) => HttpResponse::build(status).json(sealed.envelope),
            Err(e) => {
                // nothing safe left to send
                tracing::error!("Failed to seal {} response: {}", status, e);
                HttpResponse::InternalServerError().finish()
            }
        }
    }
}

/// Returned for any shape mismatch; serde's own text can quote input values.
const BODY_SHAPE_MESSAGE: &str = "Request body is missing fields or has fields of the wrong type";

/// Decrypted request payload, parked in the request extensions.
#[derive(Debug, Clone)]
struct DecryptedBody(serde_json::Value);

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Seal `body` with the app's boundary.
pub fn sealed_response<T: Serialize>(req: &HttpRequest, status: StatusCode, body: &ApiResponse<T>) -> HttpResponse {
    match req.app_data::<web::Data<Boundary>>() {
        Some(boundary) => boundary.seal(status, body),
        None => {
            tracing::error!("Boundary not registered as app data, refusing to answer in clear");
            HttpResponse::InternalServerError().finish()
        }
    }
}

pub async fn security_boundary<B>(mut req: ServiceRequest, next: Next<B>) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: MessageBody + 'static,
{
    let Some(boundary) = req.app_data::<web::Data<Boundary>>().cloned() else {
        tracing::error!("Boundary not registered as app data");
        return Ok(req.into_response(HttpResponse::InternalServerError().finish()));
    };

    let method = req.method().as_str().to_string();
    // unmatched paths fall back to the strictest policy in the table
    let pattern = req.match_pattern().unwrap_or_else(|| req.path().to_string());
    let policy = boundary.composer.policy(&method, &pattern);
    let pipeline = boundary.composer.for_policy(policy);

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let raw_body = if policy.requires_decryption {
        match req.extract::<web::Bytes>().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                let error = SecurityError::Decode(format!("body read failed: {}", e));
                error.log_security_event();
                let response = boundary.seal(status(error.status_code()), &ApiResponse::<()>::failure(error.public_message()));
                return Ok(req.into_response(response));
            }
        }
    } else {
        Vec::new()
    };

    match pipeline.run(RequestContext::new(authorization, raw_body)) {
        Ok(ctx) => {
            let (identity, body) = ctx.into_parts();
            if let Some(identity) = identity {
                req.extensions_mut().insert(identity);
            }
            if let Some(body) = body {
                req.extensions_mut().insert(DecryptedBody(body));
            }
            next.call(req).await.map(ServiceResponse::map_into_boxed_body)
        }
        Err(rejection) => {
            tracing::info!("Rejected {} {} with {}", method, pattern, rejection.status());
            let response = boundary.seal(status(rejection.status()), &rejection.to_response());
            Ok(req.into_response(response))
        }
    }
}

/// Extractor failure that already carries its sealed reply.
#[derive(Debug)]
pub struct Rejected {
    status: StatusCode,
    envelope: Option<Envelope>,
}

impl Rejected {
    pub fn seal<T: Serialize>(req: &HttpRequest, status: StatusCode, body: &ApiResponse<T>) -> Self {
        let envelope = req
            .app_data::<web::Data<Boundary>>()
            .and_then(|boundary| boundary.sealer.seal(status.as_u16(), body).ok())
            .map(|sealed| sealed.envelope);
        Self { status, envelope }
    }

    fn internal(req: &HttpRequest, what: &str) -> Self {
        tracing::error!("{} missing from request extensions, is the route in the table?", what);
        Self::seal(req, StatusCode::INTERNAL_SERVER_ERROR, &ApiResponse::<()>::failure("Internal server error"))
    }
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request rejected with {}", self.status)
    }
}

impl ResponseError for Rejected {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        match &self.envelope {
            Some(envelope) => HttpResponse::build(self.status).json(envelope),
            None => HttpResponse::new(self.status),
        }
    }
}

/// Caller identity attached by the authentication stage.
#[derive(Debug, Clone)]
pub struct Identity(pub IdentityContext);

impl Identity {
    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }

    pub fn is_admin(&self) -> bool {
        self.0.role == "Admin"
    }
}

impl FromRequest for Identity {
    type Error = Rejected;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let identity = req.extensions().get::<IdentityContext>().cloned();
        ready(identity.map(Identity).ok_or_else(|| Rejected::internal(req, "IdentityContext")))
    }
}

/// Decrypted request body deserialized into `T`.
#[derive(Debug)]
pub struct Plain<T>(pub T);

impl<T: DeserializeOwned> FromRequest for Plain<T> {
    type Error = Rejected;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let body = req.extensions().get::<DecryptedBody>().map(|b| b.0.clone());
        let result = match body {
            Some(value) => serde_json::from_value(value).map(Plain).map_err(|e| {
                tracing::debug!("Decrypted body did not match the expected shape: {}", e);
                Rejected::seal(
                    req,
                    StatusCode::BAD_REQUEST,
                    &ApiResponse::<()>::validation(vec![FieldError::new("body", BODY_SHAPE_MESSAGE)]),
                )
            }),
            None => Err(Rejected::internal(req, "Decrypted body")),
        };
        ready(result)
    }
}

/// Handler reply: the status goes out in clear, the body as an envelope.
#[derive(Debug)]
pub struct Sealed<T = serde_json::Value> {
    status: StatusCode,
    body: ApiResponse<T>,
}

impl<T> Sealed<T> {
    pub fn new(status: StatusCode, body: ApiResponse<T>) -> Self {
        Self { status, body }
    }

    pub fn ok(body: ApiResponse<T>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, ApiResponse::failure(message))
    }

    /// Map a core error onto its public status and message.
    pub fn from_error(error: &SecurityError) -> Self {
        error.log_security_event();
        Self::failure(status(error.status_code()), error.public_message())
    }
}

impl<T: Serialize> Responder for Sealed<T> {
    type Body = BoxBody;

    fn respond_to(self, req: &HttpRequest) -> HttpResponse<Self::Body> {
        sealed_response(req, self.status, &self.body)
    }
}
