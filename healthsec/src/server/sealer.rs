use serde::Serialize;

use crate::error::{SecurityError, SecurityResult};
use crate::response::ApiResponse;
use crate::server::cipher::{Envelope, PayloadCipher};
use crate::server::pipeline::Rejection;

/// An outbound reply ready for the wire: the status stays in clear, the body
/// is the envelope and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedResponse {
    pub status: u16,
    pub envelope: Envelope,
}

/// Response encryption stage.
#[derive(Debug, Clone)]
pub struct ResponseSealer {
    cipher: PayloadCipher,
}

impl ResponseSealer {
    pub fn new(cipher: PayloadCipher) -> Self {
        Self { cipher }
    }

    pub fn seal<T: Serialize>(&self, status: u16, response: &ApiResponse<T>) -> SecurityResult<SealedResponse> {
        let envelope = self.cipher.encrypt_json(response).inspect_err(SecurityError::log_security_event)?;
        Ok(SealedResponse { status, envelope })
    }

    /// Seal a pipeline rejection. Only the public message is encrypted.
    pub fn seal_rejection(&self, rejection: &Rejection) -> SecurityResult<SealedResponse> {
        self.seal(rejection.status(), &rejection.to_response())
    }
}
