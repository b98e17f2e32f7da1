use serde::Serialize;

use crate::error::SecurityResult;
use crate::response::ApiResponse;
use crate::server::cipher::{Envelope, PayloadCipher};
use crate::server::token::Token;

/// Caller side of the boundary: encrypts outgoing bodies, decrypts replies
/// and carries the bearer token once logged in.
#[derive(Debug, Clone)]
pub struct ClientSession {
    cipher: PayloadCipher,
    token: Option<Token>,
}

impl ClientSession {
    pub fn new(cipher: PayloadCipher) -> Self {
        Self { cipher, token: None }
    }

    pub fn from_base64_key(payload_key_b64: &str) -> SecurityResult<Self> {
        Ok(Self::new(PayloadCipher::from_base64_key(payload_key_b64)?))
    }

    pub fn encrypt_request<T: Serialize + ?Sized>(&self, body: &T) -> SecurityResult<Envelope> {
        self.cipher.encrypt_json(body)
    }

    pub fn decrypt_response(&self, envelope: &Envelope) -> SecurityResult<ApiResponse> {
        self.cipher.decrypt_json(envelope)
    }

    pub fn set_token(&mut self, token: Token) {
        self.token = Some(token);
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// `Bearer <token>` when logged in.
    pub fn authorization_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedSecret;
    use crate::server::sealer::ResponseSealer;

    #[test]
    fn header_appears_after_login() {
        let mut session = ClientSession::new(PayloadCipher::new(&SharedSecret::generate()));
        assert!(session.authorization_header().is_none());

        session.set_token(Token::from_string("a.b.c"));
        assert_eq!(session.authorization_header().as_deref(), Some("Bearer a.b.c"));

        session.clear_token();
        assert!(session.token().is_none());
    }

    #[test]
    fn decrypts_what_the_server_seals() {
        let cipher = PayloadCipher::new(&SharedSecret::generate());
        let session = ClientSession::new(cipher.clone());
        let sealed = ResponseSealer::new(cipher)
            .seal(200, &ApiResponse::ok("User found", serde_json::json!({"email": "a@b.c"})))
            .unwrap();

        let body = session.decrypt_response(&sealed.envelope).unwrap();
        assert!(body.status);
        assert_eq!(body.data.unwrap()["email"], "a@b.c");
    }
}
