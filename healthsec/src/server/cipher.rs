use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL_SAFE};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use zeroize::Zeroizing;

use crate::config::{SharedSecret, decode_payload_key};
use crate::error::{SecurityError, SecurityResult};

/// XChaCha20 nonce width. 192 random bits make accidental reuse under one key
/// negligible at any realistic request volume.
pub const NONCE_SIZE: usize = 24;
/// Poly1305 tag width.
pub const TAG_SIZE: usize = 16;

/// Wire form of an encrypted payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: String,             // 24 random bytes
    #[serde(rename = "cipherText")]
    pub cipher_text: String,    // encrypted payload without the tag
    pub tag: String,            // 16 byte Poly1305 tag
}

impl Envelope {
    /// Parse an envelope out of a raw JSON request body.
    pub fn from_json_slice(body: &[u8]) -> SecurityResult<Self> {
        serde_json::from_slice(body).map_err(|e| SecurityError::Decode(format!("envelope json: {}", e)))
    }
}

/// Authenticated symmetric encryption of arbitrary payloads.
///
/// Stateless apart from the key schedule, so one instance is shared across
/// every worker.
#[derive(Clone)]
pub struct PayloadCipher {
    aead: XChaCha20Poly1305,
}

impl PayloadCipher {
    pub fn new(secret: &SharedSecret) -> Self {
        let aead = XChaCha20Poly1305::new(Key::from_slice(secret.payload_key()));
        Self { aead }
    }

    /// Cipher from the payload key alone, for callers that never sign tokens.
    pub fn from_base64_key(payload_key_b64: &str) -> SecurityResult<Self> {
        let key = Zeroizing::new(decode_payload_key(payload_key_b64)?);
        Ok(Self {
            aead: XChaCha20Poly1305::new(Key::from_slice(&key[..])),
        })
    }

    /// Encrypt under a fresh random nonce. Two calls with the same plaintext
    /// never produce the same envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> SecurityResult<Envelope> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

        let mut sealed = self
            .aead
            .encrypt(&nonce, plaintext)
            .map_err(|_| SecurityError::Internal("payload encryption failed".into()))?;

        // aead appends the tag; the wire format carries it separately
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(Envelope {
            iv: BASE64_URL_SAFE.encode(nonce),
            cipher_text: BASE64_URL_SAFE.encode(&sealed),
            tag: BASE64_URL_SAFE.encode(&tag),
        })
    }

    /// Fails with [`SecurityError::Decode`] for structurally broken envelopes
    /// and [`SecurityError::Integrity`] when the tag does not verify, which
    /// covers both tampering and the wrong key.
    pub fn decrypt(&self, envelope: &Envelope) -> SecurityResult<Vec<u8>> {
        let nonce_bytes = BASE64_URL_SAFE
            .decode(&envelope.iv)
            .map_err(|_| SecurityError::Decode("iv is not base64url".into()))?;
        let mut sealed = BASE64_URL_SAFE
            .decode(&envelope.cipher_text)
            .map_err(|_| SecurityError::Decode("cipherText is not base64url".into()))?;
        let tag = BASE64_URL_SAFE
            .decode(&envelope.tag)
            .map_err(|_| SecurityError::Decode("tag is not base64url".into()))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(SecurityError::Decode(format!(
                "iv must be {} bytes, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }
        if tag.len() != TAG_SIZE {
            return Err(SecurityError::Decode(format!(
                "tag must be {} bytes, got {}",
                TAG_SIZE,
                tag.len()
            )));
        }

        sealed.extend_from_slice(&tag);
        let nonce = XNonce::from_slice(&nonce_bytes);

        self.aead
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| SecurityError::Integrity)
    }

    /// Serialize `value` as JSON and encrypt it.
    pub fn encrypt_json<T: Serialize + ?Sized>(&self, value: &T) -> SecurityResult<Envelope> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| SecurityError::Internal(format!("response serialization failed: {}", e)))?;
        self.encrypt(&plaintext)
    }

    /// Decrypt and parse the plaintext as JSON. A plaintext that authenticates
    /// but is not valid JSON for `T` is a decode failure.
    pub fn decrypt_json<T: DeserializeOwned>(&self, envelope: &Envelope) -> SecurityResult<T> {
        let plaintext = self.decrypt(envelope)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| SecurityError::Decode(format!("decrypted payload is not valid json: {}", e)))
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadCipher(XChaCha20-Poly1305)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PayloadCipher {
        PayloadCipher::new(&SharedSecret::generate())
    }

    #[test]
    fn encrypt_then_decrypt_returns_plaintext() {
        let cipher = cipher();
        let envelope = cipher.encrypt(b"weight=72.5").unwrap();
        assert_eq!(cipher.decrypt(&envelope).unwrap(), b"weight=72.5");
    }

    #[test]
    fn empty_payload_is_supported() {
        let cipher = cipher();
        let envelope = cipher.encrypt(b"").unwrap();
        assert!(cipher.decrypt(&envelope).unwrap().is_empty());
    }

    #[test]
    fn same_plaintext_gives_distinct_envelopes() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.cipher_text, b.cipher_text);
    }

    #[test]
    fn short_iv_is_a_decode_error() {
        let cipher = cipher();
        let mut envelope = cipher.encrypt(b"data").unwrap();
        envelope.iv = BASE64_URL_SAFE.encode([0u8; 12]);
        assert!(matches!(cipher.decrypt(&envelope), Err(SecurityError::Decode(_))));
    }

    #[test]
    fn missing_tag_is_a_decode_error() {
        let cipher = cipher();
        let mut envelope = cipher.encrypt(b"data").unwrap();
        envelope.tag = String::new();
        assert!(matches!(cipher.decrypt(&envelope), Err(SecurityError::Decode(_))));
    }

    #[test]
    fn non_base64_field_is_a_decode_error() {
        let cipher = cipher();
        let mut envelope = cipher.encrypt(b"data").unwrap();
        envelope.cipher_text = "not base64 !!".into();
        assert!(matches!(cipher.decrypt(&envelope), Err(SecurityError::Decode(_))));
    }

    #[test]
    fn swapped_tag_fails_integrity() {
        let cipher = cipher();
        let a = cipher.encrypt(b"first").unwrap();
        let mut b = cipher.encrypt(b"other").unwrap();
        b.tag = a.tag;
        assert_eq!(cipher.decrypt(&b), Err(SecurityError::Integrity));
    }

    #[test]
    fn payload_key_alone_decrypts_server_envelopes() {
        let secret = SharedSecret::generate();
        let server = PayloadCipher::new(&secret);
        let client = PayloadCipher::from_base64_key(&BASE64_URL_SAFE.encode(secret.payload_key())).unwrap();

        let envelope = server.encrypt(b"hello").unwrap();
        assert_eq!(client.decrypt(&envelope).unwrap(), b"hello");
    }

    #[test]
    fn wire_field_names_match_protocol() {
        let envelope = cipher().encrypt(b"{}").unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("iv").is_some());
        assert!(json.get("cipherText").is_some());
        assert!(json.get("tag").is_some());
    }

    #[test]
    fn envelope_missing_field_fails_to_parse() {
        let err = Envelope::from_json_slice(br#"{"iv":"AAAA","tag":"BBBB"}"#).unwrap_err();
        assert!(matches!(err, SecurityError::Decode(_)));
    }

    #[test]
    fn json_helpers_round_trip_structured_values() {
        let cipher = cipher();
        let envelope = cipher
            .encrypt_json(&serde_json::json!({"status": true, "message": "ok"}))
            .unwrap();
        let value: serde_json::Value = cipher.decrypt_json(&envelope).unwrap();
        assert_eq!(value["message"], "ok");
    }

    #[test]
    fn authenticated_non_json_plaintext_is_a_decode_error() {
        let cipher = cipher();
        let envelope = cipher.encrypt(b"not json").unwrap();
        let result: SecurityResult<serde_json::Value> = cipher.decrypt_json(&envelope);
        assert!(matches!(result, Err(SecurityError::Decode(_))));
    }
}
