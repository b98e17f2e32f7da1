//! One-way credential hashing with Argon2id.
//!
//! Stored hashes use the PHC string layout
//! `$argon2id$v=19$m=<kib>,t=<iterations>,p=<lanes>$<salt>$<digest>` so the
//! cost parameters travel with every record and can be raised later without
//! invalidating existing users. Encoding, parsing and the constant-time
//! digest comparison come from `argon2::password_hash`.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{SecurityError, SecurityResult};

pub const SALT_SIZE: usize = 16;
pub const DIGEST_SIZE: usize = 32;

/// Upper bound on `m` accepted from config or a stored record (256 MiB).
pub const MAX_MEMORY_KIB: u32 = 256 * 1024;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl HashCost {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> SecurityResult<Self> {
        let cost = Self { memory_kib, iterations, parallelism };
        cost.params()?;
        Ok(cost)
    }

    fn params(&self) -> SecurityResult<Params> {
        if self.memory_kib > MAX_MEMORY_KIB {
            return Err(SecurityError::Config(format!(
                "argon2 memory cost {} KiB exceeds {} KiB",
                self.memory_kib, MAX_MEMORY_KIB
            )));
        }
        Params::new(self.memory_kib, self.iterations, self.parallelism, Some(DIGEST_SIZE))
            .map_err(|e| SecurityError::Config(format!("invalid argon2 cost: {}", e)))
    }
}

impl Default for HashCost {
    fn default() -> Self {
        // OWASP baseline for Argon2id
        Self { memory_kib: 19_456, iterations: 2, parallelism: 1 }
    }
}

/// A validated PHC string and the cost that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialHash {
    encoded: String,
    cost: HashCost,
}

impl CredentialHash {
    pub fn cost(&self) -> HashCost {
        self.cost
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl std::fmt::Display for CredentialHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl std::fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHash").field("cost", &self.cost).finish()
    }
}

impl std::str::FromStr for CredentialHash {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let corrupt = |reason: String| SecurityError::HashCorrupt(reason);

        let parsed = PasswordHash::new(s).map_err(|e| corrupt(format!("not a PHC string: {}", e)))?;
        if parsed.algorithm != argon2::ARGON2ID_IDENT {
            return Err(corrupt(format!("unexpected algorithm {}", parsed.algorithm)));
        }
        if parsed.version != Some(Version::V0x13.into()) {
            return Err(corrupt("unsupported argon2 version".into()));
        }
        if parsed.salt.is_none() || parsed.hash.is_none() {
            return Err(corrupt("missing salt or digest".into()));
        }

        let params = Params::try_from(&parsed).map_err(|e| corrupt(format!("bad parameters: {}", e)))?;
        let cost = HashCost::new(params.m_cost(), params.t_cost(), params.p_cost())
            .map_err(|_| corrupt("cost parameters out of range".into()))?;

        Ok(Self { encoded: s.to_string(), cost })
    }
}

/// Salted, adaptive-cost password hashing.
///
/// Deliberately slow. Async callers must run it on a blocking pool.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    cost: HashCost,
}

impl CredentialHasher {
    pub fn new(cost: HashCost) -> Self {
        Self { cost }
    }

    pub fn hash(&self, password: &str) -> SecurityResult<CredentialHash> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt)
            .map_err(|e| SecurityError::Internal(format!("salt encoding failed: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.cost.params()?);
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| SecurityError::Internal(format!("argon2 failed: {}", e)))?;

        Ok(CredentialHash {
            encoded: hash.to_string(),
            cost: self.cost,
        })
    }

    /// Recompute with the stored salt and cost and compare in constant time.
    /// Any mismatch, including unusable parameters, is `false`.
    pub fn verify(&self, password: &str, stored: &CredentialHash) -> bool {
        let parsed = match PasswordHash::new(&stored.encoded) {
            Ok(parsed) => parsed,
            Err(e) => {
                SecurityError::HashCorrupt(e.to_string()).log_security_event();
                return false;
            }
        };

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => true,
            Err(password_hash::Error::Password) => false,
            Err(e) => {
                SecurityError::Internal(format!("argon2 verify failed: {}", e)).log_security_event();
                false
            }
        }
    }

    /// Verify against the stored PHC string. Only corrupt stored data is an
    /// error; a wrong password is `Ok(false)`.
    pub fn verify_encoded(&self, password: &str, stored: &str) -> SecurityResult<bool> {
        let parsed: CredentialHash = stored.parse()?;
        Ok(self.verify(password, &parsed))
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(HashCost::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(HashCost::new(1024, 1, 1).unwrap())
    }

    #[test]
    fn correct_password_verifies() {
        let hasher = hasher();
        let stored = hasher.hash("SecurePass123").unwrap();
        assert!(hasher.verify("SecurePass123", &stored));
    }

    #[test]
    fn wrong_password_is_false() {
        let hasher = hasher();
        let stored = hasher.hash("SecurePass123").unwrap();
        assert!(!hasher.verify("securepass123", &stored));
        assert!(!hasher.verify("", &stored));
    }

    #[test]
    fn salts_make_digests_unique() {
        let hasher = hasher();
        let a = hasher.hash("same").unwrap();
        let b = hasher.hash("same").unwrap();
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn phc_string_round_trips() {
        let hasher = hasher();
        let stored = hasher.hash("pw123456").unwrap();
        let encoded = stored.to_string();
        assert!(encoded.starts_with("$argon2id$v=19$m=1024,t=1,p=1$"));

        let parsed: CredentialHash = encoded.parse().unwrap();
        assert_eq!(parsed, stored);
        assert_eq!(parsed.cost(), HashCost::new(1024, 1, 1).unwrap());
        assert_eq!(hasher.verify_encoded("pw123456", &encoded), Ok(true));
        assert_eq!(hasher.verify_encoded("nope", &encoded), Ok(false));
    }

    #[test]
    fn hashes_from_the_argon2_crate_verify() {
        let salt = SaltString::encode_b64(b"0123456789abcdef").unwrap();
        let params = Params::new(1024, 1, 1, Some(DIGEST_SIZE)).unwrap();
        let encoded = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(b"pw123456", &salt)
            .unwrap()
            .to_string();

        assert_eq!(hasher().verify_encoded("pw123456", &encoded), Ok(true));
        assert_eq!(hasher().verify_encoded("pw1234567", &encoded), Ok(false));
    }

    #[test]
    fn stored_cost_wins_over_hasher_cost() {
        let old = CredentialHasher::new(HashCost::new(512, 1, 1).unwrap());
        let stored = old.hash("pw123456").unwrap();
        assert_eq!(stored.cost().memory_kib, 512);
        assert!(hasher().verify("pw123456", &stored));
    }

    #[test]
    fn corrupt_stored_hash_is_an_error() {
        let hasher = hasher();
        for corrupt in [
            "",
            "plaintext-password",
            "$bcrypt$v=19$m=1024,t=1,p=1$c2FsdHNhbHRzYWx0$ZGlnZXN0ZGlnZXN0",
            "$argon2i$v=19$m=1024,t=1,p=1$c2FsdHNhbHRzYWx0$ZGlnZXN0ZGlnZXN0",
            "$argon2id$v=19$m=abc,t=1,p=1$c2FsdHNhbHRzYWx0$ZGlnZXN0ZGlnZXN0",
            "$argon2id$v=16$m=1024,t=1,p=1$c2FsdHNhbHRzYWx0$ZGlnZXN0ZGlnZXN0",
            "$argon2id$v=19$m=1024,t=1,p=1$!!!$ZGlnZXN0ZGlnZXN0",
            "$argon2id$v=19$m=1024,t=1,p=1$c2FsdHNhbHRzYWx0",
        ] {
            assert!(
                matches!(hasher.verify_encoded("pw", corrupt), Err(SecurityError::HashCorrupt(_))),
                "expected corrupt: {corrupt}"
            );
        }
    }

    #[test]
    fn oversized_memory_cost_is_corrupt_not_allocated() {
        let encoded = "$argon2id$v=19$m=4194304,t=1,p=1$c2FsdHNhbHRzYWx0$ZGlnZXN0ZGlnZXN0ZGlnZXN0ZGlnZXN0ZGlnZXN0ZGk";
        assert!(matches!(
            hasher().verify_encoded("pw", encoded),
            Err(SecurityError::HashCorrupt(_))
        ));
    }

    #[test]
    fn tampered_digest_never_matches() {
        let hasher = hasher();
        let encoded = hasher.hash("pw123456").unwrap().to_string();
        let (head, digest) = encoded.rsplit_once('$').unwrap();
        let flipped = if digest.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{}${}{}", head, flipped, &digest[1..]);

        assert_eq!(hasher.verify_encoded("pw123456", &tampered), Ok(false));
    }

    #[test]
    fn invalid_cost_is_rejected() {
        assert!(matches!(HashCost::new(1024, 0, 1), Err(SecurityError::Config(_))));
        assert!(matches!(HashCost::new(MAX_MEMORY_KIB + 1, 1, 1), Err(SecurityError::Config(_))));
    }
}
