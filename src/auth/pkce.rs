//! PKCE verifier/challenge pairs and anti-forgery state tokens

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use std::fmt;

/// Bytes of entropy behind each verifier and state token.
/// 32 bytes encode to 43 base64url characters, the PKCE minimum.
const ENTROPY_BYTES: usize = 32;

fn random_urlsafe() -> String {
    let bytes: [u8; ENTROPY_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE code challenge data
#[derive(Clone)]
pub struct PkceChallenge {
    /// Code verifier (random string)
    pub verifier: String,
    /// Code challenge (SHA-256 hash of verifier, base64url encoded)
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a fresh pair from the thread CSPRNG
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_urlsafe();
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// S256 transform: `BASE64URL(SHA256(verifier))` without padding
    #[must_use]
    pub fn challenge_for(verifier: &str) -> String {
        let hash = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }
}

impl fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Opaque per-attempt value round-tripped through the authorization redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateToken(String);

impl StateToken {
    /// Generate a fresh random state token
    #[must_use]
    pub fn generate() -> Self {
        Self(random_urlsafe())
    }

    /// Get the token as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a received value without short-circuiting on the first difference
    #[must_use]
    pub fn matches(&self, received: &str) -> bool {
        let expected = self.0.as_bytes();
        let received = received.as_bytes();
        if expected.len() != received.len() {
            return false;
        }
        expected
            .iter()
            .zip(received)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
