//! Bearer token values issued to autoscaler identities
//!
//! Tokens are 32 cryptographically secure random bytes, URL-safe base64
//! encoded. The identity store may keep only their SHA-256.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use ballast_common::Error;

/// A freshly generated token secret
#[derive(Clone)]
pub struct TokenSecret {
    string: String,
}

impl TokenSecret {
    /// Generate a new random token
    pub fn generate() -> Result<Self, Error> {
        let mut raw = [0u8; 32];
        aws_lc_rs::rand::fill(&mut raw).map_err(|_| {
            Error::internal_with_context(
                "token",
                "failed to generate cryptographically secure random bytes",
            )
        })?;
        Ok(Self {
            string: URL_SAFE_NO_PAD.encode(raw),
        })
    }

    /// The token as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.string
    }

    /// SHA-256 of the token string, for storage when hashing is enabled
    pub fn hash(&self) -> String {
        hash_token(&self.string)
    }
}

/// SHA-256 of a token string, URL-safe base64 encoded
pub fn hash_token(token: &str) -> String {
    use aws_lc_rs::digest::{digest, SHA256};
    URL_SAFE_NO_PAD.encode(digest(&SHA256, token.as_bytes()).as_ref())
}

/// `identity:secret`, the bearer value the agent presents
pub fn bearer(identity: &str, secret: &str) -> String {
    format!("{}:{}", identity, secret)
}

impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSecret")
            .field("hash", &self.hash())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_tokens_are_unique_and_url_safe() {
        let a = TokenSecret::generate().unwrap();
        let b = TokenSecret::generate().unwrap();
        assert_ne!(a.as_str(), b.as_str());
        assert_eq!(a.as_str().len(), 43);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn story_stored_hash_is_deterministic_and_not_the_secret() {
        let token = TokenSecret::generate().unwrap();
        assert_eq!(token.hash(), hash_token(token.as_str()));
        assert_ne!(token.hash(), token.as_str());
    }

    #[test]
    fn story_debug_output_hides_the_secret() {
        let token = TokenSecret::generate().unwrap();
        let debug = format!("{:?}", token);
        assert!(!debug.contains(token.as_str()));
        assert!(debug.contains("hash"));
    }

    #[test]
    fn bearer_joins_identity_and_secret() {
        assert_eq!(bearer("ns1-c1-autoscaler", "abc"), "ns1-c1-autoscaler:abc");
    }
}
