//! APNs provider token (ES256 JWT) issuance with an owned cache.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PushError;

/// Tokens are valid for an hour upstream; refresh well before that.
pub const TOKEN_REFRESH_AFTER: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderClaims {
    /// Team id.
    pub iss: String,
    /// Issued at (unix seconds).
    pub iat: i64,
}

struct CachedToken {
    token: String,
    issued: Instant,
}

/// Issues provider tokens, reusing one until it is
/// [`TOKEN_REFRESH_AFTER`] old.
pub struct ApnsTokenProvider {
    key: EncodingKey,
    key_id: String,
    team_id: String,
    cache: Mutex<Option<CachedToken>>,
}

impl ApnsTokenProvider {
    /// Build from a PKCS#8 PEM P-256 key (the `.p8` file Apple issues).
    pub fn new(pem: &[u8], key_id: &str, team_id: &str) -> Result<Self, PushError> {
        let key = EncodingKey::from_ec_pem(pem).map_err(|e| PushError::Key(e.to_string()))?;
        Ok(Self {
            key,
            key_id: key_id.to_string(),
            team_id: team_id.to_string(),
            cache: Mutex::new(None),
        })
    }

    pub fn from_file(path: &Path, key_id: &str, team_id: &str) -> Result<Self, PushError> {
        let pem = std::fs::read(path)
            .map_err(|e| PushError::Key(format!("Failed to read {}: {e}", path.display())))?;
        Self::new(&pem, key_id, team_id)
    }

    /// Current bearer token, signing a fresh one when the cached token has
    /// expired.
    pub fn token(&self) -> Result<String, PushError> {
        self.token_at(Instant::now(), chrono::Utc::now().timestamp())
    }

    fn token_at(&self, now: Instant, unix_secs: i64) -> Result<String, PushError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache
            .as_ref()
            .filter(|c| now.saturating_duration_since(c.issued) < TOKEN_REFRESH_AFTER)
        {
            return Ok(cached.token.clone());
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = ProviderClaims {
            iss: self.team_id.clone(),
            iat: unix_secs,
        };
        let token = jsonwebtoken::encode(&header, &claims, &self.key)?;
        debug!(key_id = %self.key_id, "Issued APNs provider token");

        *cache = Some(CachedToken {
            token: token.clone(),
            issued: now,
        });
        Ok(token)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation};

    use super::*;

    fn provider() -> (ApnsTokenProvider, String) {
        let key = rcgen::KeyPair::generate().unwrap();
        let provider =
            ApnsTokenProvider::new(key.serialize_pem().as_bytes(), "KEY123", "TEAM456").unwrap();
        (provider, key.public_key_pem())
    }

    #[test]
    fn token_is_es256_with_kid_and_issuer() {
        let (provider, public_pem) = provider();
        let token = provider.token().unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("KEY123"));

        let mut validation = Validation::new(Algorithm::ES256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let decoded = jsonwebtoken::decode::<ProviderClaims>(
            &token,
            &DecodingKey::from_ec_pem(public_pem.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.iss, "TEAM456");
    }

    #[test]
    fn token_is_cached_until_refresh_window() {
        let (provider, _) = provider();
        let start = Instant::now();

        let first = provider.token_at(start, 1_000).unwrap();
        let cached = provider
            .token_at(start + Duration::from_secs(49 * 60), 3_940)
            .unwrap();
        assert_eq!(first, cached);

        let fresh = provider
            .token_at(start + TOKEN_REFRESH_AFTER, 4_000)
            .unwrap();
        assert_ne!(first, fresh);
    }

    #[test]
    fn rejects_non_ec_key() {
        let err = ApnsTokenProvider::new(b"not a pem", "k", "t").err().unwrap();
        assert!(matches!(err, PushError::Key(_)));
    }

    #[test]
    fn missing_key_file_is_reported() {
        let err = ApnsTokenProvider::from_file(Path::new("/nonexistent/AuthKey.p8"), "k", "t")
            .err()
            .unwrap();
        assert!(err.to_string().contains("AuthKey.p8"));
    }
}
