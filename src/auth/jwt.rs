//! HS256 JWT verification.
//!
//! Tokens are issued by the account service; this gateway only verifies
//! them. The `sub` claim is the user ID.

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;
use crate::error::GatewayError;

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user ID.
    pub sub: String,
    /// Expiry (seconds since the Unix epoch).
    pub exp: usize,
    /// Issued-at (seconds since the Unix epoch).
    #[serde(default)]
    pub iat: usize,
}

/// Verifies HS256 tokens against a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Creates a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verifies `token` and returns the authenticated user.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthenticated`] if the signature, expiry or
    /// subject is invalid.
    pub fn verify(&self, token: &str) -> Result<UserId, GatewayError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| GatewayError::Unauthenticated(format!("invalid token: {e}")))?;
        UserId::parse(&data.claims.sub)
            .map_err(|_| GatewayError::Unauthenticated("invalid subject claim".to_string()))
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    pub(crate) fn token_for(sub: &str, secret: &str, expires_in_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            exp: usize::try_from(now + expires_in_secs).unwrap_or(0),
            iat: usize::try_from(now).unwrap_or(0),
        };
        let Ok(token) = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        ) else {
            panic!("token encoding failed");
        };
        token
    }

    #[test]
    fn valid_token_yields_subject() {
        let verifier = JwtVerifier::new("secret");
        let Ok(user) = verifier.verify(&token_for("alice", "secret", 3600)) else {
            panic!("valid token rejected");
        };
        assert_eq!(user.as_str(), "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = JwtVerifier::new("secret");
        let result = verifier.verify(&token_for("alice", "other", 3600));
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new("secret");
        let result = verifier.verify(&token_for("alice", "secret", -3600));
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn garbage_and_bad_subject_are_rejected() {
        let verifier = JwtVerifier::new("secret");
        assert!(verifier.verify("not-a-token").is_err());
        assert!(verifier.verify(&token_for("bad subject", "secret", 3600)).is_err());
    }
}
