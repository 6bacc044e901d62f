//! Bearer-token validation.
//!
//! The gateway trusts exactly one claim: `client_id`. Tokens are HMAC-signed
//! with the configured access secret; an upstream service issues them, this
//! service only checks them at upgrade time.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an upgrade was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token in the request.
    #[error("missing bearer token")]
    MissingToken,

    /// Signature, expiry or shape check failed.
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    /// The token is valid but carries no usable `client_id`.
    #[error("token carries no client_id claim")]
    MissingClientId,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default)]
    client_id: String,
    exp: u64,
}

/// Validates a bearer token and extracts the client id.
///
/// An optional `Bearer ` prefix is stripped first, so both raw tokens and
/// copied `Authorization` header values work in the `token=` parameter.
pub fn validate(secret: &str, token: &str) -> Result<String, AuthError> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|error| AuthError::InvalidToken(error.to_string()))?;

    if data.claims.client_id.is_empty() {
        return Err(AuthError::MissingClientId);
    }
    Ok(data.claims.client_id)
}

/// Issues a token for `client_id` expiring in `expire_secs`. The gateway
/// itself never calls this; it exists for token-issuing services and tests.
pub fn issue(secret: &str, client_id: &str, expire_secs: u64) -> Result<String, AuthError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let claims = Claims {
        client_id: client_id.to_string(),
        exp: now + expire_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|error| AuthError::InvalidToken(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_validates() {
        let token = issue(SECRET, "alice", 3600).unwrap();
        assert_eq!(validate(SECRET, &token).unwrap(), "alice");
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        let token = issue(SECRET, "alice", 3600).unwrap();
        let prefixed = format!("Bearer {token}");
        assert_eq!(validate(SECRET, &prefixed).unwrap(), "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue(SECRET, "alice", 3600).unwrap();
        assert!(matches!(
            validate("other-secret", &token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(validate(SECRET, ""), Err(AuthError::MissingToken)));
        assert!(matches!(
            validate(SECRET, "Bearer "),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn missing_client_id_claim_is_rejected() {
        let token = issue(SECRET, "", 3600).unwrap();
        assert!(matches!(
            validate(SECRET, &token),
            Err(AuthError::MissingClientId)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        #[derive(Serialize)]
        struct Stale {
            client_id: String,
            exp: u64,
        }
        let claims = Stale {
            client_id: "alice".into(),
            exp: 1, // 1970, far beyond any leeway
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            validate(SECRET, &token),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
