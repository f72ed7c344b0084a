// zerogate/zerogate-backend/src/tokens.rs

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a session token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub id: String,
    pub proof_verified: bool,
    pub username: String,
    pub timestamp: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("access token required")]
    Missing,
    #[error("token expired")]
    Expired,
    #[error("token signature does not match")]
    InvalidSignature,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("failed to sign token: {0}")]
    Sign(jsonwebtoken::errors::Error),
}

/// HS256 signer/verifier for session tokens. Tokens are stateless.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_in: Duration,
    expires_in_label: String,
}

impl TokenIssuer {
    pub fn new(secret: &str, expires_in: Duration, expires_in_label: impl Into<String>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expires_in,
            expires_in_label: expires_in_label.into(),
        }
    }

    /// Expiry as configured, e.g. `1h`.
    pub fn expires_in_label(&self) -> &str {
        &self.expires_in_label
    }

    pub fn issue(&self, username: &str) -> Result<(String, SessionClaims), TokenError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let iat = now.as_secs();
        let claims = SessionClaims {
            id: format!("user_{}", now.as_millis()),
            proof_verified: true,
            username: username.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            iat,
            exp: iat + self.expires_in.as_secs(),
        };
        let token = self.sign_claims(&claims)?;
        Ok((token, claims))
    }

    pub fn sign_claims(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(TokenError::Sign)
    }

    pub fn decode(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed(err.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(secret: &str) -> TokenIssuer {
        TokenIssuer::new(secret, Duration::from_secs(3600), "1h")
    }

    #[test]
    fn issued_token_decodes_with_username() {
        let issuer = issuer("s3cret");
        let (token, claims) = issuer.issue("alice").unwrap();
        let decoded = issuer.decode(&token).unwrap();
        assert_eq!(decoded, claims);
        assert!(decoded.proof_verified);
        assert_eq!(decoded.username, "alice");
        assert!(decoded.id.starts_with("user_"));
        assert_eq!(decoded.exp - decoded.iat, 3600);
        assert_eq!(issuer.expires_in_label(), "1h");
    }

    #[test]
    fn claims_use_camel_case() {
        let (_, claims) = issuer("k").issue("bob").unwrap();
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["proofVerified"], true);
        assert!(value.get("proof_verified").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = issuer("k");
        let (_, mut claims) = issuer.issue("carol").unwrap();
        claims.iat -= 7200;
        claims.exp = claims.iat + 60;
        let token = issuer.sign_claims(&claims).unwrap();
        assert!(matches!(issuer.decode(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let (token, _) = issuer("one").issue("dave").unwrap();
        assert!(matches!(
            issuer("two").decode(&token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            issuer("k").decode("not-a-jwt"),
            Err(TokenError::Malformed(_))
        ));
    }
}
