//! Token validation for incoming connections.
//!
//! Trading characters authenticate with a JWT minted by the account
//! service; this server only validates. A stable [`CharacterId`] is
//! derived from the subject claim, so the same account always maps to
//! the same trading identity.

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::trade::session::CharacterId;

/// Validation settings, usually loaded from the environment.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim. `None` accepts any issuer.
    pub issuer: Option<String>,
    /// Expected audience claim. `None` accepts any audience.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret, for setups without an RSA key.
    pub secret: Option<String>,
    /// Skip expiry validation. Testing only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read settings from `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Whether any key material is present. Without it the server
    /// falls back to development-mode identities.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims this server cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id from the auth provider.
    pub sub: String,
    /// Expiry, Unix seconds.
    #[serde(default)]
    pub exp: u64,
    /// Issued at.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience. Providers send either a string or an array.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Deterministic 16-byte character id from the subject claim.
    pub fn character_id(&self) -> CharacterId {
        derive_character_id(&self.sub)
    }
}

/// SHA-256 of a domain tag plus the subject, truncated to 16 bytes.
pub fn derive_character_id(subject: &str) -> CharacterId {
    let mut hasher = Sha256::new();
    hasher.update(b"peertrade-character:");
    hasher.update(subject.as_bytes());
    let hash = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    CharacterId(id)
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No key material configured on the server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token is not a parseable JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim does not match.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim does not match.
    #[error("invalid audience")]
    InvalidAudience,
    /// A required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a JWT and extract its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;
    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // The library skips expiry when exp is absent; enforce it for
    // tokens that carry one.
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::DecodeError(e.to_string()))?
            .as_secs();
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret-256-bits-long!";

    fn sign(claims: &TokenClaims) -> String {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(SECRET.as_bytes());
        encode(&header, claims, &key).unwrap()
    }

    fn fresh_claims() -> TokenClaims {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        TokenClaims {
            sub: "account-42".into(),
            exp: now + 3600,
            iat: now,
            iss: Some("accounts.example".into()),
            aud: None,
        }
    }

    fn secret_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_token_accepted() {
        let token = sign(&fresh_claims());
        let claims = validate_token(&token, &secret_config()).unwrap();
        assert_eq!(claims.sub, "account-42");
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = fresh_claims();
        claims.exp = 1;
        let token = sign(&claims);
        assert!(matches!(
            validate_token(&token, &secret_config()),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(&fresh_claims());
        let config = AuthConfig {
            secret: Some("some-other-secret-entirely!!!!!".into()),
            ..Default::default()
        };
        assert!(matches!(
            validate_token(&token, &config),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let mut claims = fresh_claims();
        claims.sub = String::new();
        let token = sign(&claims);
        assert!(matches!(
            validate_token(&token, &secret_config()),
            Err(AuthError::MissingClaim(_))
        ));
    }

    #[test]
    fn test_issuer_mismatch_rejected() {
        let token = sign(&fresh_claims());
        let config = AuthConfig {
            issuer: Some("someone-else".into()),
            ..secret_config()
        };
        assert!(matches!(
            validate_token(&token, &config),
            Err(AuthError::InvalidIssuer)
        ));
    }

    #[test]
    fn test_not_configured() {
        assert!(matches!(
            validate_token("a.b.c", &AuthConfig::default()),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn test_skip_expiry() {
        let mut claims = fresh_claims();
        claims.exp = 1;
        let token = sign(&claims);
        let config = AuthConfig {
            skip_expiry: true,
            ..secret_config()
        };
        assert!(validate_token(&token, &config).is_ok());
    }

    #[test]
    fn test_character_id_is_stable() {
        let a = derive_character_id("account-42");
        let b = derive_character_id("account-42");
        let c = derive_character_id("account-43");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
