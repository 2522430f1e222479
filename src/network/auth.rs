//! Token Authentication
//!
//! The identity service signs an HS256 JWT; [`AuthConfig::identify`] checks
//! it and yields the [`Identity`] bound to the connection. Tokens are never
//! issued here.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::services::Identity;

/// Shared secret and expected issuer of player tokens.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity service.
    pub secret: Option<String>,
    /// Required `iss` claim, if any.
    pub issuer: Option<String>,
}

impl AuthConfig {
    /// Read `AUTH_SECRET` and `AUTH_ISSUER`.
    pub fn from_env() -> Self {
        Self {
            secret: std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty()),
            issuer: std::env::var("AUTH_ISSUER").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Whether tokens can be verified at all.
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `token` and return the player it names.
    pub fn identify(&self, token: &str) -> Result<Identity, AuthError> {
        let secret = self.secret.as_deref().ok_or(AuthError::NotConfigured)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let claims = decode::<PlayerClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Rejected(e.to_string()),
        })?
        .claims;

        claims.into_identity()
    }
}

/// Claims read from a player token. `exp` and `iss` are checked by the
/// decoder.
#[derive(Debug, Deserialize)]
struct PlayerClaims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
}

impl PlayerClaims {
    /// Without a `name` claim the display name is a short digest of the
    /// subject, so raw provider ids never reach other players.
    fn into_identity(self) -> Result<Identity, AuthError> {
        if self.sub.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }
        let display_name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("player-{}", subject_tag(&self.sub)),
        };
        Ok(Identity::new(self.sub, display_name))
    }
}

fn subject_tag(sub: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"pong-arena-player:");
    hasher.update(sub.as_bytes());
    hex::encode(&hasher.finalize()[..4])
}

/// Why a token was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No secret configured on this server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token is past its `exp`.
    #[error("token expired")]
    Expired,
    /// Token has an empty subject.
    #[error("token has no subject")]
    MissingSubject,
    /// Bad signature, issuer or encoding.
    #[error("invalid token: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn sign(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn fresh(sub: &str, name: Option<&str>) -> serde_json::Value {
        let exp = chrono::Utc::now().timestamp() + 3600;
        json!({ "sub": sub, "name": name, "exp": exp, "iss": "arena-id" })
    }

    fn config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            issuer: None,
        }
    }

    #[test]
    fn test_identity_from_token() {
        let token = sign(fresh("user123", Some("Ada")), SECRET);
        let identity = config().identify(&token).unwrap();
        assert_eq!(identity, Identity::new("user123", "Ada"));
    }

    #[test]
    fn test_display_name_fallback() {
        let cfg = config();
        let a = cfg.identify(&sign(fresh("user123", Some("  ")), SECRET)).unwrap();
        let again = cfg.identify(&sign(fresh("user123", None), SECRET)).unwrap();
        let other = cfg.identify(&sign(fresh("user456", None), SECRET)).unwrap();

        assert_eq!(a, again);
        assert!(a.display_name.starts_with("player-"));
        assert_eq!(a.display_name.len(), "player-".len() + 8);
        assert_ne!(a.display_name, other.display_name);
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = sign(json!({ "sub": "user123", "exp": 1 }), SECRET);
        assert!(matches!(config().identify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(fresh("user123", None), "some-other-secret-entirely!!");
        assert!(matches!(config().identify(&token), Err(AuthError::Rejected(_))));
    }

    #[test]
    fn test_issuer_checked() {
        let token = sign(fresh("user123", None), SECRET);
        let cfg = AuthConfig {
            issuer: Some("arena-id".into()),
            ..config()
        };
        assert!(cfg.identify(&token).is_ok());

        let cfg = AuthConfig {
            issuer: Some("elsewhere".into()),
            ..config()
        };
        assert!(matches!(cfg.identify(&token), Err(AuthError::Rejected(_))));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let token = sign(fresh("", Some("Ada")), SECRET);
        assert!(matches!(config().identify(&token), Err(AuthError::MissingSubject)));
    }

    #[test]
    fn test_not_configured() {
        let cfg = AuthConfig::default();
        assert!(!cfg.is_configured());
        assert!(matches!(cfg.identify("a.b.c"), Err(AuthError::NotConfigured)));
    }
}
