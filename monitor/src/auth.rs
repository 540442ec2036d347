use crate::errors::{Error, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims carried by a session token. `sub` is the account name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub is_admin: bool,
}

/// Caller identity after a successful token check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
}

/// Verifies presented session credentials.
///
/// `bearer` is the raw token, `None` when the request carried none.
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier: Send + Sync {
    /// Any valid session; used by devices submitting measurements.
    fn verify_user(&self, bearer: Option<String>) -> Result<Identity>;

    /// A valid session that also carries administrative privilege.
    fn verify_admin(&self, bearer: Option<String>) -> Result<Identity>;
}

/// HS256 JWT implementation of [`TokenVerifier`]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    fn claims(&self, bearer: Option<String>) -> Result<SessionClaims> {
        let token = bearer.ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?;

        decode::<SessionClaims>(&token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::Unauthorized("token has expired".to_string()),
                _ => Error::Unauthorized(format!("invalid token: {}", e)),
            })
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify_user(&self, bearer: Option<String>) -> Result<Identity> {
        let claims = self.claims(bearer)?;
        Ok(Identity { subject: claims.sub })
    }

    fn verify_admin(&self, bearer: Option<String>) -> Result<Identity> {
        let claims = self.claims(bearer)?;

        if !claims.is_admin {
            debug!(subject = %claims.sub, "Token lacks admin claim");
            return Err(Error::Forbidden("admin privilege required".to_string()));
        }

        Ok(Identity { subject: claims.sub })
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
