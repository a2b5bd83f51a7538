//! HS256 access tokens.
//!
//! Tokens are stateless: nothing is stored server-side, so verification is a
//! signature check plus an expiry comparison against the caller's clock.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// A freshly issued token and its validity window.
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies access tokens with a shared secret.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &SecretString, ttl: Duration) -> Self {
        let bytes = secret.expose_secret().as_bytes();

        // Expiry is checked by hand against an explicit `now` so that the
        // boundary is exact and testable; the library check would add leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
            ttl,
        }
    }

    /// Issue a token for `subject`, valid from now for the configured lifetime.
    pub fn issue(&self, subject: &str) -> Result<AccessToken, AuthError> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<AccessToken, AuthError> {
        if subject.trim().is_empty() {
            return Err(AuthError::InvalidSubject);
        }

        // The claims carry whole seconds; so do the advertised times.
        let issued_at = now.trunc_subsecs(0);
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AuthError::Signing("token lifetime overflows the clock".into()))?;
        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        debug!(subject, expires_at = %expires_at, "Issued access token");
        Ok(AccessToken {
            token,
            subject: claims.sub,
            issued_at,
            expires_at,
        })
    }

    /// Verify a token and return its subject.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify against an explicit clock. A token is valid strictly before its
    /// expiry second.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthorized("empty token".into()));
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::InvalidSignature => "invalid signature".to_string(),
                ErrorKind::InvalidAlgorithm => "unsupported algorithm".to_string(),
                ErrorKind::MissingRequiredClaim(claim) => format!("missing claim: {claim}"),
                _ => format!("malformed token: {e}"),
            };
            AuthError::Unauthorized(reason)
        })?;

        if now.timestamp() >= data.claims.exp {
            return Err(AuthError::Unauthorized("token expired".into()));
        }
        if data.claims.sub.is_empty() {
            return Err(AuthError::Unauthorized("token has no subject".into()));
        }

        Ok(data.claims.sub)
    }
}
