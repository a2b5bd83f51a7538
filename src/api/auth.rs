//! Bearer-token extractor for protected routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::AppState;
use super::response::ApiError;

/// Proof that the request carried a valid access token.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub subject: String,
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization Header"))?;
        let value = header
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid Authorization Header"))?;
        let token = bearer_token(value)
            .ok_or_else(|| ApiError::unauthorized("Authorization Header must be 'Bearer <token>'"))?;

        let subject = state.tokens.verify(token)?;
        Ok(Self { subject })
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
