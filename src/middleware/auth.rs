//! Bearer-token extraction for endpoints that act on the caller's own account.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::error::AuthError;

/// Raw access token from `Authorization: Bearer <token>`. Validation happens in the facade.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl BearerToken {
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty())
            .then(|| Self(token.to_string()))
    }
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(BearerToken::from_header)
            .ok_or(AuthError::Unauthorized)
    }
}
