//! Owner authentication extractor.
//!
//! Authentication proper lives outside this service; the API key is an
//! opaque principal that scopes every read and write. Cross-owner lookups
//! surface as 404 downstream, never as a 403 that leaks existence.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::error::ApiError;

/// The opaque owner id every store lookup is scoped by.
#[derive(Debug, Clone)]
pub struct Owner(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        api_key
            .or(bearer)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| Owner(key.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}
