//! `Authorization: Bearer <credential>` extractor.
//!
//! Only the header's shape is checked here. Whether the credential belongs
//! to an agent is decided by the service layer, so a missing header and an
//! unknown credential produce the same `INVALID_CREDENTIAL` response.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::ApiError;

/// The raw credential presented by the caller.
#[derive(Debug, Clone)]
pub struct BearerCredential(pub String);

impl BearerCredential {
    /// Pull the token out of an `Authorization` header value.
    ///
    /// The scheme is matched case-insensitively; surrounding whitespace is
    /// ignored.
    pub fn parse_header(value: &str) -> Option<String> {
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerCredential
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(Self::parse_header)
            .map(BearerCredential)
            .ok_or_else(ApiError::invalid_credential)
    }
}
