//! `Json`, `Query` and `Path` wrappers whose rejections are [`ApiError`]s.
//!
//! axum's stock extractors answer a malformed request with a plain-text
//! body. Handlers take these instead so every 4xx carries the usual
//! `{ code, message, details }` shape.

use axum::extract::{FromRequest, FromRequestParts, Path, Query};
use axum::Json;

use crate::error::ApiError;

/// JSON request body.
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string parameters.
#[derive(Debug, Clone, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Path segments.
#[derive(Debug, Clone, FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);
