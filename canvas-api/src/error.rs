//! Error Types for the Canvas API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use canvas_core::{CanvasError, DirectoryError, GridError, PlacementRejection, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code. Clients are expected
/// to branch on the code, never on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Credential is missing, malformed, or unknown
    InvalidCredential,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Coordinates are outside the grid
    InvalidCoordinates,

    /// Color is not a palette member
    InvalidColor,

    /// Request contains invalid input data
    InvalidInput,

    /// Requested region exceeds the configured area cap
    RegionTooLarge,

    /// Request body exceeds the configured size cap (413)
    PayloadTooLarge,

    // ========================================================================
    // Not Found / Conflict Errors (404, 409)
    // ========================================================================
    /// Requested entity does not exist
    NotFound,

    /// Credential collides with an existing agent
    DuplicateCredential,

    // ========================================================================
    // Throttling Errors (429, 503)
    // ========================================================================
    /// Agent cooldown has not elapsed
    RateLimited,

    /// Perimeter request rate exceeded
    TooManyRequests,

    /// Observer stream is at its global connection cap
    CapacityExceeded,

    /// Observer stream is at its per-origin connection cap
    PerOriginLimitExceeded,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidCredential => StatusCode::UNAUTHORIZED,

            ErrorCode::InvalidCoordinates
            | ErrorCode::InvalidColor
            | ErrorCode::InvalidInput
            | ErrorCode::RegionTooLarge => StatusCode::BAD_REQUEST,

            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::DuplicateCredential => StatusCode::CONFLICT,

            ErrorCode::RateLimited | ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::CapacityExceeded | ErrorCode::PerOriginLimitExceeded => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCredential => "Credential is malformed or unknown",
            ErrorCode::InvalidCoordinates => "Coordinates are outside the canvas",
            ErrorCode::InvalidColor => "Color is not in the palette",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::RegionTooLarge => "Requested region is too large",
            ErrorCode::PayloadTooLarge => "Request body is too large",
            ErrorCode::NotFound => "Not found",
            ErrorCode::DuplicateCredential => "Credential already registered",
            ErrorCode::RateLimited => "Cooldown active",
            ErrorCode::TooManyRequests => "Rate limit exceeded",
            ErrorCode::CapacityExceeded => "Observer capacity reached",
            ErrorCode::PerOriginLimitExceeded => "Too many observers from this origin",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
///
/// This type is returned by all API endpoints when an error occurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Structured context a client can act on (valid range, palette, wait)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,

    /// Seconds until a retry can succeed; sent as `Retry-After`.
    #[serde(skip)]
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a retry hint.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create an InvalidCredential error.
    pub fn invalid_credential() -> Self {
        Self::from_code(ErrorCode::InvalidCredential)
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a generic not found error with custom message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a TooManyRequests error.
    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!("Rate limit exceeded. Retry after {} seconds", secs),
            None => "Rate limit exceeded".to_string(),
        };
        let err = Self::new(ErrorCode::TooManyRequests, message);
        match retry_after_secs {
            Some(secs) => err.with_retry_after(secs),
            None => err,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

/// Round a millisecond wait up to whole seconds, never below one.
fn retry_secs(wait_ms: i64) -> u64 {
    let wait_ms = wait_ms.max(0) as u64;
    wait_ms.div_ceil(1000).max(1)
}

impl From<PlacementRejection> for ApiError {
    fn from(rejection: PlacementRejection) -> Self {
        match rejection {
            PlacementRejection::InvalidCredential => ApiError::invalid_credential(),
            PlacementRejection::InvalidCoordinates { min, max } => ApiError::new(
                ErrorCode::InvalidCoordinates,
                format!("Coordinates must be integers in [{}, {}]", min, max),
            )
            .with_details(serde_json::json!({ "min": min, "max": max })),
            PlacementRejection::InvalidColor { palette } => {
                ApiError::from_code(ErrorCode::InvalidColor)
                    .with_details(serde_json::json!({ "palette": palette }))
            }
            PlacementRejection::RateLimited {
                wait_ms,
                next_eligible_at,
            } => ApiError::new(
                ErrorCode::RateLimited,
                format!("Cooldown active, retry in {}ms", wait_ms),
            )
            .with_details(serde_json::json!({
                "wait_ms": wait_ms,
                "next_eligible_at": next_eligible_at,
            }))
            .with_retry_after(retry_secs(wait_ms)),
            PlacementRejection::InternalError => ApiError::from_code(ErrorCode::InternalError),
        }
    }
}

/// Storage failures are logged in full and surface as a generic 500.
impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "storage error");
        ApiError::from_code(ErrorCode::InternalError)
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::DuplicateCredential => ApiError::from_code(ErrorCode::DuplicateCredential),
            DirectoryError::NotFound => ApiError::not_found("Agent not found"),
            DirectoryError::DuplicateId { id } => {
                tracing::error!(%id, "agent id collision");
                ApiError::from_code(ErrorCode::InternalError)
            }
            DirectoryError::Storage(e) => e.into(),
        }
    }
}

impl From<GridError> for ApiError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::RegionTooLarge { area, max } => ApiError::new(
                ErrorCode::RegionTooLarge,
                format!("Region covers {} cells, maximum is {}", area, max),
            )
            .with_details(serde_json::json!({ "area": area, "max_area": max })),
            GridError::InvertedRegion => {
                ApiError::invalid_input("Region minimum must not exceed maximum")
            }
            GridError::Storage(e) => e.into(),
        }
    }
}

impl From<CanvasError> for ApiError {
    fn from(err: CanvasError) -> Self {
        match err {
            CanvasError::Storage(e) => e.into(),
            CanvasError::Directory(e) => e.into(),
            CanvasError::Grid(e) => e.into(),
            CanvasError::Config(e) => ApiError::internal_error(e.to_string()),
        }
    }
}

/// Extractor failures keep their message but answer in the API's error shape.
fn rejection_error(status: StatusCode, body: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(ErrorCode::PayloadTooLarge, body)
    } else {
        ApiError::invalid_input(body)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        rejection_error(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        rejection_error(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        rejection_error(rejection.status(), rejection.body_text())
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
