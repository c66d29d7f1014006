//! Middleware modules for the canvas API
//!
//! - `rate_limit`: per-IP perimeter guard in front of every API route, and
//!   the [`ClientIpSource`] that decides which address a request is keyed by
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .nest("/api/v1", api_routes)
//!     // Rate limiting runs first on the request path
//!     .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
//!     .layer(middleware::from_fn(observability_middleware))
//!     .layer(cors)
//!     // Outermost
//! ```

mod rate_limit;

pub use rate_limit::{rate_limit_middleware, ClientIpSource, RateLimitError, RateLimitState};
