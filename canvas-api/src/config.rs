//! API Configuration Module
//!
//! This module provides configuration for CORS, rate limiting, observer
//! connection limits and storage backend selection. Configuration is loaded
//! from environment variables with sensible defaults for development.
//!
//! Canvas rules (grid size, cooldown, region cap) live in
//! [`canvas_core::CanvasConfig`].

use std::path::PathBuf;
use std::time::Duration;

use crate::middleware::ClientIpSource;

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS, rate limiting, and production hardening.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Rate Limiting Configuration
    // ========================================================================
    /// Whether the per-IP perimeter limiter is enabled.
    pub rate_limit_enabled: bool,

    /// Requests per minute per client IP.
    pub rate_limit_per_minute: u32,

    /// Burst capacity (allow this many requests beyond the limit temporarily).
    pub rate_limit_burst: u32,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,

    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_max_age_secs: 86400,

            rate_limit_enabled: true,
            rate_limit_per_minute: 120,
            rate_limit_burst: 20,

            max_body_bytes: 16 * 1024,

            trust_forwarded_headers: false,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CANVAS_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `CANVAS_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `CANVAS_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `CANVAS_RATE_LIMIT_PER_MINUTE`: Requests per minute per IP (default: 120)
    /// - `CANVAS_RATE_LIMIT_BURST`: Burst capacity (default: 20)
    /// - `CANVAS_MAX_BODY_BYTES`: Request body limit (default: 16384)
    /// - `CANVAS_TRUST_FORWARDED_HEADERS`: "true" to key clients by forwarding headers (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let cors_origins = lookup("CANVAS_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let rate_limit_enabled = lookup("CANVAS_RATE_LIMIT_ENABLED")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            cors_origins,
            cors_max_age_secs: parse_or(&lookup, "CANVAS_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs),
            rate_limit_enabled,
            rate_limit_per_minute: parse_or(
                &lookup,
                "CANVAS_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            rate_limit_burst: parse_or(&lookup, "CANVAS_RATE_LIMIT_BURST", defaults.rate_limit_burst),
            max_body_bytes: parse_or(&lookup, "CANVAS_MAX_BODY_BYTES", defaults.max_body_bytes),
            trust_forwarded_headers: lookup("CANVAS_TRUST_FORWARDED_HEADERS")
                .map(|s| s.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.trust_forwarded_headers),
        }
    }

    pub fn client_ip_source(&self) -> ClientIpSource {
        ClientIpSource::from_trust(self.trust_forwarded_headers)
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

// ============================================================================
// OBSERVER LIMITS
// ============================================================================

/// Connection caps and timers for the observer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverLimits {
    /// Global cap on live observer subscriptions.
    pub max_connections: usize,
    /// Cap on live subscriptions sharing one origin IP.
    pub max_per_origin: usize,
    /// Subscriptions are force-closed after this long.
    pub max_lifetime: Duration,
    /// Interval between liveness pings and expiry sweeps.
    pub heartbeat: Duration,
    /// Events buffered per subscriber before it is dropped as slow.
    pub queue_depth: usize,
    /// Recent change events kept for the activity endpoint.
    pub activity_capacity: usize,
}

impl Default for ObserverLimits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_per_origin: 10,
            max_lifetime: Duration::from_secs(24 * 60 * 60),
            heartbeat: Duration::from_secs(30),
            queue_depth: 256,
            activity_capacity: 100,
        }
    }
}

impl ObserverLimits {
    /// Environment variables:
    /// - `CANVAS_WS_MAX_CONNECTIONS` (default: 10000)
    /// - `CANVAS_WS_MAX_PER_ORIGIN` (default: 10)
    /// - `CANVAS_WS_MAX_LIFETIME_SECS` (default: 86400)
    /// - `CANVAS_WS_HEARTBEAT_SECS` (default: 30)
    /// - `CANVAS_WS_QUEUE_DEPTH` (default: 256)
    /// - `CANVAS_ACTIVITY_CAPACITY` (default: 100)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            max_connections: parse_or(&lookup, "CANVAS_WS_MAX_CONNECTIONS", defaults.max_connections),
            max_per_origin: parse_or(&lookup, "CANVAS_WS_MAX_PER_ORIGIN", defaults.max_per_origin),
            max_lifetime: secs("CANVAS_WS_MAX_LIFETIME_SECS", defaults.max_lifetime),
            heartbeat: secs("CANVAS_WS_HEARTBEAT_SECS", defaults.heartbeat),
            queue_depth: parse_or(&lookup, "CANVAS_WS_QUEUE_DEPTH", defaults.queue_depth).max(1),
            activity_capacity: parse_or(
                &lookup,
                "CANVAS_ACTIVITY_CAPACITY",
                defaults.activity_capacity,
            ),
        }
    }
}

// ============================================================================
// STORAGE BACKEND
// ============================================================================

/// Which backend holds the grid and the agent directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process memory; nothing survives a restart.
    Memory,
    /// Embedded LMDB environment at `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
    /// PostgreSQL via [`crate::db::DbConfig`].
    Postgres,
}

impl StorageBackend {
    /// Environment variables:
    /// - `CANVAS_STORAGE`: `memory` | `lmdb` | `postgres` (default: memory)
    /// - `CANVAS_LMDB_PATH` (default: ./data/canvas.lmdb)
    /// - `CANVAS_LMDB_MAX_MB` (default: 1024)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup("CANVAS_STORAGE")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            Some("lmdb") => Self::Lmdb {
                path: lookup("CANVAS_LMDB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/canvas.lmdb")),
                max_size_mb: parse_or(&lookup, "CANVAS_LMDB_MAX_MB", 1024),
            },
            Some("postgres") | Some("postgresql") => Self::Postgres,
            Some("memory") | None => Self::Memory,
            Some(other) => {
                tracing::warn!(backend = other, "unknown CANVAS_STORAGE value, using memory");
                Self::Memory
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Lmdb { .. } => "lmdb",
            Self::Postgres => "postgres",
        }
    }
}
