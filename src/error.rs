//! Central error types for the endpoint controller
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Central error type for the endpoint controller
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error from kube-rs
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Configuration error, e.g. a missing or empty targets annotation
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The record was modified since it was read
    #[error("Version conflict on endpoints {namespace}/{name}")]
    VersionConflict { name: String, namespace: String },

    /// Every retry of a conflicting write failed
    #[error("Gave up on endpoints {namespace}/{name} after {attempts} conflicting writes")]
    ConflictExhausted {
        name: String,
        namespace: String,
        attempts: u32,
    },

    /// Any other record store failure
    #[error("Record store error: {0}")]
    ApiError(String),

    /// HTTP client setup error (from reqwest)
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Failure modes of a single target probe.
///
/// The evaluator treats all of them the same way: the target is left out of
/// the healthy set.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{address}:{port} is unreachable: {reason}")]
    Unreachable {
        address: String,
        port: i32,
        reason: String,
    },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("status request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status endpoint returned HTTP {0}")]
    BadStatus(u16),

    #[error("malformed status payload: {0}")]
    Malformed(String),

    #[error("block height {0:?} is not a number")]
    InvalidHeight(String),
}

impl ProbeError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Unreachable { .. } => "unreachable",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::Http(_) => "http",
            ProbeError::BadStatus(_) => "bad_status",
            ProbeError::Malformed(_) => "malformed",
            ProbeError::InvalidHeight(_) => "invalid_height",
        }
    }
}

/// Result type alias for controller operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if this error type should trigger a retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::VersionConflict { .. } | Error::ApiError(_)
        )
    }

    /// Check if this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::VersionConflict { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    /// Convert to a human-readable message for events
    pub fn status_message(&self) -> String {
        match self {
            Error::KubeError(e) => format!("Kubernetes error: {}", e),
            Error::ConfigError(msg) => format!("Invalid configuration: {}", msg),
            Error::ConflictExhausted { attempts, .. } => {
                format!("Endpoints kept changing, gave up after {} attempts", attempts)
            }
            Error::HttpError(e) => format!("HTTP client error: {}", e),
            _ => self.to_string(),
        }
    }
}
