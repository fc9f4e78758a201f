//! Error kinds for the Thai search proxy.
//!
//! Internal stages return these structured failures; nothing throws across
//! a component boundary. The HTTP layer is the only place that maps a kind
//! to a status code, via [`Error::http_status`].

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One row that failed dictionary validation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DictionaryRowError {
    /// Category name or array index identifying the offending row.
    pub row: String,
    pub surface: String,
    pub reason: String,
}

/// Main error type for the Thai search proxy.
#[derive(Debug, Error)]
pub enum Error {
    // -- User input ---------------------------------------------------------
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Compound not found: {0}")]
    CompoundNotFound(String),

    #[error("Duplicate compound surface: {0}")]
    DuplicateSurface(String),

    #[error("Unauthorized")]
    Unauthorized,

    // -- Dictionary ---------------------------------------------------------
    #[error("Dictionary load failed for {path}: {} invalid row(s)", rows.len())]
    DictionaryLoadFailed {
        path: String,
        rows: Vec<DictionaryRowError>,
    },

    #[error("Dictionary file unreadable: {0}")]
    DictionaryUnreadable(String),

    // -- Segmentation -------------------------------------------------------
    #[error("Segmenter failed: {0}")]
    SegmenterFailed(String),

    // -- Backend (per-variant) ----------------------------------------------
    #[error("Backend timed out after {0} ms")]
    BackendTimeout(u64),

    #[error("Backend unreachable: {0}")]
    BackendUnavailable(String),

    #[error("Backend returned HTTP {status}: {detail}")]
    BackendStatus { status: u16, detail: String },

    #[error("Variant rejected: executor queue full")]
    Backpressure,

    // -- Orchestration ------------------------------------------------------
    #[error("All query variants failed")]
    AllVariantsFailed,

    #[error("Request deadline of {0} ms exceeded")]
    DeadlineExceeded(u64),

    #[error("Service degraded: {0}")]
    Degraded(String),

    // -- Plumbing -----------------------------------------------------------
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable error code exposed in JSON error bodies.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::CompoundNotFound(_) => "NOT_FOUND",
            Self::DuplicateSurface(_) => "CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::DictionaryLoadFailed { .. } | Self::DictionaryUnreadable(_) => {
                "DICTIONARY_LOAD_FAILED"
            }
            Self::SegmenterFailed(_) => "SEGMENTER_FAILED",
            Self::BackendTimeout(_) => "BACKEND_TIMEOUT",
            Self::BackendUnavailable(_) | Self::AllVariantsFailed => {
                "SEARCH_BACKEND_UNAVAILABLE"
            }
            Self::BackendStatus { status, .. } => {
                if *status >= 500 {
                    "BACKEND_5XX"
                } else {
                    "BACKEND_4XX"
                }
            }
            Self::Backpressure => "BACKPRESSURE",
            Self::DeadlineExceeded(_) => "REQUEST_DEADLINE_EXCEEDED",
            Self::Degraded(_) => "DEGRADED",
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status for this kind. Applied by the server layer only.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Unauthorized => 401,
            Self::CompoundNotFound(_) => 404,
            Self::DuplicateSurface(_) => 409,
            Self::Backpressure => 429,
            Self::BackendUnavailable(_) | Self::AllVariantsFailed => 502,
            Self::Degraded(_) => 503,
            Self::BackendTimeout(_) | Self::DeadlineExceeded(_) => 504,
            // A backend 4xx means the proxy sent something the backend
            // rejected; surface it as an upstream failure, not user error.
            Self::BackendStatus { .. } => 502,
            Self::DictionaryLoadFailed { .. }
            | Self::DictionaryUnreadable(_)
            | Self::SegmenterFailed(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout(_)
                | Self::BackendUnavailable(_)
                | Self::BackendStatus { .. }
                | Self::Backpressure
                | Self::AllVariantsFailed
                | Self::DeadlineExceeded(_)
                | Self::Degraded(_)
        )
    }

    /// Structured details for the JSON error body, when the kind carries any.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::DictionaryLoadFailed { path, rows } => Some(serde_json::json!({
                "path": path,
                "rows": rows,
            })),
            Self::BackendStatus { status, detail } => Some(serde_json::json!({
                "backend_status": status,
                "detail": detail,
            })),
            Self::DeadlineExceeded(ms) => Some(serde_json::json!({ "deadline_ms": ms })),
            Self::BackendTimeout(ms) => Some(serde_json::json!({ "timeout_ms": ms })),
            _ => None,
        }
    }
}
