//! Error types for Land Report.
//!
//! Library crates use [`LandReportError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Land Report operations.
#[derive(Debug, thiserror::Error)]
pub enum LandReportError {
    /// Blank or unparseable parcel identifier (client error).
    #[error("invalid parcel identifier: {message}")]
    InvalidIdentifier { message: String },

    /// An upstream layer service failed or returned an unusable response.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    /// Every category came back empty after clipping.
    #[error("no features intersect {scope}")]
    NoIntersectingFeatures { scope: String },

    /// A clip or simplify step could not complete on the given geometry.
    ///
    /// Raised inside the clip engine only; callers there recover by
    /// falling back to the unclipped or unsimplified geometry.
    #[error("geometry repair failed: {0}")]
    GeometryRepair(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// KMZ / ZIP packaging error.
    #[error("archive error: {0}")]
    Archive(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LandReportError>;

impl LandReportError {
    /// Create an invalid-identifier error from any displayable message.
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            message: msg.into(),
        }
    }

    /// Create an upstream fetch error from any displayable message.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a not-found error for the given scope (a parcel id or a batch label).
    pub fn no_features(scope: impl Into<String>) -> Self {
        Self::NoIntersectingFeatures {
            scope: scope.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for the distinct not-found condition (HTTP 404 equivalent).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoIntersectingFeatures { .. })
    }

    /// `true` when the caller supplied bad input (HTTP 400 equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidIdentifier { .. })
    }
}
