//! Error types and result alias.
//!
//! Every failure the generation-and-audit pipeline can produce maps to one
//! [`QrApiError`] variant. Each variant carries its own classification: client
//! errors ([`QrApiError::MissingField`], [`QrApiError::InvalidBody`],
//! [`QrApiError::EncodingFailure`]) never reach the artifact store or the
//! audit log, server errors are reported with a 5xx status.
//!
//! # Example
//!
//! ```
//! use qrcode_api::{QrApiError, Result};
//!
//! fn require(target: &str) -> Result<()> {
//!     if target.is_empty() {
//!         return Err(QrApiError::missing_field("target"));
//!     }
//!     Ok(())
//! }
//!
//! let err = require("").unwrap_err();
//! assert!(err.is_client_error());
//! assert_eq!(err.status_code(), 400);
//! ```

use std::{io, path::PathBuf};

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QrApiError>;

/// Errors produced while generating, persisting or listing QR codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QrApiError {
    /// A required request field was empty or absent.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the field that was missing.
        field: &'static str,
    },

    /// The request body could not be decoded.
    #[error("invalid request body: {message}")]
    InvalidBody {
        /// Decoder message.
        message: String,
    },

    /// The target does not fit in a QR symbol at the fixed correction level,
    /// or the symbol does not fit in the configured image size.
    #[error("encoding failed: {message}")]
    EncodingFailure {
        /// What exceeded which limit.
        message: String,
    },

    /// Reading or writing an artifact or the audit log failed.
    #[error("I/O failure on {}: {source}", path.display())]
    IoFailure {
        /// The file the operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A row of the audit log could not be parsed during replay.
    #[error("malformed audit log at row {row} (line {line}): {reason}")]
    MalformedLog {
        /// 1-based row number of the first bad row.
        row: usize,
        /// 1-based line the bad row starts on.
        line: usize,
        /// Why the row was rejected.
        reason: String,
    },

    /// The request did not complete before its deadline.
    #[error("request exceeded its {timeout_ms} ms deadline")]
    Timeout {
        /// The configured deadline.
        timeout_ms: u64,
    },

    /// An unexpected failure inside the service.
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl QrApiError {
    /// Creates a `MissingField` error.
    #[must_use]
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Creates an `InvalidBody` error.
    #[must_use]
    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::InvalidBody { message: message.into() }
    }

    /// Creates an `EncodingFailure` error.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailure { message: message.into() }
    }

    /// Creates an `IoFailure` error for the given path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::IoFailure { path: path.into(), source }
    }

    /// Creates a `MalformedLog` error for a 1-based row and the line it starts on.
    #[must_use]
    pub fn malformed_log(row: usize, line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedLog { row, line, reason: reason.into() }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Creates a `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::InvalidBody { .. } | Self::EncodingFailure { .. }
        )
    }

    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingField { .. } | Self::InvalidBody { .. } => 400,
            Self::EncodingFailure { .. } => 422,
            Self::Timeout { .. } => 503,
            Self::IoFailure { .. }
            | Self::MalformedLog { .. }
            | Self::Internal { .. }
            | Self::Config { .. } => 500,
        }
    }

    /// User-level status message for the error envelope.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::MissingField { .. } | Self::InvalidBody { .. } => "Invalid request.",
            Self::EncodingFailure { .. } => "Unable to encode target.",
            Self::MalformedLog { .. } => "Audit log is unreadable.",
            Self::Timeout { .. } => "Request timed out.",
            Self::IoFailure { .. } | Self::Internal { .. } | Self::Config { .. } => {
                "Internal server error."
            }
        }
    }

    /// Application-specific error code for the error envelope.
    pub fn app_code(&self) -> i64 {
        match self {
            Self::MissingField { .. } => 1001,
            Self::InvalidBody { .. } => 1002,
            Self::EncodingFailure { .. } => 1003,
            Self::IoFailure { .. } => 2001,
            Self::MalformedLog { .. } => 2002,
            Self::Timeout { .. } => 2003,
            Self::Config { .. } => 2004,
            Self::Internal { .. } => 2005,
        }
    }
}
