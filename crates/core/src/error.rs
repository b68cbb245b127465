//! The VergeDB error taxonomy.
//!
//! `VergeError` groups every failure mode named in the error handling
//! design into six categories — Validation, NotFound, Conflict,
//! Transient, Durable, Integrity — each carrying an [`ErrorCode`] so
//! callers can match on the stable wire-visible code without parsing
//! the display string.
//!
//! ## Usage
//!
//! ```
//! use verge_core::{VergeError, ErrorCode};
//!
//! fn handle(err: &VergeError) {
//!     if err.is_retryable() {
//!         // backoff and retry
//!     } else if err.is_fatal() {
//!         // degrade: serve reads, refuse writes
//!     }
//! }
//! ```

use thiserror::Error;

/// Result alias for fallible VergeDB operations.
pub type VergeResult<T> = Result<T, VergeError>;

/// Stable, wire-visible error code. Matches the identifiers named in
/// the error handling design verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Collection name failed `[A-Za-z0-9_]+` validation.
    InvalidCollectionName,
    /// A required field was missing from a request.
    MissingField,
    /// A CRDT path expression was malformed or addressed the wrong type.
    BadPath,
    /// `(collection, docId)` does not exist.
    DocNotFound,
    /// A collection has never been written to.
    CollectionEmpty,
    /// Caller supplied a `timestamp` older than the server's retained op.
    ConcurrentWriteRejected,
    /// A shard's worker is backed up; retry with backoff.
    ShardBusy,
    /// WAL append failed but the caller should retry.
    WalAppendFailedRetryable,
    /// WAL append failed unrecoverably; the write was not accepted.
    WalAppendFailedFatal,
    /// A shard commit broke per-batch atomicity; fatal, must crash-recover.
    ShardCommitViolatedAtomicity,
    /// The same `op_id` was observed twice outside the idempotence window.
    AppliedOpCollision,
    /// An incoming vector clock regressed relative to what was already observed.
    ClockRegression,
}

impl ErrorCode {
    /// The wire-visible snake_case identifier for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCollectionName => "invalid_collection_name",
            ErrorCode::MissingField => "missing_field",
            ErrorCode::BadPath => "bad_path",
            ErrorCode::DocNotFound => "doc_not_found",
            ErrorCode::CollectionEmpty => "collection_empty",
            ErrorCode::ConcurrentWriteRejected => "concurrent_write_rejected",
            ErrorCode::ShardBusy => "shard_busy",
            ErrorCode::WalAppendFailedRetryable => "wal_append_failed_retryable",
            ErrorCode::WalAppendFailedFatal => "wal_append_failed_fatal",
            ErrorCode::ShardCommitViolatedAtomicity => "shard_commit_violated_atomicity",
            ErrorCode::AppliedOpCollision => "applied_op_collision",
            ErrorCode::ClockRegression => "clock_regression",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error type for all VergeDB core operations.
#[derive(Debug, Error)]
pub enum VergeError {
    /// Caller error: rejected synchronously, never broadcast.
    #[error("validation failed ({code}): {message}")]
    Validation {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Per-op, surfaced in the op result; not fatal.
    #[error("not found ({code}): {message}")]
    NotFound {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Only possible when a client's `timestamp` is older than a
    /// retained op; recorded, server-preferred value wins.
    #[error("conflict ({code}): {message}")]
    Conflict {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Retried with exponential backoff, capped at a per-op budget.
    #[error("transient ({code}): {message}")]
    Transient {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// The operation was NOT accepted. May force a degraded state.
    #[error("durable failure ({code}): {message}")]
    Durable {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Logged, the offending op is dropped; the system stays live.
    #[error("integrity violation ({code}): {message}")]
    Integrity {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Wrapped I/O failure (WAL file, shard store file operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VergeError {
    /// Construct a [`VergeError::Validation`].
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        VergeError::Validation {
            code,
            message: message.into(),
        }
    }

    /// Construct a [`VergeError::NotFound`].
    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        VergeError::NotFound {
            code,
            message: message.into(),
        }
    }

    /// Construct a [`VergeError::Conflict`].
    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        VergeError::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Construct a [`VergeError::Transient`].
    pub fn transient(code: ErrorCode, message: impl Into<String>) -> Self {
        VergeError::Transient {
            code,
            message: message.into(),
        }
    }

    /// Construct a [`VergeError::Durable`].
    pub fn durable(code: ErrorCode, message: impl Into<String>) -> Self {
        VergeError::Durable {
            code,
            message: message.into(),
        }
    }

    /// Construct a [`VergeError::Integrity`].
    pub fn integrity(code: ErrorCode, message: impl Into<String>) -> Self {
        VergeError::Integrity {
            code,
            message: message.into(),
        }
    }

    /// The stable error code, if this variant carries one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            VergeError::Validation { code, .. }
            | VergeError::NotFound { code, .. }
            | VergeError::Conflict { code, .. }
            | VergeError::Transient { code, .. }
            | VergeError::Durable { code, .. }
            | VergeError::Integrity { code, .. } => Some(*code),
            VergeError::Io(_) => None,
        }
    }

    /// Whether the caller should retry this operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VergeError::Transient { .. })
    }

    /// Whether this error means the write was not accepted and the
    /// server may need to enter a degraded (read-only) state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VergeError::Durable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_as_str_matches_spec_identifiers() {
        assert_eq!(ErrorCode::DocNotFound.as_str(), "doc_not_found");
        assert_eq!(
            ErrorCode::ConcurrentWriteRejected.as_str(),
            "concurrent_write_rejected"
        );
    }

    #[test]
    fn transient_errors_are_retryable_only() {
        let err = VergeError::transient(ErrorCode::ShardBusy, "busy");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn durable_errors_are_fatal_only() {
        let err = VergeError::durable(ErrorCode::WalAppendFailedFatal, "disk full");
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn code_accessor_returns_none_for_io_errors() {
        let err: VergeError = std::io::Error::new(std::io::ErrorKind::Other, "x").into();
        assert_eq!(err.code(), None);
    }
}
