//! Error types for the engine.
//!
//! One variant per error *kind*, each carrying the context needed to decide
//! how the caller should react.
//! [`IsRetryable`] gives the worker-level retry/no-retry answer; level and
//! group escalation in the scheduler is a separate, coarser retry that
//! happens regardless of this classification.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for the engine, one variant per §7 error kind.
#[derive(Debug, Error)]
pub enum Error {
    /// Transient network failure: connect/read/write timeout, reset, DNS.
    #[error("transient network error talking to {server}: {message}")]
    TransientNetwork {
        /// Host (or host:port) of the server involved.
        server: String,
        /// Human-readable detail from the underlying I/O or protocol layer.
        message: String,
    },

    /// Server rejected credentials.
    #[error("authentication failed for {server}")]
    AuthFailure {
        /// Host (or host:port) of the server that rejected the login.
        server: String,
    },

    /// Server reported the article does not exist (NNTP 430 or equivalent).
    #[error("article missing: {message_id} on {server}")]
    ArticleMissing {
        /// Usenet message-id that was requested.
        message_id: String,
        /// Server that reported the article missing.
        server: String,
    },

    /// The decoder ran out of input before `=yend`/`end` was seen.
    #[error("article incomplete: {message_id}")]
    ArticleIncomplete {
        /// Usenet message-id of the truncated article.
        message_id: String,
    },

    /// Computed CRC32 did not match the declared trailer CRC.
    #[error("CRC mismatch for {message_id}: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch {
        /// Usenet message-id of the article.
        message_id: String,
        /// CRC32 declared in the yEnc trailer.
        expected: u32,
        /// CRC32 actually computed over the decoded bytes.
        actual: u32,
    },

    /// Disk is full or nearly full.
    #[error("disk full writing {path}")]
    DiskFull {
        /// Path being written when the condition was detected.
        path: PathBuf,
    },

    /// Any other filesystem I/O failure.
    #[error("disk I/O error on {path}: {source}")]
    DiskIo {
        /// Path being operated on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unexpected NNTP protocol response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation was cancelled cooperatively; never a failure.
    #[error("cancelled")]
    Cancelled,

    /// Configuration is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the invalid setting.
        message: String,
        /// The configuration key that caused the error, if known.
        key: Option<String>,
    },

    /// Unrecoverable failure that should abort the process.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// NZB manifest could not be parsed.
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// Operation not supported (missing binary, feature not built).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Plain I/O error not already classified as disk-full/disk-io above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::DiskIo`] from a path and the underlying `io::Error`,
    /// reclassifying `ENOSPC` as [`Error::DiskFull`].
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::StorageFull {
            Error::DiskFull { path }
        } else {
            Error::DiskIo { path, source }
        }
    }

    /// The error kind name as used in logs and the RPC error surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TransientNetwork { .. } => "transient-network",
            Error::AuthFailure { .. } => "auth-failure",
            Error::ArticleMissing { .. } => "article-missing",
            Error::ArticleIncomplete { .. } => "article-incomplete",
            Error::CrcMismatch { .. } => "crc-mismatch",
            Error::DiskFull { .. } => "disk-full",
            Error::DiskIo { .. } => "disk-io",
            Error::Protocol(_) => "protocol",
            Error::Cancelled => "cancelled",
            Error::Config { .. } => "config",
            Error::Fatal(_) => "fatal",
            Error::InvalidNzb(_) => "config",
            Error::NotSupported(_) => "fatal",
            Error::Io(_) => "disk-io",
        }
    }

    /// Exit code contract from §6: 0 normal, non-zero on fatal init failure.
    /// Only meaningful for errors that can occur during startup.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => 2,
            Error::Fatal(_) => 1,
            Error::DiskIo { .. } | Error::DiskFull { .. } => 3,
            _ => 1,
        }
    }
}

/// Classifies whether a worker should retry the same (article, server) pair
/// immediately, versus record the failure and let the scheduler escalate
/// to another server/level.
pub trait IsRetryable {
    /// Returns `true` for failures that are worth a same-connection retry
    /// (e.g. a single dropped pipelined response), `false` when the
    /// scheduler should record a per-server failure and move on.
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientNetwork { .. } | Error::ArticleMissing { .. }
        )
    }
}

/// Logs a recoverable retry. Fixed at `debug`, the lowest level above
/// `trace` `tracing` offers for "this isn't a problem yet".
#[macro_export]
macro_rules! log_retry {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

/// Logs a lifecycle transition (queue, file, or NZB moving to a new state).
/// Fixed at `info`.
#[macro_export]
macro_rules! log_transition {
    ($($arg:tt)*) => { tracing::info!($($arg)*) };
}

/// Logs a failure the engine recovered from or gave up on without crashing
/// (exhausted retries, a skipped file, a failed snapshot write). Fixed at
/// `warn` — `error` is reserved for invariant violations.
#[macro_export]
macro_rules! log_failure {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable_identifiers() {
        assert_eq!(
            Error::TransientNetwork {
                server: "news.example".into(),
                message: "reset".into()
            }
            .kind(),
            "transient-network"
        );
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(
            Error::CrcMismatch {
                message_id: "<a@b>".into(),
                expected: 1,
                actual: 2
            }
            .kind(),
            "crc-mismatch"
        );
    }

    #[test]
    fn transient_network_and_article_missing_are_retryable() {
        assert!(Error::TransientNetwork {
            server: "s".into(),
            message: "m".into()
        }
        .is_retryable());
        assert!(Error::ArticleMissing {
            message_id: "<a@b>".into(),
            server: "s".into()
        }
        .is_retryable());
        assert!(!Error::CrcMismatch {
            message_id: "<a@b>".into(),
            expected: 0,
            actual: 1
        }
        .is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn disk_full_reclassified_from_raw_io_error() {
        let io_err = std::io::Error::from(std::io::ErrorKind::StorageFull);
        let err = Error::from_io("/tmp/x", io_err);
        assert!(matches!(err, Error::DiskFull { .. }));
    }

    #[test]
    fn config_error_exits_non_zero() {
        let err = Error::Config {
            message: "bad port".into(),
            key: Some("server.port".into()),
        };
        assert_ne!(err.exit_code(), 0);
    }
}
