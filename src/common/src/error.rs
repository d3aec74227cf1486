//! Error type shared by every datarepo crate.
//!
//! There is exactly one error type. What a caller needs to decide (retry,
//! ignore, give up) is carried by the closed [`ErrorKind`] enumeration; the
//! message and optional source are for humans and logs. Mapping to a
//! transport status happens at the outermost boundary only.

use std::fmt;

/// The result type used throughout datarepo.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transaction abort, contention or a transient network failure.
    Retryable,
    /// The entry or resource does not exist.
    NotFound,
    /// A lock is held by a different workflow.
    Conflict,
    /// Persisted state violates an invariant.
    Corruption,
    /// The request itself is malformed.
    InvalidInput,
    /// A bulk operation stopped early because shutdown was requested.
    Interrupted,
    /// Anything else; not retried at this layer.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Corruption => "corruption",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// A datarepo error.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Corruption is never repaired automatically, so it is always logged loudly.
    pub fn corruption(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("Corrupt repository state detected: {message}");
        Self::new(ErrorKind::Corruption, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interrupted, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the orchestration engine should try the enclosing step again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Retryable | ErrorKind::Conflict | ErrorKind::Interrupted
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Convert into a fatal error, keeping the message. Used once local
    /// retries are exhausted.
    pub fn into_fatal(self, context: &str) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: format!("{context}: {}", self.message),
            source: self.source,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorKind::Retryable,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // PostgreSQL serialization_failure / deadlock_detected
                Some("40001") | Some("40P01") => ErrorKind::Retryable,
                // SQLITE_BUSY / SQLITE_LOCKED / SQLITE_BUSY_SNAPSHOT
                Some("5") | Some("6") | Some("517") => ErrorKind::Retryable,
                _ if db_err.is_unique_violation() => ErrorKind::Conflict,
                _ => ErrorKind::Fatal,
            },
            _ => ErrorKind::Fatal,
        };
        let message = err.to_string();
        Self::with_source(kind, message, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        let message = format!("undecodable document: {err}");
        Self::with_source(ErrorKind::Corruption, message, err)
    }
}
