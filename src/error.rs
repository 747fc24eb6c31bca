//! Error types for the query builder core.
//!
//! The builder itself performs no I/O; everything an engine can fail with is
//! carried by [`DbError`]. Only the not-found condition is ever interpreted
//! locally (by `first_or_create` / `first_or_update`); every other engine
//! error bubbles up to the caller unchanged.

use std::fmt;

/// Error type shared by the builder core and `DbProxy` engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// No record matched a `first` lookup. `code` is the per-model
    /// not-found error code supplied at `Model` construction (0 when the
    /// error originates inside an engine, before the model re-tags it).
    NotFound { code: i32, table: String },
    /// Any failure reported by the storage engine.
    Backend(String),
    /// Record marshaling/unmarshaling failure.
    Parse(String),
    /// The operation's context was cancelled before or during execution.
    Cancelled(String),
    /// The operation's context deadline passed before or during execution.
    DeadlineExceeded(String),
    /// Configuration could not be loaded.
    Config(String),
}

impl DbError {
    /// Whether this error is the not-found sentinel.
    ///
    /// This is the only condition the read-modify-write protocol branches
    /// on; see `Scope::first_or_create`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }

    /// Not-found error as produced by an engine, before a `Model` re-tags
    /// it with its own code.
    pub(crate) fn not_found(table: &str) -> Self {
        DbError::NotFound {
            code: 0,
            table: table.to_string(),
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::NotFound { code, table } => {
                write!(f, "record not found in `{table}` (code {code})")
            }
            DbError::Backend(msg) => write!(f, "backend error: {msg}"),
            DbError::Parse(msg) => write!(f, "parse error: {msg}"),
            DbError::Cancelled(msg) => write!(f, "operation cancelled: {msg}"),
            DbError::DeadlineExceeded(msg) => write!(f, "deadline exceeded: {msg}"),
            DbError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for DbError {
    fn from(err: config::ConfigError) -> Self {
        DbError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = DbError::not_found("user");
        assert!(err.is_not_found());
        assert!(!DbError::Backend("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_display_includes_table_and_code() {
        let err = DbError::NotFound {
            code: 5000,
            table: "user".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("user"));
        assert!(display.contains("5000"));
    }

    #[test]
    fn test_display_all_variants() {
        assert!(DbError::Backend("x".into()).to_string().contains("backend"));
        assert!(DbError::Parse("x".into()).to_string().contains("parse"));
        assert!(DbError::Cancelled("x".into()).to_string().contains("cancelled"));
        assert!(
            DbError::DeadlineExceeded("x".into())
                .to_string()
                .contains("deadline")
        );
        assert!(DbError::Config("x".into()).to_string().contains("config"));
    }
}
