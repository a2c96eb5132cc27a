//! Error types for Graphsmith

use thiserror::Error;

/// Result type alias using Graphsmith's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error families used to decide how a pipeline stage reacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Schema or graph invariant broken; always surfaced
    Validation,
    /// Service hiccup; retried with backoff
    Transient,
    /// A single record could not be parsed; the record is dropped
    Parse,
    /// The task observed its cancellation flag
    Cancellation,
    /// Everything else
    Other,
}

/// Graphsmith error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Schema and graph validation errors (E001-E099)
    #[error("Schema violation on class '{class}': {reason}")]
    SchemaViolation { class: String, reason: String },

    #[error("Class '{0}' is not defined. Run `graphsmith stats` to see the known classes.")]
    UnknownClass(String),

    #[error("Class '{class}' has no property '{property}'.")]
    UnknownProperty { class: String, property: String },

    #[error("Entity '{0}' not found.")]
    EntityNotFound(String),

    #[error("Node '{0}' not found.")]
    NodeNotFound(String),

    // Text-generation service errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `echo $GRAPHSMITH_API_KEY`.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Text generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Transient service error: {0}")]
    Transient(String),

    #[error("Text generation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    // Parse errors (E200-E299)
    #[error("Malformed extraction record: {0}")]
    MalformedRecord(String),

    #[error("Smart merge response rejected: {0}")]
    MergeDowngrade(String),

    // Task errors (E300-E399)
    #[error("Task '{0}' not found. Run `graphsmith ingest` to create tasks.")]
    TaskNotFound(String),

    #[error("Task '{0}' was cancelled")]
    Cancelled(String),

    #[error("Task scheduler is not running")]
    SchedulerNotRunning,

    #[error("Task scheduler is already running")]
    SchedulerAlreadyRunning,

    // Storage errors (E400-E499)
    #[error("Snapshot corrupted: {0}")]
    SnapshotCorrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "E001",
            Self::UnknownClass(_) => "E002",
            Self::UnknownProperty { .. } => "E003",
            Self::EntityNotFound(_) => "E004",
            Self::NodeNotFound(_) => "E005",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::Timeout(_) => "E103",
            Self::Transient(_) => "E104",
            Self::RetriesExhausted { .. } => "E105",
            Self::MalformedRecord(_) => "E200",
            Self::MergeDowngrade(_) => "E201",
            Self::TaskNotFound(_) => "E300",
            Self::Cancelled(_) => "E301",
            Self::SchedulerNotRunning => "E302",
            Self::SchedulerAlreadyRunning => "E303",
            Self::SnapshotCorrupted(_) => "E400",
            Self::Serialization(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UnknownClass(_) => Some("graphsmith stats".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("export GRAPHSMITH_API_KEY=<key>".to_string()),
            Self::RetriesExhausted { .. } => {
                Some("graphsmith config set retry.max_attempts 5".to_string())
            }
            Self::SnapshotCorrupted(_) => {
                Some("Restore the snapshot from a backup or start a new one".to_string())
            }
            Self::ConfigError(_) => Some("graphsmith config list".to_string()),
            _ => None,
        }
    }

    /// Family of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaViolation { .. }
            | Self::UnknownClass(_)
            | Self::UnknownProperty { .. }
            | Self::EntityNotFound(_) => ErrorKind::Validation,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Transient(_) => ErrorKind::Transient,
            Self::NetworkError(err) if err.is_timeout() || err.is_connect() || err.is_request() => {
                ErrorKind::Transient
            }
            Self::MalformedRecord(_) => ErrorKind::Parse,
            Self::Cancelled(_) => ErrorKind::Cancellation,
            _ => ErrorKind::Other,
        }
    }

    /// Whether a retry of the same request could succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether this error is a schema/graph validation failure
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub(crate) fn schema_violation(class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            class: class.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_violation_error() {
        let error = Error::schema_violation("App", "property 'name' cannot be weakened");
        assert_eq!(error.code(), "E001");
        assert!(error.is_validation());
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("App"));
    }

    #[test]
    fn test_unknown_class_error() {
        let error = Error::UnknownClass("Flight".to_string());
        assert_eq!(error.code(), "E002");
        assert_eq!(error.suggestion(), Some("graphsmith stats".to_string()));
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Transient("502 bad gateway".into()).is_retryable());
        assert!(Error::Timeout(30).is_retryable());
        assert!(Error::RateLimited(5).is_retryable());
        assert!(!Error::LLMError("bad request".into()).is_retryable());
        assert!(
            !Error::RetriesExhausted {
                attempts: 3,
                last_error: "timeout".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_cancelled_error() {
        let error = Error::Cancelled("task-1".to_string());
        assert_eq!(error.code(), "E301");
        assert_eq!(error.kind(), ErrorKind::Cancellation);
        assert!(error.to_string().contains("task-1"));
    }

    #[test]
    fn test_malformed_record_is_parse_error() {
        let error = Error::MalformedRecord("entity|only-two".into());
        assert_eq!(error.kind(), ErrorKind::Parse);
        assert_eq!(error.code(), "E200");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: Error = io.into();
        assert_eq!(error.code(), "E9999");
        assert_eq!(error.kind(), ErrorKind::Other);
    }
}
