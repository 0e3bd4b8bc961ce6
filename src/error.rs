use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or running the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No consumer roles were configured
    #[error("Cannot start pipeline with no consumer roles")]
    NoRoles,

    /// Two roles share a name
    #[error("Role '{0}' is declared more than once")]
    DuplicateRole(String),

    /// More than one role claims the same origin
    #[error("Origin '{origin}' is claimed by more than one role: {roles:?}")]
    OverlappingRoles {
        /// The origin both roles matched
        origin: String,
        /// Names of every role that matched
        roles: Vec<String>,
    },

    /// The record source root cannot be opened at all
    #[error("Record source '{}' cannot be opened: {source}", path.display())]
    SourceUnavailable {
        /// Root that was requested
        path: PathBuf,
        /// Underlying I/O failure
        source: io::Error,
    },

    /// A single origin failed to open or read
    #[error("Source error on '{origin}': {source}")]
    Source {
        /// Origin (file path) that failed
        origin: String,
        /// Underlying I/O failure
        source: io::Error,
    },

    /// A line exceeded the fixed payload limit
    #[error("Line from '{origin}' is {len} bytes, limit is {max}")]
    RecordTooLong {
        /// Origin of the line
        origin: String,
        /// Actual length in bytes
        len: usize,
        /// Configured limit in bytes
        max: usize,
    },

    /// Role handler failure
    #[error("Role handler failed: {0}")]
    HandlerError(String),

    /// Report generation failure
    #[error("Report error: {0}")]
    ReportError(String),

    /// The pipeline was cancelled while waiting
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// Every consumer is gone, so nothing can drain the buffer
    #[error("No consumers left alive")]
    NoConsumers,

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_roles_message() {
        let error = PipelineError::OverlappingRoles {
            origin: "data/tennis/atp_rankings_10s.csv".to_string(),
            roles: vec!["ppa".to_string(), "ranking-points".to_string()],
        };
        let msg = error.to_string();
        assert!(msg.contains("atp_rankings_10s.csv"));
        assert!(msg.contains("ranking-points"));
    }

    #[test]
    fn test_source_unavailable_message() {
        let error = PipelineError::SourceUnavailable {
            path: PathBuf::from("missing/data"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such directory"),
        };
        let msg = error.to_string();
        assert!(msg.contains("missing/data"));
        assert!(msg.contains("no such directory"));
    }
}
