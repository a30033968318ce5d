//! Run Errors
//!
//! One variant per pipeline stage. None of these are retried inside the
//! crate: the failing stage is logged and the error is returned to whoever
//! invoked the run.

use std::io::Error as IoError;

/// Error returned by a replication manifest run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Run configuration is missing or malformed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Key-value store query or pagination failed
    #[error("store query failed for partition {partition_key}: {source}")]
    StoreQuery {
        partition_key: String,
        #[source]
        source: IoError,
    },

    /// Manifest write to the object store failed
    #[error("manifest upload to {bucket}/{key} failed: {source}")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: IoError,
    },

    /// Control plane rejected the job or could not be reached
    #[error("batch job submission failed: {source}")]
    JobSubmission {
        #[source]
        source: IoError,
    },
}

impl RunError {
    /// Name of the stage that produced this error, used as a log field
    pub fn stage(&self) -> &'static str {
        match self {
            RunError::Config(_) => "config",
            RunError::StoreQuery { .. } => "collect",
            RunError::Upload { .. } => "upload",
            RunError::JobSubmission { .. } => "submit",
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_stage_names() {
        let err = RunError::Upload {
            bucket: "manifests".to_string(),
            key: "rule-1.csv".to_string(),
            source: IoError::new(ErrorKind::Other, "boom"),
        };
        assert_eq!(err.stage(), "upload");
        assert_eq!(RunError::Config("x".to_string()).stage(), "config");
    }

    #[test]
    fn test_display_includes_location() {
        let err = RunError::Upload {
            bucket: "manifests".to_string(),
            key: "rule-1.csv".to_string(),
            source: IoError::new(ErrorKind::PermissionDenied, "access denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("manifests/rule-1.csv"));
        assert!(msg.contains("access denied"));
    }
}
