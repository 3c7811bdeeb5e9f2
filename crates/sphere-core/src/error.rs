//! Error types for sphere-core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for sphere-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by keyword operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error reported by the virtualization client
    #[error(transparent)]
    Api(#[from] sphere_api::ApiError),

    /// No connection is current
    #[error("no open connection; open one or switch to an existing one first")]
    NoConnection,

    /// Index or alias does not name a registered connection
    #[error("non-existing index or alias '{0}'")]
    ConnectionNotFound(String),

    /// Keyword argument rejected before any remote call
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// Invalid library configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Guest process table in an unexpected state while waiting for a process
    #[error("guest process {pid} in unexpected state: {reason}")]
    ProcessState { pid: i64, reason: String },

    /// Guest process still running when the wait limit was reached
    #[error("guest process {pid} did not finish within {elapsed:?}")]
    PollTimeout { pid: i64, elapsed: Duration },
}

impl CoreError {
    /// True for the not-found family: unknown connection, VM, snapshot or process.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ConnectionNotFound(_) => true,
            Self::Api(e) => e.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sphere_api::ApiError;

    #[test]
    fn test_api_error_is_transparent() {
        let err: CoreError = ApiError::VmNotFound("web01".into()).into();
        assert_eq!(err.to_string(), "VM not found: web01");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_connection_not_found_display() {
        let err = CoreError::ConnectionNotFound("backup".into());
        assert_eq!(err.to_string(), "non-existing index or alias 'backup'");
        assert!(err.is_not_found());
        assert!(!CoreError::NoConnection.is_not_found());
    }
}
