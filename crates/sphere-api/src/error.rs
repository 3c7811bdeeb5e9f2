//! Error types for sphere-api.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for sphere-api operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors reported by a virtualization client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Host unreachable or the session could not be established
    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// Server rejected the supplied credentials
    #[error("authentication failed for user {user} on {host}")]
    Authentication { host: String, user: String },

    /// Session was disconnected or its authentication lapsed
    #[error("session to {0} is not connected")]
    NotConnected(String),

    /// No VM registered under the display name
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// Named snapshot does not exist, or the VM has no current snapshot
    #[error("snapshot not found on VM {vm}: {snapshot}")]
    SnapshotNotFound { vm: String, snapshot: String },

    /// Operation not allowed in the VM's current power state
    #[error("invalid power state for VM {vm}: expected {expected}, got {actual}")]
    InvalidPowerState {
        vm: String,
        expected: String,
        actual: String,
    },

    /// Guest tools are not running inside the VM
    #[error("VMware tools not running in VM {0}")]
    ToolsNotRunning(String),

    /// Guest operation attempted without a valid guest login
    #[error("guest authentication required or rejected for VM {0}")]
    GuestAuth(String),

    /// Guest file or directory operation failed
    #[error("guest file operation failed on {path}: {reason}")]
    GuestFile { path: String, reason: String },

    /// No guest process with the given pid
    #[error("guest process not found: {0}")]
    ProcessNotFound(i64),

    /// Remote call did not complete in time
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Host-side I/O error (file transfer)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Shorthand for a [`ApiError::GuestFile`] error.
    pub fn guest_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GuestFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the not-found family (unknown VM, snapshot, process).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::VmNotFound(_) | Self::SnapshotNotFound { .. } | Self::ProcessNotFound(_)
        )
    }
}
