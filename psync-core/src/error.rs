//! Error taxonomy for lifecycle operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Lifecycle operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Failure reported by the remote API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Error surfaced by a [`crate::Driver`] operation.
///
/// Every variant carries the resource id (when one was assigned) and the last
/// state observed, so callers can decide whether to rerun the reconciliation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{operation} of {} failed: {source}", .id.as_deref().unwrap_or("<unassigned>"))]
    Remote {
        operation: Operation,
        id: Option<String>,
        last_state: Option<String>,
        #[source]
        source: RemoteError,
    },

    #[error(
        "{operation} of {} reached unexpected state {state:?} (expected one of {expected:?})",
        .id.as_deref().unwrap_or("<unassigned>")
    )]
    UnexpectedState {
        operation: Operation,
        id: Option<String>,
        state: String,
        expected: Vec<String>,
    },

    #[error(
        "{operation} of {} timed out after {waited:?} (last state: {})",
        .id.as_deref().unwrap_or("<unassigned>"),
        .last_state.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        operation: Operation,
        id: Option<String>,
        last_state: Option<String>,
        waited: Duration,
    },

    #[error("{operation} of {} failed: resource not found", .id.as_deref().unwrap_or("<unassigned>"))]
    NotFound {
        operation: Operation,
        id: Option<String>,
    },
}

impl LifecycleError {
    /// True when the remote resource no longer exists. On Read this means the
    /// tracked record should be dropped.
    pub fn is_not_found(&self) -> bool {
        match self {
            LifecycleError::NotFound { .. } => true,
            LifecycleError::Remote { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LifecycleError::Timeout { .. })
    }

    pub fn operation(&self) -> Operation {
        match self {
            LifecycleError::Remote { operation, .. }
            | LifecycleError::UnexpectedState { operation, .. }
            | LifecycleError::Timeout { operation, .. }
            | LifecycleError::NotFound { operation, .. } => *operation,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            LifecycleError::Remote { id, .. }
            | LifecycleError::UnexpectedState { id, .. }
            | LifecycleError::Timeout { id, .. }
            | LifecycleError::NotFound { id, .. } => id.as_deref(),
        }
    }

    /// Last state observed before the failure, if any.
    pub fn last_state(&self) -> Option<&str> {
        match self {
            LifecycleError::Remote { last_state, .. } | LifecycleError::Timeout { last_state, .. } => {
                last_state.as_deref()
            }
            LifecycleError::UnexpectedState { state, .. } => Some(state),
            LifecycleError::NotFound { .. } => None,
        }
    }
}
