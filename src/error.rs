use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::TransferState;

/// A failed call into the backend (network or I/O on the other side of the
/// gateway). Always recoverable: the registry retries on its next poll and a
/// workflow lets the user resubmit.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{command} failed: {message}")]
pub struct GatewayError {
    pub command: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(command: impl Into<String>, message: impl ToString) -> Self {
        Self {
            command: command.into(),
            message: message.to_string(),
        }
    }

    /// The backend bridge dropped its end of the channel.
    pub fn disconnected(command: impl Into<String>) -> Self {
        Self::new(command, "backend disconnected")
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Transient(#[from] GatewayError),
    #[error("an entry named {name:?} already exists in {folder:?}")]
    NameCollision { name: String, folder: String },
    #[error("invalid selection while {state:?}: {reason}")]
    InvalidSelection {
        state: TransferState,
        reason: String,
    },
}

impl WorkflowError {
    pub(crate) fn invalid(state: TransferState, reason: impl Into<String>) -> Self {
        Self::InvalidSelection {
            state,
            reason: reason.into(),
        }
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
