//! Error taxonomy for the workflow and the collaborator port.

use crate::model::{Notice, Operation};
use thiserror::Error;

/// Failure reported by a [`RenderService`](crate::service::RenderService) call.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The collaborator answered `ok: false`.
    #[error("{}", .message.as_deref().unwrap_or("rejected by rendering service"))]
    Rejected { message: Option<String> },

    /// Network, status or decoding failure before a reply could be read.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn rejected(message: Option<String>) -> Self {
        ServiceError::Rejected {
            message: message.filter(|m| !m.trim().is_empty()),
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A required session, sheet or column is missing; nothing was sent.
    #[error("{0}")]
    Precondition(String),

    /// The same operation is already in flight.
    #[error("{0} already in progress")]
    Busy(Operation),

    #[error("{message}")]
    Rejected { op: Operation, message: String },

    #[error("{op} failed: {source:#}")]
    Transport {
        op: Operation,
        #[source]
        source: anyhow::Error,
    },
}

impl WorkflowError {
    pub fn precondition(message: impl Into<String>) -> Self {
        WorkflowError::Precondition(message.into())
    }

    /// Map a collaborator failure, falling back to the per-operation message.
    pub fn from_service(op: Operation, err: ServiceError) -> Self {
        match err {
            ServiceError::Rejected { message } => WorkflowError::Rejected {
                op,
                message: message.unwrap_or_else(|| op.default_failure().to_string()),
            },
            ServiceError::Transport(source) => WorkflowError::Transport { op, source },
        }
    }

    /// Presentation-facing notification, or `None` for suppressed triggers.
    pub fn to_notice(&self) -> Option<Notice> {
        match self {
            WorkflowError::Precondition(msg) => Some(Notice::warning(msg.clone())),
            WorkflowError::Busy(_) => None,
            WorkflowError::Rejected { .. } | WorkflowError::Transport { .. } => {
                Some(Notice::error(self.to_string()))
            }
        }
    }
}
