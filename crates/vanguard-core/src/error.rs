use thiserror::Error;
use uuid::Uuid;

/// Workflow error taxonomy. Every variant carries a stable machine code so
/// the boundary can return structured errors without string matching.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("agent is {distance_m:.1}m from the customer location, allowed radius is {radius_m}m")]
    LocationRejected { distance_m: f64, radius_m: f64 },

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    StateConflict {
        message: String,
        blocking_task_ids: Vec<Uuid>,
    },

    #[error("store operation failed: {0}")]
    Store(String),
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
            blocking_task_ids: Vec::new(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::LocationRejected { .. } => "LOCATION_REJECTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::Store(_) => "STORE",
        }
    }
}
