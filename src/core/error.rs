use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Agent not found: {0}")]
    AgentNotFound(crate::core::types::AgentId),

    #[error("Entity not found: {0}")]
    EntityNotFound(crate::core::types::EntityId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("State integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Causal edge may not point at its own cause: {0}")]
    SelfLoopEdge(crate::core::types::EventId),

    #[error("A pending decision is already open: {0:?}")]
    DecisionConflict(crate::core::types::DecisionId),

    #[error("No pending decision matches: {0:?}")]
    DecisionNotFound(crate::core::types::DecisionId),

    #[error("Pending decision expired with no default option: {0:?}")]
    DecisionExpired(crate::core::types::DecisionId),

    #[error("Decision backend error: {0}")]
    DecisionBackend(String),

    #[error("Doctrine retrieval error: {0}")]
    Retrieval(String),

    #[error("Turn cancelled by operator")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
