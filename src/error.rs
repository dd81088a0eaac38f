use thiserror::Error;

use crate::graph_utils::graph::NodeId;

/// Failures recognised by the forest engine.
///
/// None of these end a session: every variant leaves the forest as it was
/// before the failing call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForestError {
    #[error("node not found: {0}")]
    NotFound(NodeId),

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("edge {edge} breaks the forest shape: {reason}")]
    ForestViolation { edge: String, reason: &'static str },

    #[error("malformed upstream payload: {0}")]
    MalformedUpstreamPayload(String),

    #[error("persisted state invalid: {0}")]
    PersistedStateInvalid(String),

    #[error("an expansion is already in flight")]
    Busy,

    #[error("topic is empty")]
    EmptyTopic,
}

pub type ForestResult<T> = Result<T, ForestError>;
