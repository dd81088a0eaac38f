//! Topic-Loom: visibility and layout engine for an exploratory topic forest.
//!
//! A session grows a forest of topic nodes by asking a [`knowledge::KnowledgeSource`]
//! for child topics, folds and unfolds branches, and hands an annotated,
//! laid-out view to whatever draws it.

pub mod error;
pub mod explorer;
pub mod export;
pub mod graph_utils;
pub mod knowledge;
pub mod persistence;

pub use error::{ForestError, ForestResult};
pub use explorer::{ExpansionOutcome, Explorer, PendingExpansion};
pub use graph_utils::graph::{EdgeId, ForestSnapshot, NodeId, Position, TopicEdge, TopicForest, TopicNode};
pub use graph_utils::layout::{LayoutDirection, LayoutPolicy};
