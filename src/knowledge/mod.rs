//! Knowledge Source contract.
//!
//! A knowledge source turns a topic into child topics. Seed calls return a
//! `root` plus two levels of `children`; expansion calls return `nodes`, each
//! optionally carrying one level of `children`. Transport errors are plain
//! `anyhow` errors; the explorer turns any of them into a soft failure.

#[cfg(feature = "ollama")]
pub mod ollama;

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ForestError, ForestResult};
use crate::graph_utils::graph::NodeId;

/// One generated topic. Missing fields are filled with defaults at merge time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, alias = "description")]
    pub desc: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<TopicEntry>>,
}

impl TopicEntry {
    pub fn new(label: &str, desc: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            desc: Some(desc.to_string()),
            children: None,
        }
    }

    pub fn with_children(mut self, children: Vec<TopicEntry>) -> Self {
        self.children = Some(children);
        self
    }

    pub fn child_entries(&self) -> &[TopicEntry] {
        self.children.as_deref().unwrap_or(&[])
    }
}

/// Raw generation result, either shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePayload {
    #[serde(default)]
    pub root: Option<TopicEntry>,
    #[serde(default)]
    pub children: Option<Vec<TopicEntry>>,
    #[serde(default)]
    pub nodes: Option<Vec<TopicEntry>>,
}

impl KnowledgePayload {
    pub fn seed(root: TopicEntry, children: Vec<TopicEntry>) -> Self {
        Self {
            root: Some(root),
            children: Some(children),
            nodes: None,
        }
    }

    pub fn expansion(nodes: Vec<TopicEntry>) -> Self {
        Self {
            root: None,
            children: None,
            nodes: Some(nodes),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpansionRequest {
    pub topic: String,
    /// Absent for a seed call.
    pub parent_id: Option<NodeId>,
    /// Ancestor labels of the parent joined with " > ", for disambiguation.
    pub path_context: Option<String>,
}

pub trait KnowledgeSource {
    fn expand(&self, request: &ExpansionRequest) -> anyhow::Result<KnowledgePayload>;
}

/// Parses a generation response.
///
/// The text is tried as JSON first; failing that, the outermost `{...}`
/// object embedded in it (chatty models like to wrap their JSON in prose).
pub fn parse_payload(text: &str) -> ForestResult<KnowledgePayload> {
    let trimmed = text.trim();
    match serde_json::from_str::<KnowledgePayload>(trimmed) {
        Ok(payload) => Ok(payload),
        Err(first) => {
            let embedded = match (trimmed.find('{'), trimmed.rfind('}')) {
                (Some(start), Some(end)) if start < end => &trimmed[start..=end],
                _ => return Err(ForestError::MalformedUpstreamPayload(first.to_string())),
            };
            serde_json::from_str::<KnowledgePayload>(embedded)
                .map_err(|e| ForestError::MalformedUpstreamPayload(e.to_string()))
        }
    }
}

/// Serves a canned payload from a JSON file, whatever the request.
#[derive(Clone, Debug)]
pub struct PayloadFileSource {
    pub path: PathBuf,
}

impl PayloadFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KnowledgeSource for PayloadFileSource {
    fn expand(&self, request: &ExpansionRequest) -> anyhow::Result<KnowledgePayload> {
        log::debug!("reading payload for '{}' from {}", request.topic, self.path.display());
        let text = fs::read_to_string(&self.path)?;
        Ok(parse_payload(&text)?)
    }
}
