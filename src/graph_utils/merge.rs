//! Expansion Merge Protocol.
//!
//! A generated payload is first turned into a self-contained [`ForestDelta`]
//! (fresh ids, wired edges, fold decisions) without touching the forest.
//! [`apply_delta`] then commits it in one step or not at all.

use super::graph::{NodeId, Position, TopicEdge, TopicForest, TopicNode};
use super::ids::{IdAllocator, IdRole};
use super::visibility::IdSet;
use crate::error::{ForestError, ForestResult};
use crate::knowledge::{KnowledgePayload, TopicEntry};

const CATEGORY_LABEL: &str = "Category";
const SUB_CATEGORY_LABEL: &str = "Sub-category";
const TOPIC_LABEL: &str = "Topic";
const DETAIL_LABEL: &str = "Detail";

/// Where new material attaches.
#[derive(Clone, Copy, Debug)]
pub enum MergeTarget<'a> {
    /// Fresh component under a synthetic root named after the topic.
    Seed { topic: &'a str },
    /// Children of an existing node.
    Parent(&'a TopicNode),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForestDelta {
    pub nodes: Vec<TopicNode>,
    pub edges: Vec<TopicEdge>,
    /// Ids to mark collapsed once merged.
    pub collapse: Vec<NodeId>,
    /// Existing parent that grows; it is unfolded and its child hint bumped.
    pub parent: Option<NodeId>,
    pub child_hint_bump: u32,
}

impl ForestDelta {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root of a seeded component.
    pub fn seed_root(&self) -> Option<&NodeId> {
        self.nodes.iter().find(|n| n.is_root).map(|n| &n.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added_nodes: usize,
    pub added_edges: usize,
    pub root: Option<NodeId>,
}

/// Builds the delta for a payload, checking that its shape fits the target.
pub fn delta_for(
    target: MergeTarget<'_>,
    payload: &KnowledgePayload,
    ids: &mut IdAllocator,
) -> ForestResult<ForestDelta> {
    match target {
        MergeTarget::Seed { topic } => {
            let root = payload.root.as_ref().ok_or_else(|| {
                ForestError::MalformedUpstreamPayload("seed response carries no root".into())
            })?;
            let categories = payload.children.as_deref().unwrap_or(&[]);
            Ok(seed_delta(topic, root, categories, ids))
        }
        MergeTarget::Parent(parent) => {
            let entries = payload.nodes.as_deref().ok_or_else(|| {
                ForestError::MalformedUpstreamPayload("expansion response carries no nodes".into())
            })?;
            if entries.is_empty() {
                return Err(ForestError::MalformedUpstreamPayload(
                    "expansion response has an empty nodes array".into(),
                ));
            }
            Ok(expansion_delta(parent, entries, ids))
        }
    }
}

fn entry_node(id: NodeId, entry: &TopicEntry, fallback_label: &str, level: u32, spawn: Position) -> TopicNode {
    TopicNode {
        id,
        label: entry.label.clone().unwrap_or_else(|| fallback_label.to_string()),
        description: entry.desc.clone().unwrap_or_default(),
        level,
        is_root: false,
        child_hint: entry.child_entries().len() as u32,
        position: spawn,
    }
}

/// Root (level 0) + categories (level 1) + their items (level 2). The root and
/// every category start collapsed, so only the root shows at first.
pub fn seed_delta(topic: &str, root: &TopicEntry, categories: &[TopicEntry], ids: &mut IdAllocator) -> ForestDelta {
    let mut delta = ForestDelta::default();
    let root_id = ids.next(IdRole::Root, &[]);
    delta.nodes.push(TopicNode {
        id: root_id.clone(),
        label: root.label.clone().unwrap_or_else(|| topic.to_string()),
        description: root.desc.clone().unwrap_or_default(),
        level: 0,
        is_root: true,
        child_hint: categories.len() as u32,
        position: Position::ORIGIN,
    });
    delta.collapse.push(root_id.clone());

    for (i, category) in categories.iter().enumerate() {
        let l1_id = ids.next(IdRole::Category, &[i]);
        delta.nodes.push(entry_node(l1_id.clone(), category, CATEGORY_LABEL, 1, Position::ORIGIN));
        delta.edges.push(TopicEdge::between(&root_id, &l1_id));
        delta.collapse.push(l1_id.clone());

        for (j, item) in category.child_entries().iter().enumerate() {
            let l2_id = ids.next(IdRole::Detail, &[i, j]);
            let mut node = entry_node(l2_id.clone(), item, SUB_CATEGORY_LABEL, 2, Position::ORIGIN);
            // Only two levels are generated on a seed
            node.child_hint = 0;
            delta.nodes.push(node);
            delta.edges.push(TopicEdge::between(&l1_id, &l2_id));
        }
    }
    delta
}

/// New siblings under `parent` (at `parent.level + 1`) with their own children
/// one level further down. New nodes spawn on the parent's anchor.
pub fn expansion_delta(parent: &TopicNode, entries: &[TopicEntry], ids: &mut IdAllocator) -> ForestDelta {
    let mut delta = ForestDelta {
        parent: Some(parent.id.clone()),
        child_hint_bump: entries.len() as u32,
        ..ForestDelta::default()
    };
    let spawn = parent.position;

    for (i, entry) in entries.iter().enumerate() {
        let top_id = ids.next(IdRole::Topic, &[i]);
        delta.nodes.push(entry_node(top_id.clone(), entry, TOPIC_LABEL, parent.level + 1, spawn));
        delta.edges.push(TopicEdge::between(&parent.id, &top_id));

        for (j, child) in entry.child_entries().iter().enumerate() {
            let child_id = ids.next(IdRole::Detail, &[i, j]);
            let mut node = entry_node(child_id.clone(), child, DETAIL_LABEL, parent.level + 2, spawn);
            node.child_hint = 0;
            delta.nodes.push(node);
            delta.edges.push(TopicEdge::between(&top_id, &child_id));
        }
    }
    delta
}

/// Commits a delta into the forest and the collapsed set.
///
/// On error neither is modified.
pub fn apply_delta(forest: &mut TopicForest, collapsed: &mut IdSet, delta: ForestDelta) -> ForestResult<MergeSummary> {
    if let Some(parent) = &delta.parent
        && !forest.contains(parent)
    {
        return Err(ForestError::NotFound(parent.clone()));
    }
    let summary = MergeSummary {
        added_nodes: delta.nodes.len(),
        added_edges: delta.edges.len(),
        root: delta.seed_root().cloned(),
    };

    forest.merge(delta.nodes, delta.edges)?;
    if let Some(parent) = &delta.parent {
        forest.bump_child_hint(parent, delta.child_hint_bump)?;
        collapsed.remove(parent);
    }
    collapsed.extend(delta.collapse);
    Ok(summary)
}
