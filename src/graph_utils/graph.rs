use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::visibility::Adjacency;
use crate::error::{ForestError, ForestResult};

// Basic type aliases for clarity
pub type NodeId = String;
pub type EdgeId = String;

/// Top-left anchor of a node box, in layout units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicNode {
    pub id: NodeId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub is_root: bool,
    /// Expected number of children; only drives the expand/collapse affordance.
    #[serde(default)]
    pub child_hint: u32,
    /// Cached layout output, always recomputable.
    #[serde(default)]
    pub position: Position,
}

impl TopicNode {
    pub fn new(id: impl Into<NodeId>, label: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            level,
            is_root: level == 0,
            child_hint: 0,
            position: Position::ORIGIN,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
}

impl TopicEdge {
    /// Parent -> child edge with the conventional `e-<source>-<target>` id.
    pub fn between(source: &str, target: &str) -> Self {
        Self {
            id: format!("e-{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

/// Immutable copy of the forest, the shape handed across component boundaries
/// and written by the persistent store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForestSnapshot {
    pub nodes: Vec<TopicNode>,
    pub edges: Vec<TopicEdge>,
}

impl ForestSnapshot {
    pub fn validate(&self) -> ForestResult<()> {
        validate_forest(self.nodes.iter(), self.edges.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// What `remove_subtree` took out of the forest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemovedBranch {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
}

/// The canonical node and edge collections of a session.
///
/// Insertion order is preserved; layout reads it to order siblings and
/// components, so the same forest always draws the same way.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopicForest {
    nodes: Vec<TopicNode>,
    edges: Vec<TopicEdge>,
}

impl TopicForest {
    // Instantiate a new, empty forest
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: ForestSnapshot) -> ForestResult<Self> {
        let mut forest = Self::new();
        forest.replace_all(snapshot.nodes, snapshot.edges)?;
        Ok(forest)
    }

    pub fn nodes(&self) -> &[TopicNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[TopicEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn get_node(&self, id: &str) -> Option<&TopicNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> ForestResult<&mut TopicNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| ForestError::NotFound(id.to_string()))
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.target == id)
            .map(|e| e.source.as_str())
    }

    pub fn children_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Labels from the component root down to `id`, inclusive.
    pub fn label_path(&self, id: &str) -> Vec<&str> {
        let adjacency = Adjacency::from_edges(&self.edges);
        let mut chain: Vec<&str> = adjacency.ancestors(id).into_iter().collect();
        chain.reverse();
        chain.push(id);
        chain
            .into_iter()
            .filter_map(|nid| self.get_node(nid).map(|n| n.label.as_str()))
            .collect()
    }

    pub fn add_nodes(&mut self, nodes: Vec<TopicNode>) -> ForestResult<()> {
        self.merge(nodes, Vec::new())
    }

    pub fn add_edges(&mut self, edges: Vec<TopicEdge>) -> ForestResult<()> {
        self.merge(Vec::new(), edges)
    }

    /// Adds nodes and edges together. Either all of them land or none do.
    pub fn merge(&mut self, nodes: Vec<TopicNode>, edges: Vec<TopicEdge>) -> ForestResult<()> {
        validate_forest(
            self.nodes.iter().chain(nodes.iter()),
            self.edges.iter().chain(edges.iter()),
        )?;
        self.nodes.extend(nodes);
        self.edges.extend(edges);
        Ok(())
    }

    /// Removes `root_id`, every descendant of it, and every edge touching a
    /// removed node (including the edge from `root_id`'s own parent).
    pub fn remove_subtree(&mut self, root_id: &str) -> ForestResult<RemovedBranch> {
        if !self.contains(root_id) {
            return Err(ForestError::NotFound(root_id.to_string()));
        }
        let doomed: HashSet<NodeId> = {
            let adjacency = Adjacency::from_edges(&self.edges);
            let mut ids: HashSet<NodeId> = adjacency
                .descendants(root_id)
                .into_iter()
                .map(str::to_string)
                .collect();
            ids.insert(root_id.to_string());
            ids
        };

        let mut removed = RemovedBranch::default();
        self.nodes.retain(|n| {
            if doomed.contains(&n.id) {
                removed.nodes.push(n.id.clone());
                false
            } else {
                true
            }
        });
        self.edges.retain(|e| {
            if doomed.contains(&e.source) || doomed.contains(&e.target) {
                removed.edges.push(e.id.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    /// Swaps the whole content for a validated replacement.
    pub fn replace_all(&mut self, nodes: Vec<TopicNode>, edges: Vec<TopicEdge>) -> ForestResult<()> {
        validate_forest(nodes.iter(), edges.iter())?;
        self.nodes = nodes;
        self.edges = edges;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }

    pub fn snapshot(&self) -> ForestSnapshot {
        ForestSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn update_node_label(&mut self, id: &str, new_label: String) -> ForestResult<()> {
        self.node_mut(id)?.label = new_label;
        Ok(())
    }

    pub fn set_position(&mut self, id: &str, position: Position) -> ForestResult<()> {
        self.node_mut(id)?.position = position;
        Ok(())
    }

    pub fn bump_child_hint(&mut self, id: &str, by: u32) -> ForestResult<()> {
        let node = self.node_mut(id)?;
        node.child_hint = node.child_hint.saturating_add(by);
        Ok(())
    }

    pub fn retract_child_hint(&mut self, id: &str, by: u32) -> ForestResult<()> {
        let node = self.node_mut(id)?;
        node.child_hint = node.child_hint.saturating_sub(by);
        Ok(())
    }

    /// Copies positions from a laid-out node list onto the stored nodes by id.
    pub fn apply_positions(&mut self, laid_out: &[TopicNode]) {
        let by_id: HashMap<&str, Position> = laid_out
            .iter()
            .map(|n| (n.id.as_str(), n.position))
            .collect();
        for node in &mut self.nodes {
            if let Some(p) = by_id.get(node.id.as_str()) {
                node.position = *p;
            }
        }
    }
}

/// Checks id uniqueness and the forest shape: no self-loops, no dangling
/// endpoints, at most one parent per node, no parent cycles.
fn validate_forest<'a>(
    nodes: impl Iterator<Item = &'a TopicNode>,
    edges: impl Iterator<Item = &'a TopicEdge>,
) -> ForestResult<()> {
    let mut node_ids: HashSet<&str> = HashSet::new();
    for node in nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(ForestError::DuplicateId(node.id.clone()));
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::new();
    let mut parent: HashMap<&str, &str> = HashMap::new();
    for edge in edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(ForestError::DuplicateId(edge.id.clone()));
        }
        let violation = |reason| ForestError::ForestViolation { edge: edge.id.clone(), reason };
        if edge.source == edge.target {
            return Err(violation("self-loop"));
        }
        if !node_ids.contains(edge.source.as_str()) || !node_ids.contains(edge.target.as_str()) {
            return Err(violation("dangling endpoint"));
        }
        if parent.insert(edge.target.as_str(), edge.source.as_str()).is_some() {
            return Err(violation("target already has a parent"));
        }
    }

    // With single parents, a cycle shows up as a parent chain that revisits itself.
    let mut settled: HashSet<&str> = HashSet::new();
    for &start in parent.keys() {
        let mut trail: HashSet<&str> = HashSet::new();
        let mut current = start;
        while !settled.contains(current) {
            if !trail.insert(current) {
                return Err(ForestError::ForestViolation {
                    edge: format!("into {}", current),
                    reason: "parent cycle",
                });
            }
            match parent.get(current) {
                Some(&p) => current = p,
                None => break,
            }
        }
        settled.extend(trail);
    }
    Ok(())
}
