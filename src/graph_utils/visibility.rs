//! Visibility Engine.
//!
//! Pure functions over an edge list: which nodes a collapsed set hides, and
//! which nodes are related to a focused one. Every call builds its own
//! adjacency index and walks it iteratively with a visited set, so a
//! malformed edge list that slipped in a cycle still terminates.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::graph::{EdgeId, NodeId, TopicEdge};

/// Ordered id set; equality is by value, so callers can cheaply tell whether
/// a recomputation changed anything.
pub type IdSet = BTreeSet<NodeId>;

/// Outgoing and incoming neighbours of every node, borrowed from an edge list.
#[derive(Debug, Default)]
pub struct Adjacency<'a> {
    children: HashMap<&'a str, Vec<&'a str>>,
    parents: HashMap<&'a str, &'a str>,
}

impl<'a> Adjacency<'a> {
    pub fn from_edges(edges: &'a [TopicEdge]) -> Self {
        let mut adjacency = Adjacency::default();
        for edge in edges {
            adjacency
                .children
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
            // First incoming edge wins if the single-parent rule was ever broken
            adjacency
                .parents
                .entry(edge.target.as_str())
                .or_insert(edge.source.as_str());
        }
        adjacency
    }

    pub fn children(&self, id: &str) -> &[&'a str] {
        self.children.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: &str) -> Option<&'a str> {
        self.parents.get(id).copied()
    }

    /// Every node reachable from `id` by one or more outgoing edges.
    pub fn descendants(&self, id: &str) -> Vec<&'a str> {
        let mut seen: HashSet<&'a str> = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<&'a str> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Parent chain of `id`, nearest ancestor first.
    pub fn ancestors(&self, id: &str) -> Vec<&'a str> {
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(id);
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(p) = current {
            if !seen.insert(p) {
                break;
            }
            out.push(p);
            current = self.parent(p);
        }
        out
    }
}

/// Transitive descendants of every collapsed node.
///
/// Collapsed nodes themselves are not included unless another collapsed node
/// sits above them.
pub fn compute_hidden(edges: &[TopicEdge], collapsed: &IdSet) -> IdSet {
    let adjacency = Adjacency::from_edges(edges);
    let mut hidden = IdSet::new();
    let mut stack: Vec<&str> = Vec::new();
    for id in collapsed {
        stack.extend(adjacency.children(id));
        while let Some(next) = stack.pop() {
            if hidden.contains(next) {
                continue;
            }
            hidden.insert(next.to_string());
            stack.extend(adjacency.children(next));
        }
    }
    hidden
}

/// Edges with at least one hidden endpoint.
pub fn hidden_edges(edges: &[TopicEdge], hidden: &IdSet) -> BTreeSet<EdgeId> {
    edges
        .iter()
        .filter(|e| hidden.contains(&e.source) || hidden.contains(&e.target))
        .map(|e| e.id.clone())
        .collect()
}

/// The focused node with all of its ancestors and descendants, hidden or not.
pub fn compute_connected(edges: &[TopicEdge], focus: Option<&str>) -> IdSet {
    let Some(focus) = focus else {
        return IdSet::new();
    };
    let adjacency = Adjacency::from_edges(edges);
    let mut connected = IdSet::new();
    connected.insert(focus.to_string());
    connected.extend(adjacency.ancestors(focus).into_iter().map(str::to_string));
    connected.extend(adjacency.descendants(focus).into_iter().map(str::to_string));
    connected
}
