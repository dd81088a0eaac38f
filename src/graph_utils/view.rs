use serde::Serialize;

use super::graph::{TopicEdge, TopicNode};
use super::visibility::IdSet;

/// What a node's toggle control should offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    /// No known children yet: ask the knowledge source for some.
    Explore,
    /// Children are folded away.
    Reveal,
    /// Children are showing.
    Collapse,
}

/// Focus highlighting. `Normal` whenever no focus is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emphasis {
    Normal,
    Connected,
    Dimmed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: TopicNode,
    pub hidden: bool,
    pub collapsed: bool,
    pub affordance: Affordance,
    pub emphasis: Emphasis,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EdgeView {
    #[serde(flatten)]
    pub edge: TopicEdge,
    pub hidden: bool,
    pub emphasis: Emphasis,
}

/// Everything a renderer needs for one refresh.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ForestView {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    pub focus: Option<String>,
    pub busy: bool,
}

impl ForestView {
    pub fn build(
        nodes: &[TopicNode],
        edges: &[TopicEdge],
        collapsed: &IdSet,
        hidden: &IdSet,
        focus: Option<&str>,
        connected: &IdSet,
        busy: bool,
    ) -> Self {
        let emphasis_of = |related: bool| match (focus, related) {
            (None, _) => Emphasis::Normal,
            (Some(_), true) => Emphasis::Connected,
            (Some(_), false) => Emphasis::Dimmed,
        };

        let nodes = nodes
            .iter()
            .map(|n| {
                let is_collapsed = collapsed.contains(&n.id);
                let affordance = if n.child_hint == 0 {
                    Affordance::Explore
                } else if is_collapsed {
                    Affordance::Reveal
                } else {
                    Affordance::Collapse
                };
                NodeView {
                    node: n.clone(),
                    hidden: hidden.contains(&n.id),
                    collapsed: is_collapsed,
                    affordance,
                    emphasis: emphasis_of(connected.contains(&n.id)),
                }
            })
            .collect();

        let edges = edges
            .iter()
            .map(|e| EdgeView {
                edge: e.clone(),
                hidden: hidden.contains(&e.source) || hidden.contains(&e.target),
                emphasis: emphasis_of(connected.contains(&e.source) && connected.contains(&e.target)),
            })
            .collect();

        Self {
            nodes,
            edges,
            focus: focus.map(str::to_string),
            busy,
        }
    }

    pub fn visible_nodes(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.iter().filter(|n| !n.hidden)
    }

    pub fn node(&self, id: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.node.id == id)
    }
}
