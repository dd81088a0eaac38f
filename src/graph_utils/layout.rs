//! Layout Orchestrator.
//!
//! Visible nodes get a layered tree drawing: one rank per depth along the
//! flow axis, subtrees packed into disjoint blocks along the cross axis.
//! Hidden nodes take no space and are parked on their nearest visible
//! ancestor so a folded branch collapses into a single point.
//!
//! Everything is ordered by the forest's insertion order and uses plain
//! arithmetic, so the same input always yields bit-identical positions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::graph::{Position, TopicEdge, TopicNode};
use super::visibility::{Adjacency, IdSet};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutDirection {
    #[default]
    #[serde(rename = "LR")]
    LeftRight,
    #[serde(rename = "RL")]
    RightLeft,
    #[serde(rename = "TB")]
    TopBottom,
    #[serde(rename = "BT")]
    BottomTop,
}

impl LayoutDirection {
    fn is_horizontal(self) -> bool {
        matches!(self, LayoutDirection::LeftRight | LayoutDirection::RightLeft)
    }

    fn is_reversed(self) -> bool {
        matches!(self, LayoutDirection::RightLeft | LayoutDirection::BottomTop)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxSize {
    pub width: f64,
    pub height: f64,
}

impl BoxSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Tunable geometry. Box tiers must shrink with depth so the root stays dominant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutPolicy {
    /// Level 0.
    pub root_box: BoxSize,
    /// Level 1.
    pub branch_box: BoxSize,
    /// Level 2 and deeper.
    pub default_box: BoxSize,
    /// Gap between neighbouring ranks along the flow axis.
    pub rank_sep: f64,
    /// Gap between neighbouring subtrees along the cross axis.
    pub node_sep: f64,
    pub margin_x: f64,
    pub margin_y: f64,
    pub direction: LayoutDirection,
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        Self {
            root_box: BoxSize::new(280.0, 120.0),
            branch_box: BoxSize::new(220.0, 100.0),
            default_box: BoxSize::new(180.0, 80.0),
            rank_sep: 200.0,
            node_sep: 100.0,
            margin_x: 50.0,
            margin_y: 50.0,
            direction: LayoutDirection::LeftRight,
        }
    }
}

impl LayoutPolicy {
    pub fn box_for_level(&self, level: u32) -> BoxSize {
        match level {
            0 => self.root_box,
            1 => self.branch_box,
            _ => self.default_box,
        }
    }

    /// True when tiers shrink monotonically and every constant is a finite,
    /// non-negative number.
    pub fn is_valid(&self) -> bool {
        let tiers = [self.root_box, self.branch_box, self.default_box];
        let finite = tiers
            .iter()
            .flat_map(|b| [b.width, b.height])
            .chain([self.rank_sep, self.node_sep, self.margin_x, self.margin_y])
            .all(|v| v.is_finite() && v >= 0.0);
        finite
            && tiers
                .windows(2)
                .all(|w| w[0].width >= w[1].width && w[0].height >= w[1].height)
    }

    // (flow-axis thickness, cross-axis breadth) of a box
    fn extents(&self, size: BoxSize) -> (f64, f64) {
        if self.direction.is_horizontal() {
            (size.width, size.height)
        } else {
            (size.height, size.width)
        }
    }

    fn margins(&self) -> (f64, f64) {
        if self.direction.is_horizontal() {
            (self.margin_x, self.margin_y)
        } else {
            (self.margin_y, self.margin_x)
        }
    }
}

/// Lays out the whole node list.
///
/// Visible nodes are placed from the visible subgraph only; every hidden node
/// gets the anchor of its nearest visible ancestor, or the origin when it has
/// none. All other node attributes pass through untouched.
pub fn layout_forest(
    nodes: &[TopicNode],
    edges: &[TopicEdge],
    hidden: &IdSet,
    policy: &LayoutPolicy,
) -> Vec<TopicNode> {
    let visible: Vec<&TopicNode> = nodes.iter().filter(|n| !hidden.contains(&n.id)).collect();
    let centers = place_visible(&visible, edges, hidden, policy);

    // Center -> top-left anchor
    let anchors: HashMap<&str, Position> = visible
        .iter()
        .zip(centers)
        .map(|(node, (cx, cy))| {
            let size = policy.box_for_level(node.level);
            (node.id.as_str(), Position::new(cx - size.width / 2.0, cy - size.height / 2.0))
        })
        .collect();

    let adjacency = Adjacency::from_edges(edges);
    nodes
        .iter()
        .map(|node| {
            let position = match anchors.get(node.id.as_str()) {
                Some(p) => *p,
                None => adjacency
                    .ancestors(&node.id)
                    .into_iter()
                    .find_map(|a| anchors.get(a).copied())
                    .unwrap_or(Position::ORIGIN),
            };
            TopicNode { position, ..node.clone() }
        })
        .collect()
}

/// Jitter guard: true when any node's position differs (exact comparison) or
/// the node sets do not line up.
pub fn positions_changed(current: &[TopicNode], next: &[TopicNode]) -> bool {
    if current.len() != next.len() {
        return true;
    }
    let before: HashMap<&str, Position> = current.iter().map(|n| (n.id.as_str(), n.position)).collect();
    next.iter().any(|n| match before.get(n.id.as_str()) {
        Some(p) => p.x != n.position.x || p.y != n.position.y,
        None => true,
    })
}

/// Center point of every visible node, in the order of `visible`.
fn place_visible(
    visible: &[&TopicNode],
    edges: &[TopicEdge],
    hidden: &IdSet,
    policy: &LayoutPolicy,
) -> Vec<(f64, f64)> {
    let count = visible.len();
    if count == 0 {
        return Vec::new();
    }
    let index: HashMap<&str, usize> = visible
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    // Visible-only adjacency; a second parent, if one ever sneaks in, is ignored
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut has_parent = vec![false; count];
    for edge in edges {
        if hidden.contains(&edge.source) || hidden.contains(&edge.target) {
            continue;
        }
        let (Some(&s), Some(&t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) else {
            continue;
        };
        if s == t || has_parent[t] {
            continue;
        }
        has_parent[t] = true;
        children[s].push(t);
    }

    // Spanning trees in preorder. Nodes only reachable through a cycle are
    // picked up as extra roots afterwards.
    let mut rank = vec![0usize; count];
    let mut tree_children: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut visited = vec![false; count];
    let mut roots: Vec<usize> = Vec::new();
    let mut preorder: Vec<usize> = Vec::with_capacity(count);
    let seeds = (0..count)
        .filter(|&i| !has_parent[i])
        .chain((0..count).filter(|&i| has_parent[i]));
    for seed in seeds {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        roots.push(seed);
        let mut stack = vec![seed];
        while let Some(node) = stack.pop() {
            preorder.push(node);
            for &child in &children[node] {
                if visited[child] {
                    continue;
                }
                visited[child] = true;
                rank[child] = rank[node] + 1;
                tree_children[node].push(child);
            }
            stack.extend(tree_children[node].iter().rev().copied());
        }
    }

    let extents: Vec<(f64, f64)> = visible
        .iter()
        .map(|n| policy.extents(policy.box_for_level(n.level)))
        .collect();

    // Flow axis: each rank is as thick as its thickest box
    let rank_count = rank.iter().max().map_or(0, |r| r + 1);
    let mut thickness = vec![0.0f64; rank_count];
    for (i, &r) in rank.iter().enumerate() {
        thickness[r] = thickness[r].max(extents[i].0);
    }
    let (margin_flow, margin_cross) = policy.margins();
    let mut rank_center = Vec::with_capacity(rank_count);
    let mut cursor = margin_flow;
    for &t in &thickness {
        rank_center.push(cursor + t / 2.0);
        cursor += t + policy.rank_sep;
    }
    let flow_extent = cursor - policy.rank_sep + margin_flow;

    // Cross axis, bottom-up: a subtree's block is wide enough for its own box
    // and for its children's blocks side by side.
    let mut block = vec![0.0f64; count];
    let mut center_in_block = vec![0.0f64; count];
    let mut offset_in_parent = vec![0.0f64; count];
    for &node in preorder.iter().rev() {
        let breadth = extents[node].1;
        let kids = &tree_children[node];
        if kids.is_empty() {
            block[node] = breadth;
            center_in_block[node] = breadth / 2.0;
            continue;
        }
        let kids_total: f64 =
            kids.iter().map(|&c| block[c]).sum::<f64>() + policy.node_sep * (kids.len() - 1) as f64;
        block[node] = breadth.max(kids_total);
        let mut start = (block[node] - kids_total) / 2.0;
        for &c in kids {
            offset_in_parent[c] = start;
            start += block[c] + policy.node_sep;
        }
        let first = kids[0];
        let last = kids[kids.len() - 1];
        let mid = (offset_in_parent[first] + center_in_block[first] + offset_in_parent[last] + center_in_block[last])
            / 2.0;
        center_in_block[node] = mid.clamp(breadth / 2.0, block[node] - breadth / 2.0);
    }

    // Top-down: components stack one after another, children inherit their
    // parent's block start.
    let mut block_start = vec![0.0f64; count];
    let mut cursor = margin_cross;
    for &root in &roots {
        block_start[root] = cursor;
        cursor += block[root] + policy.node_sep;
    }
    for &node in &preorder {
        for &c in &tree_children[node] {
            block_start[c] = block_start[node] + offset_in_parent[c];
        }
    }

    (0..count)
        .map(|i| {
            let mut flow = rank_center[rank[i]];
            if policy.direction.is_reversed() {
                flow = flow_extent - flow;
            }
            let cross = block_start[i] + center_in_block[i];
            if policy.direction.is_horizontal() {
                (flow, cross)
            } else {
                (cross, flow)
            }
        })
        .collect()
}
