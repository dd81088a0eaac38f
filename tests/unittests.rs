use std::cell::RefCell;

use anyhow::anyhow;
use topic_loom::error::ForestError;
use topic_loom::explorer::{ExpansionOutcome, Explorer};
use topic_loom::export::{export_forest_csv, export_forest_json};
use topic_loom::graph_utils::graph::{ForestSnapshot, Position, TopicEdge, TopicForest, TopicNode};
use topic_loom::graph_utils::ids::{IdAllocator, IdRole};
use topic_loom::graph_utils::layout::{BoxSize, LayoutDirection, LayoutPolicy, layout_forest, positions_changed};
use topic_loom::graph_utils::merge::{MergeTarget, apply_delta, delta_for};
use topic_loom::graph_utils::view::{Affordance, Emphasis};
use topic_loom::graph_utils::visibility::{IdSet, compute_connected, compute_hidden, hidden_edges};
use topic_loom::knowledge::{ExpansionRequest, KnowledgePayload, KnowledgeSource, TopicEntry, parse_payload};
use topic_loom::persistence::persist::{FileStore, MemoryStore, PersistedForest, PersistentStore, StateFormat};
use topic_loom::persistence::settings::AppSettings;

fn node(id: &str, level: u32) -> TopicNode {
    TopicNode::new(id, id.to_uppercase(), level)
}

fn ids(list: &[&str]) -> IdSet {
    list.iter().map(|s| s.to_string()).collect()
}

// root -> a -> b -> c, plus an unrelated x -> y
fn chain_forest() -> TopicForest {
    let mut forest = TopicForest::new();
    forest
        .merge(
            vec![node("root", 0), node("a", 1), node("b", 2), node("c", 3), node("x", 0), node("y", 1)],
            vec![
                TopicEdge::between("root", "a"),
                TopicEdge::between("a", "b"),
                TopicEdge::between("b", "c"),
                TopicEdge::between("x", "y"),
            ],
        )
        .expect("valid forest");
    forest
}

struct Canned(KnowledgePayload);

impl KnowledgeSource for Canned {
    fn expand(&self, _request: &ExpansionRequest) -> anyhow::Result<KnowledgePayload> {
        Ok(self.0.clone())
    }
}

struct Unreachable;

impl KnowledgeSource for Unreachable {
    fn expand(&self, _request: &ExpansionRequest) -> anyhow::Result<KnowledgePayload> {
        Err(anyhow!("connection refused"))
    }
}

struct Recording {
    seen: RefCell<Vec<ExpansionRequest>>,
    payload: KnowledgePayload,
}

impl KnowledgeSource for Recording {
    fn expand(&self, request: &ExpansionRequest) -> anyhow::Result<KnowledgePayload> {
        self.seen.borrow_mut().push(request.clone());
        Ok(self.payload.clone())
    }
}

struct BrokenStore;

impl PersistentStore for BrokenStore {
    fn load(&self) -> anyhow::Result<Option<PersistedForest>> {
        Ok(None)
    }
    fn save(&self, _state: &PersistedForest) -> anyhow::Result<()> {
        Err(anyhow!("disk full"))
    }
    fn clear(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn seed_payload() -> KnowledgePayload {
    KnowledgePayload::seed(
        TopicEntry::new("X", "d"),
        vec![
            TopicEntry::new("A", "a").with_children(vec![TopicEntry::new("A1", "a1")]),
            TopicEntry::new("B", "b").with_children(vec![TopicEntry::new("B1", "b1")]),
        ],
    )
}

fn sibling_payload() -> KnowledgePayload {
    KnowledgePayload::expansion(vec![TopicEntry::new("S1", "one"), TopicEntry::new("S2", "two")])
}

fn explorer_with(store: &MemoryStore) -> Explorer {
    Explorer::open(Box::new(store.clone()), LayoutPolicy::default())
}

fn seeded() -> (Explorer, MemoryStore) {
    let store = MemoryStore::new();
    let mut explorer = explorer_with(&store);
    let outcome = explorer.expand(&Canned(seed_payload()), "X", None).expect("request accepted");
    assert!(matches!(outcome, ExpansionOutcome::Merged(_)));
    (explorer, store)
}

fn id_of(explorer: &Explorer, label: &str) -> String {
    explorer
        .forest()
        .nodes()
        .iter()
        .find(|n| n.label == label)
        .map(|n| n.id.clone())
        .unwrap_or_else(|| panic!("no node labelled {}", label))
}

fn position_of(explorer: &Explorer, id: &str) -> Position {
    explorer.forest().get_node(id).expect("node exists").position
}

// Parent with level 1 and no children yet, collapsed, under a root
const PARENT_DOC: &str = r#"{
    "nodes": [
        {"id": "r", "label": "R", "level": 0, "is_root": true, "child_hint": 1},
        {"id": "p", "label": "P", "level": 1, "child_hint": 0}
    ],
    "edges": [{"id": "e-r-p", "source": "r", "target": "p"}],
    "collapsed": ["p"]
}"#;

// ---- Graph Store ----

#[test]
fn forest_remove_subtree_cascades_nodes_and_edges() {
    let mut forest = chain_forest();
    let removed = forest.remove_subtree("a").expect("a exists");

    let mut gone = removed.nodes.clone();
    gone.sort();
    assert_eq!(gone, vec!["a", "b", "c"]);
    assert_eq!(removed.edges.len(), 3, "edge into a plus the two below it");
    assert!(forest.contains("root"));
    assert_eq!(forest.node_count(), 3);
    assert!(forest.edges().iter().all(|e| forest.contains(&e.source) && forest.contains(&e.target)));
    assert!(forest.children_of("root").is_empty());
}

#[test]
fn forest_remove_subtree_missing_root_is_not_found() {
    let mut forest = chain_forest();
    let before = forest.snapshot();
    assert_eq!(forest.remove_subtree("nope"), Err(ForestError::NotFound("nope".into())));
    assert_eq!(forest.snapshot(), before);
}

#[test]
fn forest_rejects_edges_that_break_the_shape() {
    let mut forest = chain_forest();
    let before = forest.snapshot();

    let second_parent = forest.add_edges(vec![TopicEdge::between("x", "b")]);
    assert!(matches!(second_parent, Err(ForestError::ForestViolation { .. })));

    let self_loop = forest.add_edges(vec![TopicEdge::between("c", "c")]);
    assert!(matches!(self_loop, Err(ForestError::ForestViolation { reason: "self-loop", .. })));

    let dangling = forest.add_edges(vec![TopicEdge::between("c", "ghost")]);
    assert!(matches!(dangling, Err(ForestError::ForestViolation { .. })));

    assert_eq!(forest.snapshot(), before);
}

#[test]
fn forest_merge_is_all_or_nothing() {
    let mut forest = chain_forest();
    let before = forest.snapshot();
    // The new node is fine, the second edge is a duplicate parent for it
    let result = forest.merge(
        vec![node("d", 4)],
        vec![TopicEdge::between("c", "d"), TopicEdge::between("y", "d")],
    );
    assert!(result.is_err());
    assert_eq!(forest.snapshot(), before);
    assert!(!forest.contains("d"));
}

#[test]
fn forest_add_nodes_rejects_duplicate_ids() {
    let mut forest = chain_forest();
    assert_eq!(forest.add_nodes(vec![node("a", 1)]), Err(ForestError::DuplicateId("a".into())));
}

#[test]
fn forest_replace_all_rejects_parent_cycles() {
    let mut forest = TopicForest::new();
    let result = forest.replace_all(
        vec![node("p", 1), node("q", 1)],
        vec![TopicEdge::between("p", "q"), TopicEdge::between("q", "p")],
    );
    assert!(matches!(result, Err(ForestError::ForestViolation { reason: "parent cycle", .. })));
    assert!(forest.is_empty());
}

#[test]
fn forest_label_path_walks_from_the_root() {
    let forest = chain_forest();
    assert_eq!(forest.label_path("c"), vec!["ROOT", "A", "B", "C"]);
    assert_eq!(forest.label_path("x"), vec!["X"]);
}

#[test]
fn id_allocator_never_repeats() {
    let mut allocator = IdAllocator::new();
    let mut seen = std::collections::HashSet::new();
    for i in 0..500 {
        assert!(seen.insert(allocator.next(IdRole::Topic, &[i % 3])));
    }
    assert_eq!(allocator.issued(), 500);
    assert!(allocator.next(IdRole::Root, &[]).starts_with("root-"));
}

// ---- Visibility Engine ----

#[test]
fn hidden_set_covers_descendants_but_not_the_collapsed_node() {
    let forest = chain_forest();
    let hidden = compute_hidden(forest.edges(), &ids(&["a"]));
    assert_eq!(hidden, ids(&["b", "c"]));

    let nested = compute_hidden(forest.edges(), &ids(&["a", "b"]));
    assert_eq!(nested, ids(&["b", "c"]));

    assert!(compute_hidden(forest.edges(), &IdSet::new()).is_empty());
}

#[test]
fn hidden_edges_touch_a_hidden_endpoint() {
    let forest = chain_forest();
    let hidden = compute_hidden(forest.edges(), &ids(&["a"]));
    let edges = hidden_edges(forest.edges(), &hidden);
    assert_eq!(edges, ids(&["e-a-b", "e-b-c"]));
}

#[test]
fn hidden_set_terminates_on_a_cycle() {
    let edges = vec![TopicEdge::between("p", "q"), TopicEdge::between("q", "p")];
    assert_eq!(compute_hidden(&edges, &ids(&["p"])), ids(&["p", "q"]));
}

#[test]
fn connected_set_is_lineage_of_the_focus() {
    let forest = chain_forest();
    let connected = compute_connected(forest.edges(), Some("b"));
    assert_eq!(connected, ids(&["root", "a", "b", "c"]));
    assert!(compute_connected(forest.edges(), None).is_empty());
}

// ---- Layout Orchestrator ----

#[test]
fn layout_places_root_and_children_in_ranks() {
    let mut forest = TopicForest::new();
    forest
        .merge(
            vec![node("r", 0), node("a", 1), node("b", 1)],
            vec![TopicEdge::between("r", "a"), TopicEdge::between("r", "b")],
        )
        .unwrap();
    let laid = layout_forest(forest.nodes(), forest.edges(), &IdSet::new(), &LayoutPolicy::default());

    assert_eq!(laid[0].position, Position::new(50.0, 140.0));
    assert_eq!(laid[1].position, Position::new(530.0, 50.0));
    assert_eq!(laid[2].position, Position::new(530.0, 250.0));
    // everything else passes through
    assert_eq!(laid[1].label, "A");
    assert_eq!(laid[1].level, 1);
}

#[test]
fn layout_top_bottom_swaps_axes() {
    let mut forest = TopicForest::new();
    forest
        .merge(
            vec![node("r", 0), node("a", 1), node("b", 1)],
            vec![TopicEdge::between("r", "a"), TopicEdge::between("r", "b")],
        )
        .unwrap();
    let policy = LayoutPolicy { direction: LayoutDirection::TopBottom, ..LayoutPolicy::default() };
    let laid = layout_forest(forest.nodes(), forest.edges(), &IdSet::new(), &policy);

    assert_eq!(laid[0].position, Position::new(180.0, 50.0));
    assert_eq!(laid[1].position, Position::new(50.0, 370.0));
    assert_eq!(laid[2].position, Position::new(370.0, 370.0));
}

#[test]
fn layout_right_left_mirrors_the_flow_axis() {
    let mut forest = TopicForest::new();
    forest.merge(vec![node("r", 0), node("a", 1)], vec![TopicEdge::between("r", "a")]).unwrap();
    let policy = LayoutPolicy { direction: LayoutDirection::RightLeft, ..LayoutPolicy::default() };
    let laid = layout_forest(forest.nodes(), forest.edges(), &IdSet::new(), &policy);
    assert!(laid[0].position.x > laid[1].position.x);
}

#[test]
fn layout_snaps_hidden_nodes_to_nearest_visible_ancestor() {
    let forest = chain_forest();
    let hidden = compute_hidden(forest.edges(), &ids(&["a"]));
    let laid = layout_forest(forest.nodes(), forest.edges(), &hidden, &LayoutPolicy::default());
    let pos = |id: &str| laid.iter().find(|n| n.id == id).unwrap().position;

    assert_eq!(pos("b"), pos("a"));
    assert_eq!(pos("c"), pos("a"));
    assert_ne!(pos("a"), pos("root"));
}

#[test]
fn layout_parks_orphaned_hidden_nodes_at_origin() {
    let forest = chain_forest();
    let laid = layout_forest(forest.nodes(), forest.edges(), &ids(&["x", "y"]), &LayoutPolicy::default());
    let y = laid.iter().find(|n| n.id == "y").unwrap();
    assert_eq!(y.position, Position::ORIGIN);
}

#[test]
fn layout_is_deterministic_and_jitter_free() {
    let forest = chain_forest();
    let hidden = compute_hidden(forest.edges(), &ids(&["b"]));
    let first = layout_forest(forest.nodes(), forest.edges(), &hidden, &LayoutPolicy::default());
    let second = layout_forest(forest.nodes(), forest.edges(), &hidden, &LayoutPolicy::default());
    assert_eq!(first, second);
    assert!(!positions_changed(&first, &second));
    assert!(positions_changed(forest.nodes(), &first));
}

#[test]
fn layout_policy_rejects_inverted_tiers() {
    assert!(LayoutPolicy::default().is_valid());
    let inverted = LayoutPolicy { default_box: BoxSize::new(400.0, 80.0), ..LayoutPolicy::default() };
    assert!(!inverted.is_valid());
    let negative = LayoutPolicy { node_sep: -1.0, ..LayoutPolicy::default() };
    assert!(!negative.is_valid());
}

// ---- Expansion Merge Protocol ----

#[test]
fn seed_expansion_builds_two_levels_collapsed() {
    let (explorer, _) = seeded();
    let forest = explorer.forest();
    assert_eq!(forest.node_count(), 5);
    assert_eq!(forest.edge_count(), 4);

    let by_level = |level| forest.nodes().iter().filter(|n| n.level == level).count();
    assert_eq!((by_level(0), by_level(1), by_level(2)), (1, 2, 2));

    let root = id_of(&explorer, "X");
    let a = id_of(&explorer, "A");
    let b = id_of(&explorer, "B");
    assert_eq!(explorer.collapsed(), &ids(&[&root, &a, &b]));

    let root_node = forest.get_node(&root).unwrap();
    assert!(root_node.is_root);
    assert_eq!(root_node.description, "d");
    assert_eq!(root_node.child_hint, 2);

    // Only the root shows; everything else collapses onto it
    assert_eq!(explorer.hidden().len(), 4);
    assert_eq!(position_of(&explorer, &root), Position::new(50.0, 50.0));
    for n in forest.nodes() {
        assert_eq!(n.position, Position::new(50.0, 50.0), "{} not snapped", n.label);
    }
}

#[test]
fn expansion_at_parent_adds_siblings_and_unfolds_parent() {
    let store = MemoryStore::new();
    store.put_raw(PARENT_DOC).unwrap();
    let mut explorer = explorer_with(&store);
    assert!(explorer.collapsed().contains("p"));

    let outcome = explorer.expand(&Canned(sibling_payload()), "P", Some("p")).unwrap();
    let ExpansionOutcome::Merged(summary) = outcome else { panic!("expected merge, got {:?}", outcome) };
    assert_eq!((summary.added_nodes, summary.added_edges), (2, 2));

    let forest = explorer.forest();
    assert_eq!(forest.node_count(), 4);
    assert_eq!(forest.children_of("p").len(), 2);
    assert!(!explorer.collapsed().contains("p"));
    assert_eq!(forest.get_node("p").unwrap().child_hint, 2);
    for child in forest.children_of("p") {
        assert_eq!(forest.get_node(child).unwrap().level, 2);
    }
}

#[test]
fn expansion_passes_ancestor_path_to_the_source() {
    let store = MemoryStore::new();
    store.put_raw(PARENT_DOC).unwrap();
    let mut explorer = explorer_with(&store);
    let source = Recording { seen: RefCell::new(Vec::new()), payload: sibling_payload() };
    explorer.expand(&source, "P", Some("p")).unwrap();

    let seen = source.seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].parent_id.as_deref(), Some("p"));
    assert_eq!(seen[0].path_context.as_deref(), Some("R > P"));
}

#[test]
fn expansion_grandchildren_sit_two_levels_down() {
    let parent = TopicNode { position: Position::new(10.0, 20.0), ..node("p", 3) };
    let payload = KnowledgePayload::expansion(vec![
        TopicEntry { label: None, desc: None, children: Some(vec![TopicEntry::default()]) },
    ]);
    let delta = delta_for(MergeTarget::Parent(&parent), &payload, &mut IdAllocator::new()).unwrap();

    assert_eq!(delta.nodes.len(), 2);
    assert_eq!(delta.nodes[0].level, 4);
    assert_eq!(delta.nodes[0].label, "Topic");
    assert_eq!(delta.nodes[0].child_hint, 1);
    assert_eq!(delta.nodes[1].level, 5);
    assert_eq!(delta.nodes[1].label, "Detail");
    assert_eq!(delta.nodes[1].description, "");
    // spawned on the parent until the next layout
    assert_eq!(delta.nodes[1].position, Position::new(10.0, 20.0));
    assert_eq!(delta.edges[0].source, "p");
    assert_eq!(delta.edges[1].source, delta.nodes[0].id);
}

#[test]
fn seed_defaults_fill_missing_labels() {
    let payload = KnowledgePayload {
        root: Some(TopicEntry::default()),
        children: Some(vec![TopicEntry::default().with_children(vec![TopicEntry::default()])]),
        nodes: None,
    };
    let delta = delta_for(MergeTarget::Seed { topic: "Rust" }, &payload, &mut IdAllocator::new()).unwrap();
    let labels: Vec<&str> = delta.nodes.iter().map(|n| n.label.as_str()).collect();
    assert_eq!(labels, vec!["Rust", "Category", "Sub-category"]);
}

#[test]
fn apply_delta_against_missing_parent_changes_nothing() {
    let parent = node("ghost", 1);
    let delta = delta_for(MergeTarget::Parent(&parent), &sibling_payload(), &mut IdAllocator::new()).unwrap();
    let mut forest = chain_forest();
    let mut collapsed = ids(&["a"]);
    let before = forest.snapshot();

    assert_eq!(
        apply_delta(&mut forest, &mut collapsed, delta),
        Err(ForestError::NotFound("ghost".into()))
    );
    assert_eq!(forest.snapshot(), before);
    assert_eq!(collapsed, ids(&["a"]));
}

#[test]
fn mismatched_or_empty_payloads_are_malformed() {
    let parent = node("p", 1);
    let mut allocator = IdAllocator::new();

    let seed_answered_with_nodes = delta_for(MergeTarget::Seed { topic: "t" }, &sibling_payload(), &mut allocator);
    assert!(matches!(seed_answered_with_nodes, Err(ForestError::MalformedUpstreamPayload(_))));

    let expansion_answered_with_root = delta_for(MergeTarget::Parent(&parent), &seed_payload(), &mut allocator);
    assert!(matches!(expansion_answered_with_root, Err(ForestError::MalformedUpstreamPayload(_))));

    let empty = delta_for(MergeTarget::Parent(&parent), &KnowledgePayload::expansion(vec![]), &mut allocator);
    assert!(matches!(empty, Err(ForestError::MalformedUpstreamPayload(_))));
}

#[test]
fn failed_generation_leaves_the_forest_untouched() {
    let (mut explorer, _) = seeded();
    let before = explorer.snapshot();
    let collapsed_before = explorer.collapsed().clone();
    let a = id_of(&explorer, "A");

    let outcome = explorer.expand(&Unreachable, "A", Some(&a)).unwrap();
    assert!(matches!(outcome, ExpansionOutcome::Failed { ref reason } if reason.contains("connection refused")));
    assert_eq!(explorer.snapshot(), before);
    assert_eq!(explorer.collapsed(), &collapsed_before);
    assert!(!explorer.is_busy());
    assert!(explorer.last_notice().unwrap().starts_with("Expansion failed"));

    let wrong_shape = explorer.expand(&Canned(sibling_payload()), "Y", None).unwrap();
    assert!(matches!(wrong_shape, ExpansionOutcome::Failed { .. }));
    assert_eq!(explorer.snapshot(), before);
}

#[test]
fn busy_flag_blocks_a_second_expansion() {
    let (mut explorer, _) = seeded();
    let a = id_of(&explorer, "A");
    let b = id_of(&explorer, "B");

    let pending = explorer.begin_expansion("A", Some(&a)).unwrap();
    assert!(explorer.is_busy());
    assert!(explorer.view().busy);
    assert_eq!(explorer.begin_expansion("B", Some(&b)).unwrap_err(), ForestError::Busy);
    assert_eq!(explorer.begin_expansion("New", None).unwrap_err(), ForestError::Busy);

    let outcome = explorer.complete_expansion(pending, Ok(sibling_payload()));
    assert!(matches!(outcome, ExpansionOutcome::Merged(_)));
    assert!(!explorer.is_busy());
    assert!(explorer.begin_expansion("B", Some(&b)).is_ok());
}

#[test]
fn stale_completion_is_ignored() {
    let (mut explorer, _) = seeded();
    let a = id_of(&explorer, "A");
    let before = explorer.snapshot();

    let pending = explorer.begin_expansion("A", Some(&a)).unwrap();
    explorer.cancel_expansion(&pending);
    assert!(!explorer.is_busy());
    assert_eq!(explorer.complete_expansion(pending, Ok(sibling_payload())), ExpansionOutcome::Ignored);
    assert_eq!(explorer.snapshot(), before);
}

#[test]
fn begin_expansion_validates_request() {
    let (mut explorer, _) = seeded();
    assert_eq!(explorer.begin_expansion("   ", None).unwrap_err(), ForestError::EmptyTopic);
    assert_eq!(
        explorer.begin_expansion("T", Some("missing")).unwrap_err(),
        ForestError::NotFound("missing".into())
    );
    assert!(!explorer.is_busy());
}

// ---- Explorer operations ----

#[test]
fn toggling_reveals_one_level_and_relays_out() {
    let (mut explorer, _) = seeded();
    let root = id_of(&explorer, "X");
    let a = id_of(&explorer, "A");
    let a1 = id_of(&explorer, "A1");

    assert!(!explorer.toggle_collapse(&root).unwrap());
    assert_eq!(explorer.hidden(), &ids(&[&a1, &id_of(&explorer, "B1")]));
    assert_eq!(position_of(&explorer, &root), Position::new(50.0, 140.0));
    assert_eq!(position_of(&explorer, &a), Position::new(530.0, 50.0));
    assert_eq!(position_of(&explorer, &a1), position_of(&explorer, &a));

    assert!(!explorer.toggle_collapse(&a).unwrap());
    assert!(!explorer.hidden().contains(&a1));
    assert_ne!(position_of(&explorer, &a1), position_of(&explorer, &a));

    assert!(explorer.toggle_collapse(&a).unwrap());
    assert_eq!(position_of(&explorer, &a1), position_of(&explorer, &a));

    assert_eq!(explorer.toggle_collapse("nope"), Err(ForestError::NotFound("nope".into())));
}

#[test]
fn relayout_without_changes_commits_nothing() {
    let (mut explorer, _) = seeded();
    let root = id_of(&explorer, "X");
    explorer.toggle_collapse(&root).unwrap();
    assert!(!explorer.relayout());
    assert!(!explorer.relayout());

    let a = id_of(&explorer, "A");
    explorer.commit_drag(&a, Position::new(-5.0, 7.5)).unwrap();
    assert_eq!(position_of(&explorer, &a), Position::new(-5.0, 7.5));
    assert!(explorer.relayout());
    assert_eq!(position_of(&explorer, &a), Position::new(530.0, 50.0));
}

#[test]
fn delete_branch_prunes_collapsed_set_and_focus() {
    let (mut explorer, _) = seeded();
    let a = id_of(&explorer, "A");
    let a1 = id_of(&explorer, "A1");
    explorer.set_focus(Some(&a1)).unwrap();

    let removed = explorer.delete_branch(&a).unwrap();
    assert_eq!(removed.nodes.len(), 2);
    assert_eq!(explorer.forest().node_count(), 3);
    assert!(!explorer.collapsed().contains(&a));
    assert_eq!(explorer.focus(), None);
    assert!(explorer.connected().is_empty());
    assert!(explorer.snapshot().validate().is_ok());

    assert_eq!(explorer.delete_branch(&a), Err(ForestError::NotFound(a.clone())));
}

#[test]
fn deleting_the_last_child_lets_the_parent_explore_again() {
    let (mut explorer, _) = seeded();
    let root = id_of(&explorer, "X");
    let a = id_of(&explorer, "A");
    let b = id_of(&explorer, "B");
    let a1 = id_of(&explorer, "A1");

    explorer.delete_branch(&a1).unwrap();
    let view = explorer.view();
    let a_view = view.node(&a).expect("A survives");
    assert_eq!(a_view.node.child_hint, 0);
    assert!(!a_view.collapsed);
    assert_eq!(a_view.affordance, Affordance::Explore);
    assert!(!explorer.collapsed().contains(&a));

    // One sibling left: the root stays folded with one child announced
    explorer.delete_branch(&a).unwrap();
    let root_view = explorer.view().node(&root).cloned().expect("root survives");
    assert_eq!(root_view.node.child_hint, 1);
    assert_eq!(root_view.affordance, Affordance::Reveal);

    explorer.delete_branch(&b).unwrap();
    let root_view = explorer.view().node(&root).cloned().expect("root survives");
    assert_eq!(root_view.node.child_hint, 0);
    assert_eq!(root_view.affordance, Affordance::Explore);
    assert!(explorer.collapsed().is_empty());
}

#[test]
fn focus_dims_everything_outside_the_lineage() {
    let (mut explorer, _) = seeded();
    let root = id_of(&explorer, "X");
    let a = id_of(&explorer, "A");
    let b = id_of(&explorer, "B");
    explorer.set_focus(Some(&a)).unwrap();

    let view = explorer.view();
    assert_eq!(view.focus.as_deref(), Some(a.as_str()));
    assert_eq!(view.node(&root).unwrap().emphasis, Emphasis::Connected);
    assert_eq!(view.node(&id_of(&explorer, "A1")).unwrap().emphasis, Emphasis::Connected);
    assert_eq!(view.node(&b).unwrap().emphasis, Emphasis::Dimmed);
    let edge_to_b = view.edges.iter().find(|e| e.edge.target == b).unwrap();
    assert_eq!(edge_to_b.emphasis, Emphasis::Dimmed);
    assert!(edge_to_b.hidden);

    explorer.set_focus(None).unwrap();
    assert!(explorer.view().nodes.iter().all(|n| n.emphasis == Emphasis::Normal));
    assert_eq!(explorer.set_focus(Some("nope")), Err(ForestError::NotFound("nope".into())));
}

#[test]
fn view_reports_affordances() {
    let (mut explorer, _) = seeded();
    let root = id_of(&explorer, "X");
    let a1 = id_of(&explorer, "A1");

    let view = explorer.view();
    assert_eq!(view.node(&root).unwrap().affordance, Affordance::Reveal);
    assert_eq!(view.node(&a1).unwrap().affordance, Affordance::Explore);
    assert_eq!(view.visible_nodes().count(), 1);

    explorer.toggle_collapse(&root).unwrap();
    let view = explorer.view();
    assert_eq!(view.node(&root).unwrap().affordance, Affordance::Collapse);
    assert!(!view.node(&root).unwrap().collapsed);
    assert_eq!(view.visible_nodes().count(), 3);

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["nodes"][0]["label"], "X");
    assert_eq!(json["nodes"][0]["affordance"], "collapse");
}

#[test]
fn edit_label_and_drag_require_existing_nodes() {
    let (mut explorer, store) = seeded();
    let a = id_of(&explorer, "A");
    explorer.edit_label(&a, "Renamed").unwrap();
    assert_eq!(explorer.forest().get_node(&a).unwrap().label, "Renamed");
    assert!(store.raw().unwrap().contains("Renamed"));

    assert_eq!(explorer.edit_label("nope", "x"), Err(ForestError::NotFound("nope".into())));
    assert_eq!(
        explorer.commit_drag("nope", Position::ORIGIN),
        Err(ForestError::NotFound("nope".into()))
    );
}

#[test]
fn clear_wipes_session_and_store() {
    let (mut explorer, store) = seeded();
    assert!(store.raw().is_some());
    explorer.clear();
    assert!(explorer.forest().is_empty());
    assert!(explorer.collapsed().is_empty());
    assert!(explorer.hidden().is_empty());
    assert!(store.raw().is_none());
}

#[test]
fn failed_saves_do_not_block_operations() {
    let mut explorer = Explorer::open(Box::new(BrokenStore), LayoutPolicy::default());
    let outcome = explorer.expand(&Canned(seed_payload()), "X", None).unwrap();
    assert!(matches!(outcome, ExpansionOutcome::Merged(_)));
    assert_eq!(explorer.forest().node_count(), 5);
    assert!(explorer.last_notice().unwrap().contains("disk full"));
}

// ---- Persistence ----

#[test]
fn session_round_trips_through_the_store() {
    let (mut explorer, store) = seeded();
    let root = id_of(&explorer, "X");
    explorer.toggle_collapse(&root).unwrap();
    let before = explorer.snapshot();

    let reopened = explorer_with(&store);
    let after = reopened.snapshot();
    assert_eq!(after.nodes.len(), before.nodes.len());
    for (a, b) in before.nodes.iter().zip(&after.nodes) {
        assert_eq!((&a.id, &a.label, a.level, a.is_root), (&b.id, &b.label, b.level, b.is_root));
    }
    assert_eq!(after.edges, before.edges);
    assert_eq!(reopened.collapsed(), explorer.collapsed());
    assert_eq!(reopened.hidden(), explorer.hidden());
}

#[test]
fn invalid_saved_state_starts_an_empty_session() {
    let store = MemoryStore::new();
    store.put_raw(r#"{"nodes": 3, "edges": []}"#).unwrap();
    let explorer = explorer_with(&store);
    assert!(explorer.forest().is_empty());
    assert!(store.raw().is_none(), "unreadable state is discarded");

    let dangling = r#"{"nodes": [{"id": "a", "label": "A"}], "edges": [{"id": "e", "source": "a", "target": "b"}]}"#;
    store.put_raw(dangling).unwrap();
    let explorer = explorer_with(&store);
    assert!(explorer.forest().is_empty());
    assert!(explorer.last_notice().unwrap().contains("persisted state invalid"));
}

#[test]
fn documents_without_fold_state_still_load() {
    let doc = r#"{"nodes": [{"id": "a", "label": "A"}], "edges": []}"#;
    let store = MemoryStore::new();
    store.put_raw(doc).unwrap();
    let explorer = explorer_with(&store);
    assert_eq!(explorer.forest().node_count(), 1);
    assert!(explorer.collapsed().is_empty());
}

#[test]
fn file_store_saves_loads_and_versions() {
    let dir = tempfile::tempdir().unwrap();
    for format in [StateFormat::Ron, StateFormat::Json] {
        let store = FileStore::new(dir.path().join(format.extension()), format);
        assert!(store.load().unwrap().is_none());

        let forest = chain_forest();
        let state = PersistedForest::from_runtime(&forest, &ids(&["a"]));
        store.save(&state).unwrap();
        assert!(store.active_state_path().exists());
        assert_eq!(store.load().unwrap(), Some(state.clone()));

        let version = store.save_versioned(&state).unwrap();
        assert_eq!(store.list_versions().unwrap(), vec![version.clone()]);
        assert_eq!(store.load_from_path(&version).unwrap(), state);

        store.clear().unwrap();
        assert!(!store.active_state_path().exists());
        assert!(store.load().unwrap().is_none());
    }
}

#[test]
fn file_store_discards_corrupt_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path(), StateFormat::Json);
    std::fs::write(store.active_state_path(), "[1, 2, 3]").unwrap();
    assert!(store.load().unwrap().is_none());
    assert!(!store.active_state_path().exists());
}

#[test]
fn persisted_forest_drops_stale_collapsed_ids() {
    let forest = chain_forest();
    let mut state = PersistedForest::from_runtime(&forest, &ids(&["a"]));
    state.collapsed.push("gone".into());
    let (restored, collapsed) = state.into_runtime().unwrap();
    assert_eq!(restored.snapshot(), forest.snapshot());
    assert_eq!(collapsed, ids(&["a"]));
}

// ---- Knowledge payloads ----

#[test]
fn payload_parser_accepts_plain_and_wrapped_json() {
    let plain = parse_payload(r#"{"nodes": [{"label": "A", "desc": "a"}]}"#).unwrap();
    assert_eq!(plain.nodes.unwrap()[0].label.as_deref(), Some("A"));

    let wrapped = parse_payload("Sure! Here you go:\n{\"root\": {\"label\": \"R\"}, \"children\": []}\nEnjoy.").unwrap();
    assert_eq!(wrapped.root.unwrap().label.as_deref(), Some("R"));

    let described = parse_payload(r#"{"nodes": [{"label": "A", "description": "long"}]}"#).unwrap();
    assert_eq!(described.nodes.unwrap()[0].desc.as_deref(), Some("long"));

    assert!(matches!(parse_payload("no json here"), Err(ForestError::MalformedUpstreamPayload(_))));
    assert!(matches!(parse_payload(r#"{"nodes": "x"}"#), Err(ForestError::MalformedUpstreamPayload(_))));
}

#[test]
fn payload_without_root_or_nodes_is_a_soft_failure() {
    let (mut explorer, _) = seeded();
    let before = explorer.snapshot();
    let empty = parse_payload("{}").unwrap();
    let outcome = explorer.expand(&Canned(empty), "Z", None).unwrap();
    assert!(matches!(outcome, ExpansionOutcome::Failed { .. }));
    assert_eq!(explorer.snapshot(), before);
}

// ---- Export & settings ----

#[test]
fn export_writes_json_and_csv() {
    let dir = tempfile::tempdir().unwrap();
    let forest = chain_forest();
    let hidden = compute_hidden(forest.edges(), &ids(&["a"]));

    let json_path = dir.path().join("out").join("forest.json");
    export_forest_json(&forest, &hidden, &json_path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(value["nodes"].as_array().unwrap().len(), 6);
    assert_eq!(value["edges"].as_array().unwrap().len(), 4);
    assert_eq!(value["nodes"][2]["hidden"], true);
    assert_eq!(value["nodes"][2]["parent"], "a");

    let (nodes_csv, edges_csv) = export_forest_csv(&forest, &hidden, &dir.path().join("forest.csv")).unwrap();
    let nodes_text = std::fs::read_to_string(nodes_csv).unwrap();
    assert!(nodes_text.starts_with("id,label,description,level"));
    assert_eq!(nodes_text.lines().count(), 7);
    assert_eq!(std::fs::read_to_string(edges_csv).unwrap().lines().count(), 5);
}

#[test]
fn settings_fill_defaults_and_reject_bad_layouts() {
    let parsed: AppSettings = serde_json::from_str("{}").unwrap();
    assert_eq!(parsed, AppSettings::default());
    assert_eq!(parsed.layout.rank_sep, 200.0);

    let mut bad = AppSettings::default();
    bad.layout.root_box = BoxSize::new(10.0, 10.0);
    assert_eq!(bad.sanitized().layout, LayoutPolicy::default());

    let partial: AppSettings = serde_json::from_str(r#"{"layout": {"direction": "TB"}}"#).unwrap();
    assert_eq!(partial.layout.direction, LayoutDirection::TopBottom);
    assert_eq!(partial.layout.node_sep, 100.0);
}

#[test]
fn legacy_ron_settings_are_migrated_to_json() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("settings.ron"), r#"(knowledge_model: "mistral")"#).unwrap();

    let loaded = AppSettings::load_from(dir.path()).unwrap();
    assert_eq!(loaded.knowledge_model, "mistral");
    assert_eq!(loaded.layout, LayoutPolicy::default());
    assert!(dir.path().join("settings.json").is_file());
    assert_eq!(AppSettings::load_from(dir.path()).unwrap(), loaded);
}

#[test]
fn failed_settings_migration_still_loads_legacy_values() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("settings.ron"), r#"(knowledge_model: "mistral")"#).unwrap();
    // A directory squatting on the JSON name makes the migration write fail
    std::fs::create_dir(dir.path().join("settings.json")).unwrap();

    let loaded = AppSettings::load_from(dir.path()).unwrap();
    assert_eq!(loaded.knowledge_model, "mistral");
}

#[test]
fn snapshot_validation_matches_store_rules() {
    let good = chain_forest().snapshot();
    assert!(good.validate().is_ok());
    let bad = ForestSnapshot { nodes: vec![node("a", 0)], edges: vec![TopicEdge::between("a", "b")] };
    assert!(bad.validate().is_err());
}
