//! The session actor.
//!
//! An [`Explorer`] owns the forest, the collapsed set, the focus and the busy
//! flag. Every mutation runs one synchronous pipeline: mutate, recompute the
//! hidden and connected sets, lay out, commit positions only if they moved,
//! then save. The only asynchronous boundary is the knowledge source call,
//! split into [`Explorer::begin_expansion`] and [`Explorer::complete_expansion`]
//! so callers can await it however they like.

use crate::error::{ForestError, ForestResult};
use crate::graph_utils::graph::{ForestSnapshot, NodeId, Position, RemovedBranch, TopicForest};
use crate::graph_utils::ids::IdAllocator;
use crate::graph_utils::layout::{LayoutPolicy, layout_forest, positions_changed};
use crate::graph_utils::merge::{MergeSummary, MergeTarget, apply_delta, delta_for};
use crate::graph_utils::view::ForestView;
use crate::graph_utils::visibility::{IdSet, compute_connected, compute_hidden};
use crate::knowledge::{ExpansionRequest, KnowledgePayload, KnowledgeSource};
use crate::persistence::persist::{PersistedForest, PersistentStore};

/// Handle for an expansion whose knowledge source call is outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExpansion {
    ticket: u64,
    pub request: ExpansionRequest,
}

impl PendingExpansion {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionOutcome {
    Merged(MergeSummary),
    /// Nothing was committed; the forest is exactly as before the call.
    Failed { reason: String },
    /// The completion did not belong to the expansion in flight.
    Ignored,
}

pub struct Explorer {
    forest: TopicForest,
    collapsed: IdSet,
    hidden: IdSet,
    focus: Option<NodeId>,
    connected: IdSet,
    policy: LayoutPolicy,
    ids: IdAllocator,
    store: Box<dyn PersistentStore>,
    in_flight: Option<u64>,
    next_ticket: u64,
    last_notice: Option<String>,
}

impl Explorer {
    /// Empty session; nothing is read from the store.
    pub fn new(store: Box<dyn PersistentStore>, policy: LayoutPolicy) -> Self {
        Self {
            forest: TopicForest::new(),
            collapsed: IdSet::new(),
            hidden: IdSet::new(),
            focus: None,
            connected: IdSet::new(),
            policy,
            ids: IdAllocator::new(),
            store,
            in_flight: None,
            next_ticket: 1,
            last_notice: None,
        }
    }

    /// Session start: restores whatever the store holds. Unreadable or
    /// invalid state leaves the session empty with a notice.
    pub fn open(store: Box<dyn PersistentStore>, policy: LayoutPolicy) -> Self {
        let mut s = Self::new(store, policy);
        match s.store.load() {
            Ok(Some(state)) => match state.into_runtime() {
                Ok((forest, collapsed)) => {
                    log::info!("restored {} nodes, {} edges", forest.node_count(), forest.edge_count());
                    s.forest = forest;
                    s.collapsed = collapsed;
                    // Saved positions may carry manual drags; keep them
                    s.recompute_derived();
                }
                Err(e) => {
                    log::warn!("{}", e);
                    s.last_notice = Some(e.to_string());
                }
            },
            Ok(None) => {}
            Err(e) => {
                log::warn!("could not load saved state: {}", e);
                s.last_notice = Some(format!("Load failed: {}", e));
            }
        }
        s
    }

    pub fn forest(&self) -> &TopicForest {
        &self.forest
    }

    pub fn snapshot(&self) -> ForestSnapshot {
        self.forest.snapshot()
    }

    pub fn collapsed(&self) -> &IdSet {
        &self.collapsed
    }

    pub fn hidden(&self) -> &IdSet {
        &self.hidden
    }

    pub fn connected(&self) -> &IdSet {
        &self.connected
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn policy(&self) -> &LayoutPolicy {
        &self.policy
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Latest user-visible notice (failed save, failed expansion, ...).
    pub fn last_notice(&self) -> Option<&str> {
        self.last_notice.as_deref()
    }

    pub fn view(&self) -> ForestView {
        ForestView::build(
            self.forest.nodes(),
            self.forest.edges(),
            &self.collapsed,
            &self.hidden,
            self.focus.as_deref(),
            &self.connected,
            self.is_busy(),
        )
    }

    /// Folds or unfolds `id`. Returns whether it is collapsed afterwards.
    pub fn toggle_collapse(&mut self, id: &str) -> ForestResult<bool> {
        if !self.forest.contains(id) {
            return Err(ForestError::NotFound(id.to_string()));
        }
        let now_collapsed = if self.collapsed.remove(id) {
            false
        } else {
            self.collapsed.insert(id.to_string());
            true
        };
        log::info!("{} {}", if now_collapsed { "collapsed" } else { "expanded" }, id);
        self.refresh();
        self.persist();
        Ok(now_collapsed)
    }

    pub fn set_focus(&mut self, id: Option<&str>) -> ForestResult<()> {
        if let Some(id) = id
            && !self.forest.contains(id)
        {
            return Err(ForestError::NotFound(id.to_string()));
        }
        self.focus = id.map(str::to_string);
        self.connected = compute_connected(self.forest.edges(), self.focus.as_deref());
        Ok(())
    }

    pub fn edit_label(&mut self, id: &str, new_label: &str) -> ForestResult<()> {
        self.forest.update_node_label(id, new_label.to_string())?;
        self.persist();
        Ok(())
    }

    /// Records a manual drag. The next re-layout places the node again.
    pub fn commit_drag(&mut self, id: &str, position: Position) -> ForestResult<()> {
        self.forest.set_position(id, position)?;
        self.persist();
        Ok(())
    }

    /// Deletes `id` and its whole branch. The surviving parent loses one
    /// from its child hint; once it has no children left it is unfolded and
    /// offers exploration again.
    pub fn delete_branch(&mut self, id: &str) -> ForestResult<RemovedBranch> {
        let parent = self.forest.parent_of(id).map(str::to_string);
        let removed = self.forest.remove_subtree(id)?;
        if let Some(parent) = parent {
            if self.forest.children_of(&parent).is_empty() {
                let hint = self.forest.get_node(&parent).map_or(0, |n| n.child_hint);
                self.forest.retract_child_hint(&parent, hint)?;
                self.collapsed.remove(&parent);
            } else {
                self.forest.retract_child_hint(&parent, 1)?;
            }
        }
        for gone in &removed.nodes {
            self.collapsed.remove(gone);
        }
        if let Some(focus) = &self.focus
            && removed.nodes.contains(focus)
        {
            self.focus = None;
        }
        log::info!("deleted branch {} ({} nodes)", id, removed.nodes.len());
        self.refresh();
        self.persist();
        Ok(removed)
    }

    /// Runs the layout pass on demand. Returns whether any position moved.
    pub fn relayout(&mut self) -> bool {
        let moved = self.refresh();
        if moved {
            self.persist();
        }
        moved
    }

    /// Wipes the session and the stored state.
    pub fn clear(&mut self) {
        self.forest.clear();
        self.collapsed.clear();
        self.hidden.clear();
        self.focus = None;
        self.connected.clear();
        if let Err(e) = self.store.clear() {
            log::warn!("could not clear saved state: {}", e);
            self.last_notice = Some(format!("Clear failed: {}", e));
        }
    }

    /// Validates the request and marks the session busy.
    ///
    /// `parent_id` absent seeds a new component named `topic`.
    pub fn begin_expansion(&mut self, topic: &str, parent_id: Option<&str>) -> ForestResult<PendingExpansion> {
        if self.in_flight.is_some() {
            return Err(ForestError::Busy);
        }
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ForestError::EmptyTopic);
        }
        let path_context = match parent_id {
            Some(pid) => {
                if !self.forest.contains(pid) {
                    return Err(ForestError::NotFound(pid.to_string()));
                }
                Some(self.forest.label_path(pid).join(" > "))
            }
            None => None,
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(ticket);
        log::debug!("expansion #{} started for '{}'", ticket, topic);
        Ok(PendingExpansion {
            ticket,
            request: ExpansionRequest {
                topic: topic.to_string(),
                parent_id: parent_id.map(str::to_string),
                path_context,
            },
        })
    }

    /// Drops an outstanding expansion without touching the forest.
    pub fn cancel_expansion(&mut self, pending: &PendingExpansion) {
        if self.in_flight == Some(pending.ticket) {
            self.in_flight = None;
        }
    }

    /// Merges the knowledge source's answer, or records why it could not be.
    pub fn complete_expansion(
        &mut self,
        pending: PendingExpansion,
        result: anyhow::Result<KnowledgePayload>,
    ) -> ExpansionOutcome {
        if self.in_flight != Some(pending.ticket) {
            log::debug!("ignoring stale expansion #{}", pending.ticket);
            return ExpansionOutcome::Ignored;
        }
        self.in_flight = None;

        match self.merge_payload(&pending.request, result) {
            Ok(summary) => {
                log::info!(
                    "merged {} nodes, {} edges for '{}'",
                    summary.added_nodes,
                    summary.added_edges,
                    pending.request.topic
                );
                self.refresh();
                self.persist();
                ExpansionOutcome::Merged(summary)
            }
            Err(reason) => {
                log::warn!("expansion of '{}' failed: {}", pending.request.topic, reason);
                self.last_notice = Some(format!("Expansion failed: {}", reason));
                ExpansionOutcome::Failed { reason }
            }
        }
    }

    /// Blocking convenience over begin/complete.
    pub fn expand(
        &mut self,
        source: &dyn KnowledgeSource,
        topic: &str,
        parent_id: Option<&str>,
    ) -> ForestResult<ExpansionOutcome> {
        let pending = self.begin_expansion(topic, parent_id)?;
        let result = source.expand(&pending.request);
        Ok(self.complete_expansion(pending, result))
    }

    fn merge_payload(
        &mut self,
        request: &ExpansionRequest,
        result: anyhow::Result<KnowledgePayload>,
    ) -> Result<MergeSummary, String> {
        let payload = result.map_err(|e| e.to_string())?;
        let delta = match &request.parent_id {
            None => delta_for(MergeTarget::Seed { topic: &request.topic }, &payload, &mut self.ids),
            Some(pid) => {
                let parent = self
                    .forest
                    .get_node(pid)
                    .ok_or_else(|| ForestError::NotFound(pid.clone()).to_string())?;
                delta_for(MergeTarget::Parent(parent), &payload, &mut self.ids)
            }
        }
        .map_err(|e| e.to_string())?;

        apply_delta(&mut self.forest, &mut self.collapsed, delta).map_err(|e| {
            if let ForestError::DuplicateId(id) = &e {
                log::error!("id allocator produced a colliding id: {}", id);
            }
            e.to_string()
        })
    }

    fn recompute_derived(&mut self) {
        let hidden = compute_hidden(self.forest.edges(), &self.collapsed);
        if hidden != self.hidden {
            self.hidden = hidden;
        }
        let connected = compute_connected(self.forest.edges(), self.focus.as_deref());
        if connected != self.connected {
            self.connected = connected;
        }
    }

    // The pipeline after a committed mutation. Returns whether positions moved.
    fn refresh(&mut self) -> bool {
        self.recompute_derived();
        let laid_out = layout_forest(self.forest.nodes(), self.forest.edges(), &self.hidden, &self.policy);
        if positions_changed(self.forest.nodes(), &laid_out) {
            self.forest.apply_positions(&laid_out);
            log::debug!("layout moved nodes ({} hidden)", self.hidden.len());
            true
        } else {
            false
        }
    }

    fn persist(&mut self) {
        let state = PersistedForest::from_runtime(&self.forest, &self.collapsed);
        if let Err(e) = self.store.save(&state) {
            log::warn!("save failed: {}", e);
            self.last_notice = Some(format!("Save failed: {}", e));
        }
    }
}
