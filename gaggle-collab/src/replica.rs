//! One participant's copy of the idea graph.
//!
//! Local actions are applied optimistically: a placeholder (draft or loading
//! node) goes into the store before any async work starts. Loading
//! placeholders are replaced by freshly-identified nodes once generation
//! finishes, then exactly those nodes are published in one `sync-ideas`.
//! Drafts stay local until their first non-empty commit. Remote events are
//! applied through the store's idempotent upsert.
//!
//! Per-node lifecycle:
//!
//! ```text
//!            create_draft           commit (non-empty)
//!   none ───────────────► Draft ─────────────────────► Committed ◄─┐
//!     │                     │ cancel / empty commit        │  edit  │
//!     │                     ▼                              └────────┘
//!     │                  (deleted)
//!     │ generate / merge                success
//!     └────────────────► Loading ───────────────► Committed
//!                           │ failure
//!                           ▼
//!                        (deleted)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use gaggle_core::{IdeaNode, NodeId, NodeStore, ParticipantId, Position, SYSTEM_AUTHOR};
use gaggle_ideas::{GenerationPipeline, GenerationRequest, MergeError, PipelineError};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use crate::presence::PresenceView;
use crate::protocol::RelayEvent;

/// Horizontal distance between root trees.
pub const LEVEL_WIDTH: f32 = 300.0;
/// Vertical distance from a node to its children.
pub const LEVEL_HEIGHT: f32 = 150.0;
/// Horizontal distance between siblings.
pub const NODE_SPACING: f32 = 120.0;

/// Where outgoing relay events go, usually [`RelayClient::sender`](crate::RelayClient::sender).
pub type Outbox = mpsc::UnboundedSender<RelayEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Draft,
    Loading,
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftKind {
    ManualNote,
    Comment,
    PromptTool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplicaError {
    #[error("Node {0} not found")]
    UnknownNode(NodeId),
    #[error("Cannot {action} node {id} while it is {phase:?}")]
    InvalidTransition {
        id: NodeId,
        action: &'static str,
        phase: NodePhase,
    },
    #[error("Node {0} is busy with a pending generation or merge")]
    NodeBusy(NodeId),
    #[error("Node {0} was removed before the result arrived")]
    SourceRemoved(NodeId),
    #[error("Invalid merge: {0}")]
    InvalidMerge(String),
    #[error("Generation failed: {0}")]
    Generation(#[from] PipelineError),
    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),
}

pub(crate) struct ReplicaState {
    pub(crate) store: NodeStore,
    /// Nodes not yet committed. Anything else in the store is committed.
    pub(crate) pending: HashMap<NodeId, NodePhase>,
    pub(crate) presence: PresenceView,
    pub(crate) identity: Option<ParticipantId>,
    pub(crate) outbox: Option<Outbox>,
}

impl ReplicaState {
    pub(crate) fn author(&self) -> ParticipantId {
        self.identity
            .clone()
            .unwrap_or_else(|| SYSTEM_AUTHOR.to_string())
    }

    pub(crate) fn phase(&self, id: &str) -> Option<NodePhase> {
        if !self.store.contains(id) {
            return None;
        }
        Some(self.pending.get(id).copied().unwrap_or(NodePhase::Committed))
    }

    pub(crate) fn insert_pending(&mut self, node: IdeaNode, phase: NodePhase) {
        self.pending.insert(node.id.clone(), phase);
        self.store.upsert(node);
    }

    pub(crate) fn discard(&mut self, id: &str) {
        self.pending.remove(id);
        self.store.remove(id);
    }

    /// Pending nodes in `phase` that hang under `id`, as child or merge result.
    pub(crate) fn dependents(&self, id: &str, phase: NodePhase) -> Vec<NodeId> {
        self.pending
            .iter()
            .filter(|(_, p)| **p == phase)
            .filter(|(pending_id, _)| {
                self.store.get(pending_id.as_str()).is_some_and(|n| {
                    n.parent_id.as_deref() == Some(id)
                        || n.metadata.merged_from.iter().any(|s| s == id)
                })
            })
            .map(|(pending_id, _)| pending_id.clone())
            .collect()
    }

    /// Remove `id` together with any drafts started under it.
    fn remove_with_drafts(&mut self, id: &str) -> Option<IdeaNode> {
        for draft in self.dependents(id, NodePhase::Draft) {
            self.remove_with_drafts(&draft);
        }
        self.pending.remove(id);
        self.store.remove(id)
    }

    pub(crate) fn commit(&mut self, node: IdeaNode) {
        self.pending.remove(&node.id);
        self.store.upsert(node);
    }

    /// Copy of `id` fit for the wire: placeholder ids are stripped from its
    /// child list.
    fn exported(&self, id: &str) -> Option<IdeaNode> {
        let mut node = self.store.get(id)?.clone();
        if node.is_placeholder() {
            return None;
        }
        node.child_ids.retain(|c| !self.pending.contains_key(c));
        Some(node)
    }

    /// Send only when attached with a known identity.
    pub(crate) fn emit(&self, event: RelayEvent) -> bool {
        let (Some(_), Some(outbox)) = (&self.identity, &self.outbox) else {
            return false;
        };
        if outbox.send(event).is_err() {
            log::debug!("Relay outbox closed, dropping event");
            return false;
        }
        true
    }

    pub(crate) fn publish(&self, ids: &[NodeId], parent_id: Option<NodeId>) -> bool {
        let Some(participant_id) = self.identity.clone() else {
            return false;
        };
        let nodes: Vec<IdeaNode> = ids.iter().filter_map(|id| self.exported(id)).collect();
        if nodes.is_empty() {
            return false;
        }
        log::debug!("Publishing {} nodes", nodes.len());
        self.emit(RelayEvent::SyncIdeas {
            participant_id,
            nodes,
            parent_id,
        })
    }

    fn announce(&self, make: fn(ParticipantId) -> RelayEvent) {
        if let Some(id) = self.identity.clone() {
            self.emit(make(id));
        }
    }

    pub(crate) fn root_anchor(&self) -> Position {
        Position::new(self.store.roots().len() as f32 * LEVEL_WIDTH, 0.0)
    }

    fn anchor_for(&self, parent: Option<&str>) -> Position {
        parent
            .and_then(|id| self.store.get(id))
            .and_then(|n| n.position)
            .unwrap_or_else(|| self.root_anchor())
    }
}

/// `count` positions one level below `anchor`, centred on it.
pub fn spread_below(anchor: Position, count: usize) -> Vec<Position> {
    let mid = (count as f32 - 1.0) / 2.0;
    (0..count)
        .map(|i| anchor.offset((i as f32 - mid) * NODE_SPACING, LEVEL_HEIGHT))
        .collect()
}

/// Cheap to clone; clones share the same graph.
#[derive(Clone)]
pub struct Replica {
    pub(crate) state: Arc<RwLock<ReplicaState>>,
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica {
    /// An empty, detached replica.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ReplicaState {
                store: NodeStore::new(),
                pending: HashMap::new(),
                presence: PresenceView::new(),
                identity: None,
                outbox: None,
            })),
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Connection
    // ───────────────────────────────────────────────────────────────────

    /// Start publishing as `identity` through `outbox`.
    pub async fn attach(&self, identity: impl Into<ParticipantId>, outbox: Outbox) {
        let mut state = self.state.write().await;
        state.identity = Some(identity.into());
        state.outbox = Some(outbox);
    }

    /// Stop publishing. Local edits keep working; nothing is queued.
    pub async fn detach(&self) {
        self.state.write().await.outbox = None;
    }

    /// True once both an identity and a live outbox are set.
    pub async fn is_attached(&self) -> bool {
        let state = self.state.read().await;
        state.identity.is_some() && state.outbox.is_some()
    }

    // ───────────────────────────────────────────────────────────────────
    // Drafts and edits
    // ───────────────────────────────────────────────────────────────────

    /// Insert an empty local-only draft.
    pub async fn create_draft(
        &self,
        kind: DraftKind,
        parent: Option<NodeId>,
        position: Option<Position>,
    ) -> Result<NodeId, ReplicaError> {
        let mut state = self.state.write().await;
        if let Some(parent_id) = &parent {
            if !state.store.contains(parent_id) {
                return Err(ReplicaError::UnknownNode(parent_id.clone()));
            }
        }

        let mut node = IdeaNode::draft(state.author())
            .with_parent(parent)
            .with_position(position);
        let flags = &mut node.metadata.flags;
        match kind {
            DraftKind::ManualNote => flags.is_manual_note = true,
            DraftKind::Comment => flags.is_comment = true,
            DraftKind::PromptTool => flags.is_prompt_tool = true,
        }

        let id = node.id.clone();
        state.insert_pending(node, NodePhase::Draft);
        Ok(id)
    }

    /// First save of a draft. Empty content deletes the draft instead and
    /// returns `None`; nothing is ever published for it.
    pub async fn commit_draft(
        &self,
        id: &str,
        content: &str,
    ) -> Result<Option<IdeaNode>, ReplicaError> {
        let mut state = self.state.write().await;
        match state.phase(id) {
            None => return Err(ReplicaError::UnknownNode(id.to_string())),
            Some(NodePhase::Draft) => {}
            Some(phase) => {
                return Err(ReplicaError::InvalidTransition {
                    id: id.to_string(),
                    action: "commit",
                    phase,
                })
            }
        }

        let content = content.trim();
        if content.is_empty() {
            state.discard(id);
            return Ok(None);
        }

        let Some(mut node) = state.store.get(id).cloned() else {
            return Err(ReplicaError::UnknownNode(id.to_string()));
        };
        node.set_content(content);
        node.metadata.flags.is_draft = false;
        let parent_id = node.parent_id.clone();
        state.commit(node);
        state.publish(&[id.to_string()], parent_id);
        Ok(state.store.get(id).cloned())
    }

    /// Throw a draft away without publishing anything.
    pub async fn cancel_draft(&self, id: &str) -> Result<(), ReplicaError> {
        let mut state = self.state.write().await;
        match state.phase(id) {
            None => Err(ReplicaError::UnknownNode(id.to_string())),
            Some(NodePhase::Draft) => {
                state.discard(id);
                Ok(())
            }
            Some(phase) => Err(ReplicaError::InvalidTransition {
                id: id.to_string(),
                action: "cancel",
                phase,
            }),
        }
    }

    /// Replace the content of a committed node and publish it. On a draft
    /// this is the first save, with the same empty-content rule.
    pub async fn edit_content(
        &self,
        id: &str,
        content: &str,
    ) -> Result<Option<IdeaNode>, ReplicaError> {
        let phase = self.phase(id).await;
        match phase {
            None => Err(ReplicaError::UnknownNode(id.to_string())),
            Some(NodePhase::Loading) => Err(ReplicaError::NodeBusy(id.to_string())),
            Some(NodePhase::Draft) => self.commit_draft(id, content).await,
            Some(NodePhase::Committed) => {
                let mut state = self.state.write().await;
                let Some(mut node) = state.store.get(id).cloned() else {
                    return Err(ReplicaError::UnknownNode(id.to_string()));
                };
                node.set_content(content);
                let parent_id = node.parent_id.clone();
                state.commit(node);
                state.publish(&[id.to_string()], parent_id);
                Ok(state.store.get(id).cloned())
            }
        }
    }

    /// Delete a node. Committed nodes are removed everywhere; drafts only
    /// ever existed here. Drafts started under the node go with it.
    ///
    /// Rejected with [`ReplicaError::NodeBusy`] while a generation or merge
    /// placeholder hangs under the node, so results never land under a
    /// parent that is gone.
    pub async fn remove_node(&self, id: &str) -> Result<(), ReplicaError> {
        let mut state = self.state.write().await;
        match state.phase(id) {
            None => Err(ReplicaError::UnknownNode(id.to_string())),
            Some(NodePhase::Loading) => Err(ReplicaError::NodeBusy(id.to_string())),
            Some(_) if !state.dependents(id, NodePhase::Loading).is_empty() => {
                Err(ReplicaError::NodeBusy(id.to_string()))
            }
            Some(NodePhase::Draft) => {
                state.remove_with_drafts(id);
                Ok(())
            }
            Some(NodePhase::Committed) => {
                state.remove_with_drafts(id);
                if let Some(participant_id) = state.identity.clone() {
                    state.emit(RelayEvent::RemoveNode {
                        participant_id,
                        node_id: id.to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Generation
    // ───────────────────────────────────────────────────────────────────

    /// Run `pipeline` behind `request.count` loading placeholders.
    ///
    /// The parent's stored content replaces whatever `request.parent`
    /// carries. On success the placeholders are swapped for the new nodes
    /// and their ids returned (prompt node first); on failure the store is
    /// left exactly as it was.
    pub async fn generate(
        &self,
        pipeline: &GenerationPipeline,
        mut request: GenerationRequest,
    ) -> Result<Vec<NodeId>, ReplicaError> {
        request.validate()?;

        let (placeholders, positions, prompt_anchor) = {
            let mut state = self.state.write().await;
            request.author = state.author();

            if let Some(parent) = request.parent.as_mut() {
                match state.phase(&parent.id) {
                    Some(NodePhase::Committed) => {}
                    Some(NodePhase::Draft) | Some(NodePhase::Loading) => {
                        return Err(ReplicaError::NodeBusy(parent.id.clone()))
                    }
                    None => return Err(ReplicaError::UnknownNode(parent.id.clone())),
                }
                if let Some(node) = state.store.get(&parent.id) {
                    parent.content = node.content.clone();
                }
            }
            let parent_id = request.parent.as_ref().map(|p| p.id.clone());

            let prompt_anchor = state.root_anchor();
            let positions = spread_below(state.anchor_for(parent_id.as_deref()), request.count);
            let mut placeholders = Vec::with_capacity(positions.len());
            for position in &positions {
                let node = IdeaNode::loading(request.author.clone())
                    .with_parent(parent_id.clone())
                    .with_position(Some(*position));
                placeholders.push(node.id.clone());
                state.insert_pending(node, NodePhase::Loading);
            }
            state.announce(|participant_id| RelayEvent::IdeaGenerationStart { participant_id });
            (placeholders, positions, prompt_anchor)
        };

        let outcome = pipeline.run(&request).await;

        let mut state = self.state.write().await;
        for id in &placeholders {
            state.discard(id);
        }

        let batch = match outcome {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("Generation for {:?} failed: {e}", request.prompt);
                state.announce(|participant_id| RelayEvent::IdeaGenerationError { participant_id });
                return Err(e.into());
            }
        };

        // A peer may have removed the parent while the pipeline ran.
        if let Some(parent) = request.parent.as_ref() {
            if !state.store.contains(&parent.id) {
                log::warn!(
                    "Discarding {} ideas: parent {} was removed",
                    batch.ideas.len(),
                    parent.id
                );
                state.announce(|participant_id| RelayEvent::IdeaGenerationError { participant_id });
                return Err(ReplicaError::SourceRemoved(parent.id.clone()));
            }
        }

        let parent_hint = request
            .parent
            .as_ref()
            .map(|p| p.id.clone())
            .or_else(|| batch.prompt_node.as_ref().map(|n| n.id.clone()));

        let mut committed = Vec::with_capacity(batch.ideas.len() + 1);
        if let Some(mut prompt_node) = batch.prompt_node {
            prompt_node.position = Some(prompt_anchor);
            committed.push(prompt_node.id.clone());
            state.commit(prompt_node);
        }
        for (i, mut idea) in batch.ideas.into_iter().enumerate() {
            idea.position = positions.get(i).copied();
            committed.push(idea.id.clone());
            state.commit(idea);
        }

        state.publish(&committed, parent_hint);
        state.announce(|participant_id| RelayEvent::IdeaGenerationComplete { participant_id });
        Ok(committed)
    }

    // ───────────────────────────────────────────────────────────────────
    // Remote events
    // ───────────────────────────────────────────────────────────────────

    /// Apply an event received from the relay. Returns whether it changed
    /// anything locally.
    pub async fn apply_remote(&self, event: &RelayEvent) -> bool {
        let mut state = self.state.write().await;
        let from_self = event
            .participant_id()
            .is_some_and(|p| state.identity.as_deref() == Some(p));

        match event {
            RelayEvent::SyncIdeas { nodes, .. } => {
                if from_self {
                    return false;
                }
                let mut applied = false;
                for node in nodes {
                    if node.is_placeholder() || state.pending.contains_key(&node.id) {
                        log::debug!("Ignoring remote placeholder {}", node.id);
                        continue;
                    }
                    state.store.upsert(node.clone());
                    applied = true;
                }
                applied
            }
            RelayEvent::RemoveNode { node_id, .. } => {
                if from_self || state.pending.contains_key(node_id) {
                    return false;
                }
                state.remove_with_drafts(node_id).is_some()
            }
            RelayEvent::SyncGraphState { .. } => false,
            other => state.presence.apply(other),
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Presence
    // ───────────────────────────────────────────────────────────────────

    /// Broadcast our cursor. Cursors are never applied locally.
    pub async fn move_cursor(&self, x: f32, y: f32, color: &str) -> bool {
        let state = self.state.read().await;
        match state.identity.clone() {
            Some(id) => state.emit(RelayEvent::cursor(id, x, y, color)),
            None => false,
        }
    }

    /// Tell peers we are typing, optionally with a preview.
    pub async fn set_typing(&self, text: Option<String>) -> bool {
        let state = self.state.read().await;
        match state.identity.clone() {
            Some(participant_id) => state.emit(RelayEvent::UserTyping {
                participant_id,
                text,
            }),
            None => false,
        }
    }

    pub async fn stop_typing(&self) -> bool {
        let state = self.state.read().await;
        match state.identity.clone() {
            Some(participant_id) => state.emit(RelayEvent::UserStopTyping { participant_id }),
            None => false,
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Queries
    // ───────────────────────────────────────────────────────────────────

    /// Copy of the whole local store, placeholders included.
    pub async fn snapshot(&self) -> NodeStore {
        self.state.read().await.store.clone()
    }

    /// Committed nodes as other replicas would see them.
    pub async fn published_nodes(&self) -> Vec<IdeaNode> {
        let state = self.state.read().await;
        let mut nodes: Vec<IdeaNode> = state
            .store
            .exportable()
            .filter_map(|n| state.exported(&n.id))
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        nodes
    }

    /// Copy of one node, placeholders and drafts included.
    pub async fn node(&self, id: &str) -> Option<IdeaNode> {
        self.state.read().await.store.get(id).cloned()
    }

    /// Lifecycle phase of `id`, or `None` when it is not in the store.
    pub async fn phase(&self, id: &str) -> Option<NodePhase> {
        self.state.read().await.phase(id)
    }

    /// Cursors and indicators received from peers.
    pub async fn presence(&self) -> PresenceView {
        self.state.read().await.presence.clone()
    }

    /// Participant id used for published events, if attached.
    pub async fn identity(&self) -> Option<ParticipantId> {
        self.state.read().await.identity.clone()
    }
}
