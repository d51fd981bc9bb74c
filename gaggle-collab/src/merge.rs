//! Merging committed nodes into one new node.

use std::collections::HashSet;

use gaggle_core::{IdeaNode, MergeStrategy, NodeId, Position};
use gaggle_ideas::{validate_merge, MergeError, MergeSynthesizer};

use crate::replica::{NodePhase, Replica, ReplicaError, LEVEL_HEIGHT};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub source_ids: Vec<NodeId>,
    pub strategy: MergeStrategy,
    pub instruction: Option<String>,
}

impl MergeRequest {
    pub fn new(source_ids: Vec<NodeId>, strategy: MergeStrategy) -> Self {
        Self {
            source_ids,
            strategy,
            instruction: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    fn instruction(&self) -> Option<&str> {
        self.instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Replica {
    /// Merge 2-5 committed nodes.
    ///
    /// A loading placeholder linked under every source is shown while the
    /// synthesizer runs. It keeps its id when filled in, so the merged node
    /// is the one node published. A failed merge removes the placeholder and
    /// leaves the sources untouched, as does a source being removed by a
    /// peer before the result arrives.
    pub async fn merge(
        &self,
        synthesizer: &MergeSynthesizer,
        request: MergeRequest,
    ) -> Result<NodeId, ReplicaError> {
        let instruction = request.instruction().map(str::to_string);
        validate_merge(request.source_ids.len(), instruction.as_deref())
            .map_err(|e| ReplicaError::InvalidMerge(invalid_reason(e)))?;

        let mut seen = HashSet::new();
        if let Some(dup) = request.source_ids.iter().find(|id| !seen.insert(*id)) {
            return Err(ReplicaError::InvalidMerge(format!("node {dup} listed twice")));
        }

        let (placeholder_id, texts) = {
            let mut state = self.state.write().await;

            let mut texts = Vec::with_capacity(request.source_ids.len());
            let mut positions = Vec::new();
            for id in &request.source_ids {
                match state.phase(id) {
                    Some(NodePhase::Committed) => {}
                    Some(NodePhase::Loading) => return Err(ReplicaError::NodeBusy(id.clone())),
                    Some(phase) => {
                        return Err(ReplicaError::InvalidTransition {
                            id: id.clone(),
                            action: "merge",
                            phase,
                        })
                    }
                    None => return Err(ReplicaError::UnknownNode(id.clone())),
                }
                if let Some(node) = state.store.get(id) {
                    texts.push(node.content.clone());
                    positions.extend(node.position);
                }
            }

            let position = Position::centroid(&positions)
                .map(|c| c.offset(0.0, LEVEL_HEIGHT))
                .unwrap_or_else(|| state.root_anchor());

            let mut placeholder = IdeaNode::loading(state.author()).with_position(Some(position));
            let metadata = &mut placeholder.metadata;
            metadata.flags.is_merged = true;
            metadata.merged_from = request.source_ids.clone();
            metadata.merge_strategy = Some(request.strategy);
            metadata.generation_prompt = Some(instruction.clone().unwrap_or_else(|| {
                format!(
                    "Merged {} ideas using {} strategy",
                    request.source_ids.len(),
                    request.strategy
                )
            }));

            let placeholder_id = placeholder.id.clone();
            state.insert_pending(placeholder, NodePhase::Loading);
            (placeholder_id, texts)
        };

        let outcome = synthesizer
            .synthesize(&texts, request.strategy, instruction.as_deref())
            .await;

        let mut state = self.state.write().await;
        let content = match outcome {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Merge of {} ideas failed: {e}", request.source_ids.len());
                state.discard(&placeholder_id);
                return Err(e.into());
            }
        };

        if let Some(gone) = request
            .source_ids
            .iter()
            .find(|id| !state.store.contains(id.as_str()))
        {
            log::warn!("Discarding merge: source {gone} was removed");
            state.discard(&placeholder_id);
            return Err(ReplicaError::SourceRemoved(gone.clone()));
        }

        let Some(mut merged) = state.store.get(&placeholder_id).cloned() else {
            // Removed by a remote peer while the merge ran.
            state.pending.remove(&placeholder_id);
            return Err(ReplicaError::UnknownNode(placeholder_id));
        };
        merged.set_content(content);
        merged.metadata.flags.is_loading = false;
        state.commit(merged);
        state.publish(&[placeholder_id.clone()], None);
        Ok(placeholder_id)
    }
}

fn invalid_reason(error: MergeError) -> String {
    match error {
        MergeError::InvalidRequest(reason) => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RelayEvent;
    use crate::replica::DraftKind;
    use gaggle_ideas::{MergeConfig, MockCapability};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn committed(replica: &Replica, content: &str, at: Position) -> NodeId {
        let id = replica
            .create_draft(DraftKind::ManualNote, None, Some(at))
            .await
            .unwrap();
        replica.commit_draft(&id, content).await.unwrap();
        id
    }

    fn synthesizer() -> MergeSynthesizer {
        MergeSynthesizer::new(Arc::new(MockCapability::new()))
    }

    #[tokio::test]
    async fn test_merge_links_under_every_source() {
        let replica = Replica::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        replica.attach("alice", tx).await;

        let a = committed(&replica, "A", Position::new(0.0, 0.0)).await;
        let b = committed(&replica, "B", Position::new(200.0, 100.0)).await;
        while rx.try_recv().is_ok() {}

        let request = MergeRequest::new(vec![a.clone(), b.clone()], MergeStrategy::Combine);
        let merged_id = replica.merge(&synthesizer(), request).await.unwrap();

        let merged = replica.node(&merged_id).await.unwrap();
        assert!(merged.metadata.flags.is_merged);
        assert!(!merged.is_loading());
        assert!(!merged.content.is_empty());
        assert_eq!(merged.parent_id, None);
        assert_eq!(merged.metadata.merged_from, vec![a.clone(), b.clone()]);
        assert_eq!(merged.metadata.merge_strategy, Some(MergeStrategy::Combine));
        assert_eq!(
            merged.metadata.generation_prompt.as_deref(),
            Some("Merged 2 ideas using combine strategy")
        );
        assert_eq!(merged.position, Some(Position::new(100.0, 200.0)));

        let store = replica.snapshot().await;
        assert_eq!(store.get(&a).unwrap().child_ids, vec![merged_id.clone()]);
        assert_eq!(store.get(&b).unwrap().child_ids, vec![merged_id.clone()]);
        assert!(!store.roots().contains(&merged_id));

        match rx.try_recv().unwrap() {
            RelayEvent::SyncIdeas { nodes, parent_id, .. } => {
                assert_eq!(parent_id, None);
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].id, merged_id);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_merge_instruction_recorded() {
        let replica = Replica::new();
        let a = committed(&replica, "A", Position::new(0.0, 0.0)).await;
        let b = committed(&replica, "B", Position::new(0.0, 0.0)).await;

        let request = MergeRequest::new(vec![a, b], MergeStrategy::Synthesize)
            .with_instruction("  keep it cheap ");
        let id = replica.merge(&synthesizer(), request).await.unwrap();
        let node = replica.node(&id).await.unwrap();
        assert_eq!(node.metadata.generation_prompt.as_deref(), Some("keep it cheap"));
        assert!(node.content.contains("keep it cheap"));
    }

    #[tokio::test]
    async fn test_merge_rejects_bad_source_sets() {
        let replica = Replica::new();
        let a = committed(&replica, "A", Position::default()).await;
        let draft = replica.create_draft(DraftKind::Comment, None, None).await.unwrap();

        let single = MergeRequest::new(vec![a.clone()], MergeStrategy::Combine);
        assert!(matches!(
            replica.merge(&synthesizer(), single).await,
            Err(ReplicaError::InvalidMerge(_))
        ));

        let dup = MergeRequest::new(vec![a.clone(), a.clone()], MergeStrategy::Combine);
        assert!(matches!(
            replica.merge(&synthesizer(), dup).await,
            Err(ReplicaError::InvalidMerge(_))
        ));

        let with_draft = MergeRequest::new(vec![a.clone(), draft], MergeStrategy::Combine);
        assert!(matches!(
            replica.merge(&synthesizer(), with_draft).await,
            Err(ReplicaError::InvalidTransition { action: "merge", .. })
        ));

        let missing = MergeRequest::new(vec![a, "ghost".into()], MergeStrategy::Combine);
        assert_eq!(
            replica.merge(&synthesizer(), missing).await,
            Err(ReplicaError::UnknownNode("ghost".into()))
        );
        assert_eq!(replica.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_merge_restores_sources() {
        let replica = Replica::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        replica.attach("alice", tx).await;
        let a = committed(&replica, "A", Position::default()).await;
        let b = committed(&replica, "B", Position::default()).await;
        let c = committed(&replica, "C", Position::default()).await;
        while rx.try_recv().is_ok() {}
        let before = replica.snapshot().await;

        let slow = MergeSynthesizer::with_config(
            Arc::new(MockCapability::with_latency(Duration::from_secs(5))),
            MergeConfig {
                timeout: Duration::from_millis(10),
            },
        );
        let request = MergeRequest::new(vec![a, b, c], MergeStrategy::Contrast);
        let err = replica.merge(&slow, request).await.unwrap_err();
        assert!(matches!(err, ReplicaError::Merge(_)));

        assert_eq!(replica.snapshot().await, before);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_merge_dropped_when_source_removed_by_peer() {
        let replica = Replica::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        replica.attach("alice", tx).await;
        let a = committed(&replica, "A", Position::default()).await;
        let b = committed(&replica, "B", Position::default()).await;
        while rx.try_recv().is_ok() {}

        let slow = MergeSynthesizer::new(Arc::new(MockCapability::with_latency(
            Duration::from_millis(100),
        )));
        let request = MergeRequest::new(vec![a.clone(), b.clone()], MergeStrategy::Combine);
        let removal = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let local = replica.remove_node(&a).await;
            let remote = replica
                .apply_remote(&RelayEvent::RemoveNode {
                    participant_id: "bob".into(),
                    node_id: b.clone(),
                })
                .await;
            (local, remote)
        };
        let (merged, (local, remote)) = tokio::join!(replica.merge(&slow, request), removal);

        assert_eq!(local, Err(ReplicaError::NodeBusy(a.clone())));
        assert!(remote);
        assert_eq!(merged, Err(ReplicaError::SourceRemoved(b.clone())));

        let store = replica.snapshot().await;
        assert_eq!(store.len(), 1);
        assert!(store.get(&a).unwrap().child_ids.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
