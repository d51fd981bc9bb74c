//! Keyed node storage for one replica.
//!
//! `upsert` and `remove` are the only operations that touch `child_ids`.
//! Neither fails on dangling references: a node whose parent has not arrived
//! yet is kept as an orphan and linked as soon as the parent is upserted.

use std::collections::HashMap;

use crate::{IdeaNode, NodeId};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeStore {
    nodes: HashMap<NodeId, IdeaNode>,
    /// Ids with neither a parent nor merge sources, in insertion order.
    roots: Vec<NodeId>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `node` by id.
    ///
    /// Links the id into its parent's child list and into the child list of
    /// every merge source (append-if-absent), then adopts any stored node that
    /// already references this id. Applying the same node twice is a no-op.
    pub fn upsert(&mut self, node: IdeaNode) {
        let id = node.id.clone();

        if let Some(previous) = self.nodes.get(&id) {
            let stale_parent = previous
                .parent_id
                .clone()
                .filter(|old| node.parent_id.as_ref() != Some(old));
            let stale_sources: Vec<NodeId> = previous
                .metadata
                .merged_from
                .iter()
                .filter(|s| !node.metadata.merged_from.contains(s))
                .cloned()
                .collect();
            for owner in stale_parent.iter().chain(stale_sources.iter()) {
                self.unlink_child(owner, &id);
            }
        }

        let parent = node.parent_id.clone();
        let sources = node.metadata.merged_from.clone();
        let is_root = parent.is_none() && sources.is_empty();
        self.nodes.insert(id.clone(), node);

        if is_root {
            if !self.roots.contains(&id) {
                self.roots.push(id.clone());
            }
        } else {
            self.roots.retain(|r| r != &id);
        }

        if let Some(parent_id) = parent {
            if !self.link_child(&parent_id, &id) && !self.nodes.contains_key(&parent_id) {
                log::trace!("Node {id} stored as orphan of absent parent {parent_id}");
            }
        }
        for source in &sources {
            self.link_child(source, &id);
        }

        self.adopt_children(&id);
    }

    /// Delete `id` and drop it from the root list and every child list.
    pub fn remove(&mut self, id: &str) -> Option<IdeaNode> {
        let removed = self.nodes.remove(id);
        self.roots.retain(|r| r != id);
        for node in self.nodes.values_mut() {
            node.child_ids.retain(|c| c != id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&IdeaNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Resolved children of `id`, in child-list order.
    pub fn children(&self, id: &str) -> Vec<&IdeaNode> {
        self.nodes
            .get(id)
            .map(|n| n.child_ids.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &IdeaNode> {
        self.nodes.values()
    }

    /// Nodes that may leave this replica: no drafts, no loading placeholders.
    pub fn exportable(&self) -> impl Iterator<Item = &IdeaNode> {
        self.nodes.values().filter(|n| n.is_exportable())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    fn link_child(&mut self, owner: &str, child: &str) -> bool {
        if owner == child {
            return false;
        }
        match self.nodes.get_mut(owner) {
            Some(node) if !node.child_ids.iter().any(|c| c == child) => {
                node.child_ids.push(child.to_string());
                true
            }
            _ => false,
        }
    }

    fn unlink_child(&mut self, owner: &str, child: &str) {
        if let Some(node) = self.nodes.get_mut(owner) {
            node.child_ids.retain(|c| c != child);
        }
    }

    fn adopt_children(&mut self, id: &str) {
        let mut referencing: Vec<(u64, NodeId)> = self
            .nodes
            .values()
            .filter(|n| n.id != id)
            .filter(|n| {
                n.parent_id.as_deref() == Some(id)
                    || n.metadata.merged_from.iter().any(|s| s == id)
            })
            .map(|n| (n.created_at, n.id.clone()))
            .collect();
        referencing.sort();

        for (_, child) in referencing {
            self.link_child(id, &child);
        }
    }
}
