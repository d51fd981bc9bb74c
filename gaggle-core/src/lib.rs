//! # gaggle-core — idea-graph data model
//!
//! An idea graph is a forest of [`IdeaNode`]s: every node has at most one
//! logical `parent_id`, an ordered list of `child_ids`, and a closed set of
//! metadata flags. Merge results are the one exception to the tree shape;
//! they record their sources in `merged_from` and appear in the child list
//! of every source.
//!
//! The [`store::NodeStore`] owns the nodes of one replica and is the only
//! code that edits child lists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub mod store;

pub use store::NodeStore;

pub type NodeId = String;
pub type ParticipantId = String;
pub type RoomId = String;

/// Author recorded on nodes produced without a known participant.
pub const SYSTEM_AUTHOR: &str = "system";

/// Fresh globally unique node id.
pub fn new_node_id() -> NodeId {
    Uuid::new_v4().to_string()
}

/// Wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Presentation-only canvas coordinate.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Same point shifted by (dx, dy).
    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Arithmetic mean of `points`, `None` when empty.
    pub fn centroid(points: &[Position]) -> Option<Position> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0_f32, 0.0_f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Position::new(sx / n, sy / n))
    }
}

/// Who produced a node's content.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum NodeKind {
    AiGenerated,
    UserAuthored,
}

/// Closed flag set attached to every node.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub is_prompt: bool,
    pub is_manual_note: bool,
    pub is_comment: bool,
    pub is_prompt_tool: bool,
    pub is_merged: bool,
    /// Local-only until first committed with content.
    pub is_draft: bool,
    /// Empty placeholder awaiting generation or merge output.
    pub is_loading: bool,
}

/// How a merge combines its sources.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq, Hash)]
pub enum MergeStrategy {
    #[default]
    Synthesize,
    Combine,
    Abstract,
    Contrast,
}

impl MergeStrategy {
    pub const ALL: [MergeStrategy; 4] = [
        MergeStrategy::Synthesize,
        MergeStrategy::Combine,
        MergeStrategy::Abstract,
        MergeStrategy::Contrast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Synthesize => "synthesize",
            MergeStrategy::Combine => "combine",
            MergeStrategy::Abstract => "abstract",
            MergeStrategy::Contrast => "contrast",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MergeStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown merge strategy: {s}"))
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct NodeMetadata {
    pub kind: NodeKind,
    pub flags: NodeFlags,
    /// Source ids of a merge result; each source lists this node as a child.
    pub merged_from: Vec<NodeId>,
    pub generation_prompt: Option<String>,
    /// Short idea text the content was expanded from.
    pub stub: Option<String>,
    pub merge_strategy: Option<MergeStrategy>,
    /// Content is an error report from a failed expansion task.
    pub degraded: bool,
}

impl NodeMetadata {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            flags: NodeFlags::default(),
            merged_from: Vec::new(),
            generation_prompt: None,
            stub: None,
            merge_strategy: None,
            degraded: false,
        }
    }
}

/// One node of the idea graph.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct IdeaNode {
    pub id: NodeId,
    pub content: String,
    pub parent_id: Option<NodeId>,
    pub child_ids: Vec<NodeId>,
    pub metadata: NodeMetadata,
    pub created_by: ParticipantId,
    pub created_at: u64,
    pub updated_at: u64,
    pub position: Option<Position>,
}

impl IdeaNode {
    pub fn new(
        content: impl Into<String>,
        kind: NodeKind,
        created_by: impl Into<ParticipantId>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: new_node_id(),
            content: content.into(),
            parent_id: None,
            child_ids: Vec::new(),
            metadata: NodeMetadata::new(kind),
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            position: None,
        }
    }

    /// Empty AI placeholder shown while generation or merge runs.
    pub fn loading(created_by: impl Into<ParticipantId>) -> Self {
        let mut node = Self::new("", NodeKind::AiGenerated, created_by);
        node.metadata.flags.is_loading = true;
        node
    }

    /// Empty user-authored draft, visible only to its creator.
    pub fn draft(created_by: impl Into<ParticipantId>) -> Self {
        let mut node = Self::new("", NodeKind::UserAuthored, created_by);
        node.metadata.flags.is_draft = true;
        node
    }

    pub fn with_parent(mut self, parent_id: Option<NodeId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_position(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    pub fn is_draft(&self) -> bool {
        self.metadata.flags.is_draft
    }

    pub fn is_loading(&self) -> bool {
        self.metadata.flags.is_loading
    }

    pub fn is_placeholder(&self) -> bool {
        self.is_draft() || self.is_loading()
    }

    /// Drafts and loading placeholders never leave the replica.
    pub fn is_exportable(&self) -> bool {
        !self.is_placeholder()
    }

    /// Replace content and bump `updated_at`.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.updated_at = now_millis().max(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let a = new_node_id();
        let b = new_node_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_loading_placeholder_shape() {
        let node = IdeaNode::loading("alice");
        assert!(node.content.is_empty());
        assert!(node.is_loading());
        assert!(!node.is_draft());
        assert!(!node.is_exportable());
        assert_eq!(node.metadata.kind, NodeKind::AiGenerated);
    }

    #[test]
    fn test_draft_shape() {
        let node = IdeaNode::draft("alice");
        assert!(node.is_draft());
        assert!(node.is_placeholder());
        assert_eq!(node.metadata.kind, NodeKind::UserAuthored);
        assert_eq!(node.created_by, "alice");
    }

    #[test]
    fn test_centroid() {
        let c = Position::centroid(&[Position::new(0.0, 0.0), Position::new(10.0, 20.0)]).unwrap();
        assert_eq!(c, Position::new(5.0, 10.0));
        assert!(Position::centroid(&[]).is_none());
    }

    #[test]
    fn test_merge_strategy_parse() {
        assert_eq!("Contrast".parse::<MergeStrategy>().unwrap(), MergeStrategy::Contrast);
        assert_eq!(" combine ".parse::<MergeStrategy>().unwrap(), MergeStrategy::Combine);
        assert!("blend".parse::<MergeStrategy>().is_err());
        assert_eq!(MergeStrategy::default(), MergeStrategy::Synthesize);
    }

    #[test]
    fn test_set_content_bumps_updated_at() {
        let mut node = IdeaNode::draft("alice");
        let before = node.updated_at;
        node.set_content("ship it");
        assert_eq!(node.content, "ship it");
        assert!(node.updated_at >= before);
    }
}
