//! Presence: who is where, who is typing, who is generating.
//!
//! The hub keeps one [`CursorEntry`] per member so late joiners can be shown
//! existing cursors. Each replica folds presence events into a
//! [`PresenceView`]; none of this touches the node graph.

use std::collections::{HashMap, HashSet};

use gaggle_core::{now_millis, ParticipantId};

use crate::protocol::{CursorPayload, RelayEvent};

// ───────────────────────────────────────────────────────────────────
// Cursor cache entry
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    pub participant_id: ParticipantId,
    pub x: f32,
    pub y: f32,
    pub color: String,
    /// Unix millis of the last cursor-move seen.
    pub last_seen: u64,
}

impl CursorEntry {
    pub fn from_payload(participant_id: impl Into<ParticipantId>, payload: &CursorPayload) -> Self {
        Self {
            participant_id: participant_id.into(),
            x: payload.x,
            y: payload.y,
            color: payload.color.clone(),
            last_seen: now_millis(),
        }
    }

    /// The cursor-move event that recreates this entry on a receiver.
    pub fn to_event(&self) -> RelayEvent {
        RelayEvent::cursor(self.participant_id.clone(), self.x, self.y, self.color.clone())
    }
}

// ───────────────────────────────────────────────────────────────────
// Replica-side view
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PresenceView {
    cursors: HashMap<ParticipantId, CursorEntry>,
    /// Typing participants and the draft text they shared, if any.
    typing: HashMap<ParticipantId, Option<String>>,
    generating: HashSet<ParticipantId>,
}

impl PresenceView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in. Returns `false` for events that are not presence.
    pub fn apply(&mut self, event: &RelayEvent) -> bool {
        match event {
            RelayEvent::CursorMove(payload) => {
                self.cursors.insert(
                    payload.participant_id.clone(),
                    CursorEntry::from_payload(payload.participant_id.clone(), payload),
                );
            }
            RelayEvent::UserTyping {
                participant_id,
                text,
            } => {
                self.typing.insert(participant_id.clone(), text.clone());
            }
            RelayEvent::UserStopTyping { participant_id } => {
                self.typing.remove(participant_id);
            }
            RelayEvent::IdeaGenerationStart { participant_id } => {
                self.generating.insert(participant_id.clone());
            }
            RelayEvent::IdeaGenerationComplete { participant_id }
            | RelayEvent::IdeaGenerationError { participant_id } => {
                self.generating.remove(participant_id);
            }
            RelayEvent::UserLeft { participant_id } => self.forget(participant_id),
            _ => return false,
        }
        true
    }

    /// Drop everything known about `participant_id`.
    pub fn forget(&mut self, participant_id: &str) {
        self.cursors.remove(participant_id);
        self.typing.remove(participant_id);
        self.generating.remove(participant_id);
    }

    /// Remove cursors not updated within `max_age_ms` of `now`. Returns the
    /// participants whose cursor was dropped.
    pub fn prune_stale(&mut self, now: u64, max_age_ms: u64) -> Vec<ParticipantId> {
        let stale: Vec<ParticipantId> = self
            .cursors
            .values()
            .filter(|c| now.saturating_sub(c.last_seen) > max_age_ms)
            .map(|c| c.participant_id.clone())
            .collect();
        for id in &stale {
            self.cursors.remove(id);
        }
        stale
    }

    pub fn cursor(&self, participant_id: &str) -> Option<&CursorEntry> {
        self.cursors.get(participant_id)
    }

    /// Cursors ordered by participant id.
    pub fn cursors(&self) -> Vec<&CursorEntry> {
        let mut all: Vec<_> = self.cursors.values().collect();
        all.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        all
    }

    pub fn is_typing(&self, participant_id: &str) -> bool {
        self.typing.contains_key(participant_id)
    }

    pub fn typing_text(&self, participant_id: &str) -> Option<&str> {
        self.typing.get(participant_id).and_then(|t| t.as_deref())
    }

    pub fn is_generating(&self, participant_id: &str) -> bool {
        self.generating.contains(participant_id)
    }

    pub fn generating_count(&self) -> usize {
        self.generating.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_entry_roundtrip_through_event() {
        let payload = CursorPayload {
            participant_id: "ignored".into(),
            x: 4.0,
            y: 2.0,
            color: "#abcdef".into(),
        };
        let entry = CursorEntry::from_payload("bob", &payload);
        assert_eq!(entry.participant_id, "bob");
        assert_eq!(entry.to_event(), RelayEvent::cursor("bob", 4.0, 2.0, "#abcdef"));
        assert!(entry.last_seen > 0);
    }

    #[test]
    fn test_typing_lifecycle() {
        let mut view = PresenceView::new();
        assert!(view.apply(&RelayEvent::UserTyping {
            participant_id: "bob".into(),
            text: Some("half an ide".into()),
        }));
        assert!(view.is_typing("bob"));
        assert_eq!(view.typing_text("bob"), Some("half an ide"));

        view.apply(&RelayEvent::UserStopTyping {
            participant_id: "bob".into(),
        });
        assert!(!view.is_typing("bob"));
    }

    #[test]
    fn test_generation_indicator() {
        let mut view = PresenceView::new();
        view.apply(&RelayEvent::IdeaGenerationStart {
            participant_id: "carol".into(),
        });
        assert!(view.is_generating("carol"));
        view.apply(&RelayEvent::IdeaGenerationError {
            participant_id: "carol".into(),
        });
        assert_eq!(view.generating_count(), 0);
    }

    #[test]
    fn test_user_left_clears_everything() {
        let mut view = PresenceView::new();
        view.apply(&RelayEvent::cursor("dave", 1.0, 1.0, "red"));
        view.apply(&RelayEvent::UserTyping {
            participant_id: "dave".into(),
            text: None,
        });
        view.apply(&RelayEvent::UserLeft {
            participant_id: "dave".into(),
        });
        assert!(view.cursor("dave").is_none());
        assert!(!view.is_typing("dave"));
    }

    #[test]
    fn test_non_presence_ignored() {
        let mut view = PresenceView::new();
        assert!(!view.apply(&RelayEvent::Ping));
        assert!(!view.apply(&RelayEvent::SyncGraphState {
            participant_id: "x".into()
        }));
    }

    #[test]
    fn test_prune_stale() {
        let mut view = PresenceView::new();
        view.apply(&RelayEvent::cursor("old", 0.0, 0.0, "red"));
        let seen = view.cursor("old").unwrap().last_seen;
        assert!(view.prune_stale(seen + 10, 1_000).is_empty());
        assert_eq!(view.prune_stale(seen + 5_000, 1_000), vec!["old".to_string()]);
        assert!(view.cursors().is_empty());
    }
}
