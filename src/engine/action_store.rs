//! Per-conversation action lists.
//!
//! An explicit store object the host passes around — no module-level
//! globals. Each conversation's list is touched on every access and pruned
//! once idle past the TTL, so abandoned conversations don't pin their
//! actions (and any pre-state snapshots hanging off them) forever.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::config::EngineConfig;
use super::types::ParsedAction;

struct ConversationActions {
    actions: Vec<ParsedAction>,
    touched: Instant,
}

/// In-memory, TTL-bounded registry of parsed actions per conversation.
pub struct ActionStore {
    ttl: Duration,
    conversations: HashMap<String, ConversationActions>,
}

impl ActionStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.action_ttl_secs),
            conversations: HashMap::new(),
        }
    }

    /// Append a reply's actions to a conversation, creating it on first use.
    pub fn record(&mut self, conversation_id: &str, actions: Vec<ParsedAction>) {
        let entry = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationActions {
                actions: Vec::new(),
                touched: Instant::now(),
            });
        entry.actions.extend(actions);
        entry.touched = Instant::now();
    }

    /// All actions recorded for a conversation, oldest first.
    pub fn actions(&mut self, conversation_id: &str) -> Option<&[ParsedAction]> {
        let entry = self.conversations.get_mut(conversation_id)?;
        entry.touched = Instant::now();
        Some(&entry.actions)
    }

    /// Mutable lookup of one action, for the executor to write status into.
    pub fn action_mut(
        &mut self,
        conversation_id: &str,
        action_id: &str,
    ) -> Option<&mut ParsedAction> {
        let entry = self.conversations.get_mut(conversation_id)?;
        entry.touched = Instant::now();
        entry.actions.iter_mut().find(|a| a.id == action_id)
    }

    /// Drop a conversation's actions outright.
    pub fn discard(&mut self, conversation_id: &str) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    /// Remove every conversation idle past the TTL; returns how many were
    /// dropped.
    pub fn prune_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.conversations.len();
        self.conversations
            .retain(|_, entry| entry.touched.elapsed() < ttl);
        let pruned = before - self.conversations.len();
        if pruned > 0 {
            tracing::debug!(pruned, "expired conversation action lists dropped");
        }
        pruned
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
