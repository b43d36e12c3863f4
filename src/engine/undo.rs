//! Undo — pre-state capture and replay for modifying actions.
//!
//! Snapshots live in an explicit side table keyed by action ID; the action
//! record itself only mirrors the snapshot on `result.pre_state` so the host
//! can tell that undo is available. Once an undo succeeds both the table
//! entry and the mirror are cleared — undo of an undo is not supported.

use std::collections::HashMap;

use serde_json::Value;

use crate::store::client::DocumentStore;
use crate::store::types::{draft_id, published_id};
use crate::store::StoreError;

use super::types::{ActionPayload, ActionResult, ParsedAction};

// ─── Snapshots ──────────────────────────────────────────────────────────────

/// What kind of mutation the snapshot protects against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotKind {
    Update,
    Delete,
}

/// A captured pre-mutation document.
#[derive(Debug, Clone)]
struct Snapshot {
    /// The ID to restore the document under.
    document_id: String,
    document: Value,
    kind: SnapshotKind,
    captured_at: String,
}

// ─── UndoManager ────────────────────────────────────────────────────────────

/// Owns the `action_id → snapshot` side table.
#[derive(Default)]
pub struct UndoManager {
    snapshots: HashMap<String, Snapshot>,
}

impl UndoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the pre-state for a modifying action, before it is dispatched.
    ///
    /// For updates the editable draft is captured when it exists (that is the
    /// document the patch will land on), else the published variant. For
    /// deletes, whichever variant exists is captured in full. A target that
    /// does not exist yet leaves nothing to capture — the execute step will
    /// report the missing document itself.
    pub async fn capture(
        &mut self,
        store: &dyn DocumentStore,
        action: &ParsedAction,
    ) -> Result<(), StoreError> {
        let (document_id, kind) = match &action.payload {
            ActionPayload::Update { document_id, .. } => (document_id, SnapshotKind::Update),
            ActionPayload::Delete { document_id, .. } => (document_id, SnapshotKind::Delete),
            _ => return Ok(()),
        };

        let draft = draft_id(document_id);
        let published = published_id(document_id).to_string();

        let (target_id, document) = match store.get_document(&draft).await? {
            Some(doc) => (draft, doc),
            None => match store.get_document(&published).await? {
                Some(doc) => match kind {
                    // The update will materialize and patch the draft;
                    // restoring means putting the published content back
                    // under the draft ID
                    SnapshotKind::Update => (draft, doc),
                    SnapshotKind::Delete => (published, doc),
                },
                None => return Ok(()),
            },
        };

        tracing::debug!(
            action_id = %action.id,
            document_id = %target_id,
            kind = ?kind,
            "captured pre-state snapshot"
        );
        self.snapshots.insert(
            action.id.clone(),
            Snapshot {
                document_id: target_id,
                document,
                kind,
                captured_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        Ok(())
    }

    /// The captured document for an action, for mirroring onto
    /// `ActionResult.pre_state`.
    pub fn pre_state_for(&self, action_id: &str) -> Option<Value> {
        self.snapshots.get(action_id).map(|s| s.document.clone())
    }

    pub fn has_snapshot(&self, action_id: &str) -> bool {
        self.snapshots.contains_key(action_id)
    }

    /// Drop a snapshot without replaying it (action failed or was cancelled).
    pub fn discard(&mut self, action_id: &str) {
        self.snapshots.remove(action_id);
    }

    /// Replay the snapshot for an action: recreate a deleted document, or
    /// restore an updated one to its captured field values. On success the
    /// snapshot is cleared from both the side table and the action's stored
    /// result, making the action terminal.
    pub async fn undo(
        &mut self,
        store: &dyn DocumentStore,
        action: &mut ParsedAction,
    ) -> ActionResult {
        let Some(snapshot) = self.snapshots.get(&action.id) else {
            return ActionResult::failure(format!(
                "nothing to undo for action '{}' — no pre-state was captured or it \
                 was already restored",
                action.id
            ));
        };

        let restore = store
            .create_or_replace(&snapshot.document_id, snapshot.document.clone())
            .await;

        match restore {
            Ok(_) => {
                let document_id = snapshot.document_id.clone();
                let captured_at = snapshot.captured_at.clone();
                let verb = match snapshot.kind {
                    SnapshotKind::Update => "Restored",
                    SnapshotKind::Delete => "Recreated",
                };
                self.snapshots.remove(&action.id);
                if let Some(result) = action.result.as_mut() {
                    result.pre_state = None;
                }
                tracing::info!(
                    action_id = %action.id,
                    document_id = %document_id,
                    "undo applied"
                );
                ActionResult::ok(format!(
                    "{verb} document '{document_id}' to its state from {captured_at}"
                ))
                .with_document_id(document_id)
            }
            Err(e) => {
                // Snapshot retained: the operator may retry
                ActionResult::failure(format!("undo failed: {e}"))
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;
    use serde_json::json;

    fn update_action(document_id: &str) -> ParsedAction {
        ParsedAction::new(
            "",
            ActionPayload::Update {
                document_id: document_id.to_string(),
                fields: serde_json::Map::new(),
            },
        )
    }

    fn delete_action(document_id: &str) -> ParsedAction {
        ParsedAction::new(
            "",
            ActionPayload::Delete {
                document_id: document_id.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_capture_prefers_draft_for_updates() {
        let store = MemoryDocumentStore::new();
        store
            .seed(vec![
                json!({"_id": "p1", "_type": "page", "title": "Published"}),
                json!({"_id": "drafts.p1", "_type": "page", "title": "Draft"}),
            ])
            .await;

        let action = update_action("p1");
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();

        let snapshot = undo.pre_state_for(&action.id).unwrap();
        assert_eq!(snapshot["title"], "Draft");
    }

    #[tokio::test]
    async fn test_capture_falls_back_to_published() {
        let store = MemoryDocumentStore::new();
        store
            .seed(vec![json!({"_id": "p1", "_type": "page", "title": "Published"})])
            .await;

        let action = update_action("p1");
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();
        assert_eq!(undo.pre_state_for(&action.id).unwrap()["title"], "Published");
    }

    #[tokio::test]
    async fn test_capture_missing_document_is_a_no_op() {
        let store = MemoryDocumentStore::new();
        let action = update_action("ghost");
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();
        assert!(!undo.has_snapshot(&action.id));
    }

    #[tokio::test]
    async fn test_capture_skips_non_modifying_actions() {
        let store = MemoryDocumentStore::new();
        let action = ParsedAction::new(
            "",
            ActionPayload::Query {
                query: "*".into(),
                params: None,
            },
        );
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();
        assert!(!undo.has_snapshot(&action.id));
    }

    #[tokio::test]
    async fn test_undo_restores_deleted_document() {
        let store = MemoryDocumentStore::new();
        let original = json!({"_id": "p1", "_type": "page", "title": "Keep me"});
        store.seed(vec![original.clone()]).await;

        let mut action = delete_action("p1");
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();
        store.delete("p1").await.unwrap();
        assert!(store.get_document("p1").await.unwrap().is_none());

        let result = undo.undo(&store, &mut action).await;
        assert!(result.success, "{}", result.message);
        let restored = store.get_document("p1").await.unwrap().unwrap();
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn test_undo_restores_updated_draft_field_equal() {
        let store = MemoryDocumentStore::new();
        store
            .seed(vec![json!({"_id": "drafts.p1", "_type": "page", "title": "Before"})])
            .await;

        let mut action = update_action("p1");
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();

        // The mutation the capture protects against
        store
            .patch(
                "drafts.p1",
                vec![crate::store::PatchOp::Set {
                    fields: {
                        let mut m = serde_json::Map::new();
                        m.insert("title".to_string(), json!("After"));
                        m
                    },
                }],
            )
            .await
            .unwrap();

        // Simulate the executor mirroring pre-state onto the result
        action.result = Some(
            ActionResult::ok("updated")
                .with_document_id("drafts.p1"),
        );
        action.result.as_mut().unwrap().pre_state = undo.pre_state_for(&action.id);

        let result = undo.undo(&store, &mut action).await;
        assert!(result.success);
        let restored = store.get_document("drafts.p1").await.unwrap().unwrap();
        assert_eq!(restored["title"], "Before");

        // Terminal: mirror and side table both cleared
        assert!(action.result.as_ref().unwrap().pre_state.is_none());
        assert!(!undo.has_snapshot(&action.id));
    }

    #[tokio::test]
    async fn test_undo_twice_fails() {
        let store = MemoryDocumentStore::new();
        store
            .seed(vec![json!({"_id": "p1", "_type": "page", "title": "x"})])
            .await;

        let mut action = delete_action("p1");
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();
        store.delete("p1").await.unwrap();

        assert!(undo.undo(&store, &mut action).await.success);
        let second = undo.undo(&store, &mut action).await;
        assert!(!second.success);
        assert!(second.message.contains("nothing to undo"));
    }

    #[tokio::test]
    async fn test_failed_undo_retains_snapshot() {
        let store = MemoryDocumentStore::new();
        store
            .seed(vec![json!({"_id": "p1", "_type": "page"})])
            .await;

        let mut action = delete_action("p1");
        let mut undo = UndoManager::new();
        undo.capture(&store, &action).await.unwrap();
        store.delete("p1").await.unwrap();

        store.fail_write_number(1).await;
        let result = undo.undo(&store, &mut action).await;
        assert!(!result.success);
        assert!(undo.has_snapshot(&action.id), "snapshot kept for retry");

        // Retry succeeds
        assert!(undo.undo(&store, &mut action).await.success);
    }
}
