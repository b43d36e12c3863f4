//! Action execution — dispatch, retry, cancellation, and result shaping.
//!
//! `ActionEngine` is the facade the host drives: it validates, captures
//! pre-state, routes each action to the right store primitive (or the
//! incremental builder), and normalizes every outcome — success, store
//! failure, validation rejection, cancellation — into an `ActionResult`.
//! Nothing in this module lets an error escape to the caller as an `Err`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::store::client::DocumentStore;
use crate::store::types::{draft_id, published_id, AssetMeta, AssetSource, PatchOp};
use crate::store::StoreError;

use super::config::EngineConfig;
use super::errors::EngineError;
use super::tree_builder::TreeBuilder;
use super::types::{
    needs_incremental_build, ActionPayload, ActionResult, ActionStatus, PageSpec, ParsedAction,
    SectionSpec,
};
use super::undo::UndoManager;
use super::validator::Validator;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Maximum retry attempts for transient store errors.
const MAX_RETRIES: u32 = 2;

/// Base delay between retries (doubles each attempt).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ─── Cancellation ───────────────────────────────────────────────────────────

type TokenMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Cloneable handle for cancelling in-flight actions from another task.
#[derive(Clone)]
pub struct CancelHandle {
    tokens: TokenMap,
}

impl CancelHandle {
    /// Cancel the in-flight action with this ID. Returns `false` when no
    /// such action is currently executing.
    pub fn cancel(&self, action_id: &str) -> bool {
        let tokens = self.tokens.lock().expect("cancellation map poisoned");
        match tokens.get(action_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

// ─── ActionEngine ───────────────────────────────────────────────────────────

/// The pipeline facade: validate → capture pre-state → execute → shape result.
pub struct ActionEngine {
    store: Arc<dyn DocumentStore>,
    validator: Validator,
    builder: TreeBuilder,
    undo: UndoManager,
    tokens: TokenMap,
}

impl ActionEngine {
    pub fn new(store: Arc<dyn DocumentStore>, config: &EngineConfig) -> Self {
        Self {
            validator: Validator::new(config),
            builder: TreeBuilder::new(store.clone(), config),
            undo: UndoManager::new(),
            tokens: Arc::new(Mutex::new(HashMap::new())),
            store,
        }
    }

    /// Handle for cancelling actions while `execute` is in flight elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tokens: self.tokens.clone(),
        }
    }

    /// Cancel an in-flight action by ID.
    pub fn cancel(&self, action_id: &str) -> bool {
        self.cancel_handle().cancel(action_id)
    }

    /// Execute a single action, mutating its status/result/error in place.
    pub async fn execute(&mut self, action: &mut ParsedAction) -> ActionResult {
        action.status = ActionStatus::Executing;
        action.error = None;
        tracing::info!(
            action_id = %action.id,
            action_type = action.action_type().as_str(),
            "executing action"
        );

        // 1. Pre-flight validation — zero network, terminal on failure
        if let Some(violation) = self.validator.validate(action) {
            return self.finish_failed(action, violation.to_string());
        }

        // 2. Pre-state capture for modifying actions
        if action.payload.is_modifying() {
            if let Err(e) = self.undo.capture(self.store.as_ref(), action).await {
                return self.finish_failed(action, format!("could not capture pre-state: {e}"));
            }
        }

        // 3. Dispatch, racing the action's cancellation token. Incremental
        // builds are exempt: aborting between shell writes would strand the
        // page in an inconsistent state, so a build always runs to its next
        // stable point and the caller deletes the partial document instead.
        let token = self.register_token(&action.id);
        let outcome = if is_incremental_create(&action.payload) {
            Some(self.dispatch(&action.payload).await)
        } else {
            tokio::select! {
                _ = token.cancelled() => None,
                result = self.dispatch(&action.payload) => Some(result),
            }
        };
        self.clear_token(&action.id);

        // 4. Shape the outcome
        match outcome {
            None => {
                self.undo.discard(&action.id);
                action.status = ActionStatus::Cancelled;
                let result = ActionResult::failure("action cancelled by the caller");
                action.result = Some(result.clone());
                tracing::info!(action_id = %action.id, "action cancelled");
                result
            }
            Some(Ok(mut result)) => {
                if action.payload.is_modifying() {
                    result.pre_state = self.undo.pre_state_for(&action.id);
                }
                action.status = ActionStatus::Completed;
                action.result = Some(result.clone());
                result
            }
            Some(Err(e)) => {
                self.undo.discard(&action.id);
                self.finish_failed(action, e.to_string())
            }
        }
    }

    /// Execute a batch sequentially in extraction order, stopping at the
    /// first failure. Actions after the stop point resolve as `cancelled`
    /// so nothing is left pending.
    pub async fn execute_all(&mut self, actions: &mut [ParsedAction]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        let mut halted = false;

        for action in actions.iter_mut() {
            if halted {
                action.status = ActionStatus::Cancelled;
                let result = ActionResult::failure(
                    "not executed: an earlier action in this reply failed",
                );
                action.result = Some(result.clone());
                results.push(result);
                continue;
            }

            let result = self.execute(action).await;
            let success = result.success;
            results.push(result);
            if !success {
                halted = true;
            }
        }

        results
    }

    /// Undo a previously executed modifying action from its captured
    /// pre-state.
    pub async fn undo_action(&mut self, action: &mut ParsedAction) -> ActionResult {
        self.undo.undo(self.store.as_ref(), action).await
    }

    /// Append a section to an existing page, shell-then-fill.
    pub async fn append_section(
        &self,
        document_id: &str,
        section: &SectionSpec,
    ) -> Result<String, EngineError> {
        self.builder.append_section(document_id, section).await
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    async fn dispatch(&self, payload: &ActionPayload) -> Result<ActionResult, EngineError> {
        match payload {
            ActionPayload::Create {
                document_type,
                fields,
            } => self.dispatch_create(document_type, fields).await,
            ActionPayload::Update {
                document_id,
                fields,
            } => self.dispatch_update(document_id, fields).await,
            ActionPayload::Delete { document_id } => self.dispatch_delete(document_id).await,
            ActionPayload::Query { query, params } => self.dispatch_query(query, params).await,
            ActionPayload::Navigate { path, document_id } => {
                dispatch_navigate(path.as_deref(), document_id.as_deref())
            }
            ActionPayload::Explain { explanation } => {
                Ok(ActionResult::ok(explanation.clone()))
            }
            ActionPayload::UploadAsset {
                kind,
                url,
                filename,
            } => {
                let meta = AssetMeta {
                    filename: filename.clone(),
                    content_type: None,
                };
                let asset = self
                    .with_retry("upload asset", || {
                        let store = self.store.clone();
                        let kind = *kind;
                        let url = url.clone();
                        let meta = meta.clone();
                        async move {
                            store
                                .upload_asset(kind, AssetSource::Url(url), meta)
                                .await
                        }
                    })
                    .await?;
                Ok(ActionResult::ok(format!(
                    "Uploaded {} asset '{}'",
                    kind.as_str(),
                    asset.id
                ))
                .with_document_id(asset.id.clone())
                .with_data(serde_json::to_value(&asset)?))
            }
            ActionPayload::FetchExternalFrame { url } => {
                let frame = self
                    .with_retry("fetch external frame", || {
                        let store = self.store.clone();
                        let url = url.clone();
                        async move { store.fetch_external_frame(&url).await }
                    })
                    .await?;
                Ok(ActionResult::ok("Fetched external frame").with_data(frame))
            }
            ActionPayload::UploadExternalAsset { url, filename } => {
                let meta = AssetMeta {
                    filename: filename.clone(),
                    content_type: None,
                };
                let asset = self
                    .with_retry("import external asset", || {
                        let store = self.store.clone();
                        let url = url.clone();
                        let meta = meta.clone();
                        async move { store.import_external_asset(&url, meta).await }
                    })
                    .await?;
                Ok(ActionResult::ok(format!(
                    "Imported external asset '{}'",
                    asset.id
                ))
                .with_document_id(asset.id.clone())
                .with_data(serde_json::to_value(&asset)?))
            }
        }
    }

    async fn dispatch_create(
        &self,
        document_type: &str,
        fields: &serde_json::Map<String, Value>,
    ) -> Result<ActionResult, EngineError> {
        // Deep page trees cannot land in one write — build incrementally
        if needs_incremental_build(document_type, fields) {
            if let Some(spec) = PageSpec::from_create_fields(document_type, fields) {
                let report = self.builder.build_page(&spec).await?;
                return Ok(ActionResult::ok(format!(
                    "Created page \"{}\" with {} section(s)",
                    spec.title, report.sections
                ))
                .with_document_id(report.document_id));
            }
        }

        let mut doc = serde_json::Map::new();
        doc.insert(
            "_type".to_string(),
            Value::String(document_type.to_string()),
        );
        for (k, v) in fields {
            doc.insert(k.clone(), v.clone());
        }
        let doc = Value::Object(doc);

        let id = self
            .with_retry("create document", || {
                let store = self.store.clone();
                let doc = doc.clone();
                async move { store.create(doc).await }
            })
            .await?;
        Ok(ActionResult::ok(format!("Created {document_type} document '{id}'"))
            .with_document_id(id))
    }

    async fn dispatch_update(
        &self,
        document_id: &str,
        fields: &serde_json::Map<String, Value>,
    ) -> Result<ActionResult, EngineError> {
        let draft = draft_id(document_id);

        // Edits land on the draft; materialize it from the published
        // variant when it doesn't exist yet
        let existing_draft = self
            .with_retry("read draft", || {
                let store = self.store.clone();
                let id = draft.clone();
                async move { store.get_document(&id).await }
            })
            .await?;

        if existing_draft.is_none() {
            let publ = published_id(document_id).to_string();
            let published = self
                .with_retry("read published", || {
                    let store = self.store.clone();
                    let id = publ.clone();
                    async move { store.get_document(&id).await }
                })
                .await?
                .ok_or_else(|| {
                    EngineError::Store(StoreError::NotFound {
                        id: document_id.to_string(),
                    })
                })?;

            self.with_retry("materialize draft", || {
                let store = self.store.clone();
                let id = draft.clone();
                let doc = published.clone();
                async move { store.create_or_replace(&id, doc).await }
            })
            .await?;
            tracing::info!(document_id = %draft, "materialized draft from published variant");
        }

        let ops = vec![PatchOp::Set {
            fields: fields.clone(),
        }];
        let patched = self
            .with_retry("patch draft", || {
                let store = self.store.clone();
                let id = draft.clone();
                let ops = ops.clone();
                async move { store.patch(&id, ops).await }
            })
            .await?;

        Ok(ActionResult::ok(format!(
            "Updated {} field(s) on '{draft}'",
            fields.len()
        ))
        .with_document_id(draft)
        .with_data(patched))
    }

    async fn dispatch_delete(&self, document_id: &str) -> Result<ActionResult, EngineError> {
        // Both variants go: a surviving draft would resurrect the document
        // on the next edit
        for id in [draft_id(document_id), published_id(document_id).to_string()] {
            self.with_retry("delete document", || {
                let store = self.store.clone();
                let id = id.clone();
                async move { store.delete(&id).await }
            })
            .await?;
        }
        let publ = published_id(document_id).to_string();
        Ok(ActionResult::ok(format!("Deleted document '{publ}'")).with_document_id(publ))
    }

    async fn dispatch_query(
        &self,
        query: &str,
        params: &Option<Value>,
    ) -> Result<ActionResult, EngineError> {
        let results = self
            .with_retry("query", || {
                let store = self.store.clone();
                let query = query.to_string();
                let params = params.clone();
                async move { store.fetch(&query, params).await }
            })
            .await?;
        let count = results.len();
        Ok(ActionResult::ok(format!(
            "Query returned {count} result{}",
            if count == 1 { "" } else { "s" }
        ))
        .with_data(Value::Array(results)))
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    /// Run a store call, retrying transient failures with doubling backoff.
    async fn with_retry<T, F, Fut>(&self, op: &str, make_call: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut last_error: Option<StoreError> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tracing::debug!(op, attempt, delay_ms = delay.as_millis() as u64, "retrying store call");
                tokio::time::sleep(delay).await;
            }
            match make_call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| StoreError::Transport {
            reason: "all retries exhausted".to_string(),
        }))
    }

    fn finish_failed(&mut self, action: &mut ParsedAction, message: String) -> ActionResult {
        tracing::warn!(action_id = %action.id, error = %message, "action failed");
        self.undo.discard(&action.id);
        action.status = ActionStatus::Failed;
        action.error = Some(message.clone());
        let result = ActionResult::failure(message);
        action.result = Some(result.clone());
        result
    }

    fn register_token(&self, action_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .expect("cancellation map poisoned")
            .insert(action_id.to_string(), token.clone());
        token
    }

    fn clear_token(&self, action_id: &str) {
        self.tokens
            .lock()
            .expect("cancellation map poisoned")
            .remove(action_id);
    }
}

/// Creates that route through the tree builder are not cancellable.
fn is_incremental_create(payload: &ActionPayload) -> bool {
    match payload {
        ActionPayload::Create {
            document_type,
            fields,
        } => needs_incremental_build(document_type, fields),
        _ => false,
    }
}

fn dispatch_navigate(
    path: Option<&str>,
    document_id: Option<&str>,
) -> Result<ActionResult, EngineError> {
    let path = match (path, document_id) {
        (Some(p), _) => p.to_string(),
        (None, Some(id)) => format!("/documents/{id}"),
        (None, None) => {
            return Err(EngineError::Payload {
                reason: "navigate needs a path or a document ID".to_string(),
            })
        }
    };
    Ok(ActionResult::ok(format!("Navigate to {path}")).with_data(serde_json::json!({
        "path": path,
        "documentId": document_id,
    })))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::extractor::extract;
    use crate::store::types::{AssetKind, AssetRef, DocumentEvent};
    use crate::store::MemoryDocumentStore;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use serde_json::json;

    fn engine(store: Arc<MemoryDocumentStore>) -> ActionEngine {
        ActionEngine::new(store, &EngineConfig::default())
    }

    fn action(payload: ActionPayload) -> ParsedAction {
        ParsedAction::new("", payload)
    }

    #[tokio::test]
    async fn test_create_flat_document() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Create {
            document_type: "post".to_string(),
            fields: json!({"title": "Hello"}).as_object().unwrap().clone(),
        });
        let result = engine.execute(&mut act).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(act.status, ActionStatus::Completed);
        let id = result.document_id.unwrap();
        let doc = store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(doc["_type"], "post");
        assert_eq!(doc["title"], "Hello");
    }

    #[tokio::test]
    async fn test_create_deep_page_routes_through_builder() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Create {
            document_type: "page".to_string(),
            fields: json!({
                "title": "About",
                "sections": [{"rows": [{"columns": [{"content": [
                    {"type": "textBlock", "text": "deep"}
                ]}]}]}]
            })
            .as_object()
            .unwrap()
            .clone(),
        });
        let result = engine.execute(&mut act).await;

        assert!(result.success, "{}", result.message);
        assert!(result.message.contains("1 section"));
        let doc = store
            .get_document(&result.document_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        // Fully filled despite the single-write depth ceiling
        assert_eq!(
            doc["children"][0]["rows"][0]["columns"][0]["content"][0]["text"],
            "deep"
        );
    }

    #[tokio::test]
    async fn test_update_materializes_draft() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .seed(vec![json!({"_id": "p1", "_type": "page", "name": "Old"})])
            .await;
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Update {
            document_id: "p1".to_string(),
            fields: json!({"name": "New"}).as_object().unwrap().clone(),
        });
        let result = engine.execute(&mut act).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.document_id.as_deref(), Some("drafts.p1"));

        // Draft carries the edit; published is untouched
        let draft = store.get_document("drafts.p1").await.unwrap().unwrap();
        assert_eq!(draft["name"], "New");
        let published = store.get_document("p1").await.unwrap().unwrap();
        assert_eq!(published["name"], "Old");

        // Pre-state captured for undo
        assert_eq!(result.pre_state.unwrap()["name"], "Old");
    }

    #[tokio::test]
    async fn test_update_patches_existing_draft() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .seed(vec![json!({"_id": "drafts.p1", "_type": "page", "name": "Draft"})])
            .await;
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Update {
            document_id: "p1".to_string(),
            fields: json!({"name": "Edited"}).as_object().unwrap().clone(),
        });
        let result = engine.execute(&mut act).await;
        assert!(result.success);
        assert_eq!(
            store.get_document("drafts.p1").await.unwrap().unwrap()["name"],
            "Edited"
        );
    }

    #[tokio::test]
    async fn test_update_missing_document_fails_cleanly() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = engine(store);

        let mut act = action(ActionPayload::Update {
            document_id: "ghost123xyz".to_string(),
            fields: json!({"name": "x"}).as_object().unwrap().clone(),
        });
        let result = engine.execute(&mut act).await;

        assert!(!result.success);
        assert_eq!(act.status, ActionStatus::Failed);
        assert!(result.message.contains("not found"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal_and_offline() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .seed(vec![json!({"_id": "p1", "_type": "page", "name": "Old"})])
            .await;
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Update {
            document_id: "p1".to_string(),
            fields: json!({"children[0].name": "x"}).as_object().unwrap().clone(),
        });
        let result = engine.execute(&mut act).await;

        assert!(!result.success);
        assert_eq!(act.status, ActionStatus::Failed);
        assert_eq!(act.error.as_deref(), Some(result.message.as_str()));
        // Nothing was written — no draft materialized
        assert!(store.get_document("drafts.p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_both_variants_and_is_undoable() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .seed(vec![
                json!({"_id": "p1", "_type": "page", "name": "Keep"}),
                json!({"_id": "drafts.p1", "_type": "page", "name": "Keep (draft)"}),
            ])
            .await;
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Delete {
            document_id: "p1".to_string(),
        });
        let result = engine.execute(&mut act).await;

        assert!(result.success);
        assert!(store.get_document("p1").await.unwrap().is_none());
        assert!(store.get_document("drafts.p1").await.unwrap().is_none());
        assert!(result.pre_state.is_some());

        let undo_result = engine.undo_action(&mut act).await;
        assert!(undo_result.success, "{}", undo_result.message);
        assert!(store.get_document("drafts.p1").await.unwrap().is_some());
        assert!(act.result.as_ref().unwrap().pre_state.is_none());
    }

    #[tokio::test]
    async fn test_query_reports_result_count() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .seed(vec![
                json!({"_id": "a", "_type": "page"}),
                json!({"_id": "b", "_type": "page"}),
                json!({"_id": "c", "_type": "post"}),
            ])
            .await;
        let mut engine = engine(store);

        let mut act = action(ActionPayload::Query {
            query: "*[_type == \"page\"]".to_string(),
            params: None,
        });
        let result = engine.execute(&mut act).await;

        assert!(result.success);
        assert!(result.message.contains("2 results"));
        assert_eq!(result.data.unwrap().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_navigate_is_pure_data_shaping() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Navigate {
            path: None,
            document_id: Some("p1".to_string()),
        });
        let result = engine.execute(&mut act).await;

        assert!(result.success);
        assert_eq!(result.data.unwrap()["path"], "/documents/p1");
        assert_eq!(store.document_count().await, 0, "no writes happened");
    }

    #[tokio::test]
    async fn test_explain_echoes_explanation() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = engine(store);

        let mut act = action(ActionPayload::Explain {
            explanation: "Pages hold sections.".to_string(),
        });
        let result = engine.execute(&mut act).await;
        assert!(result.success);
        assert_eq!(result.message, "Pages hold sections.");
    }

    #[tokio::test]
    async fn test_upload_asset_returns_reference() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = engine(store);

        let mut act = action(ActionPayload::UploadAsset {
            kind: AssetKind::Image,
            url: "https://example.test/hero.png".to_string(),
            filename: Some("hero.png".to_string()),
        });
        let result = engine.execute(&mut act).await;
        assert!(result.success);
        assert!(result.document_id.unwrap().starts_with("image-"));
    }

    #[tokio::test]
    async fn test_transient_store_error_is_retried() {
        let store = Arc::new(MemoryDocumentStore::new());
        // First write fails with a transport error; the retry succeeds
        store.fail_write_number(1).await;
        let mut engine = engine(store.clone());

        let mut act = action(ActionPayload::Create {
            document_type: "post".to_string(),
            fields: serde_json::Map::new(),
        });
        let result = engine.execute(&mut act).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(store.document_count().await, 1);
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .seed(vec![json!({"_id": "p1", "_type": "page", "name": "x"})])
            .await;
        let mut engine = engine(store.clone());

        let mut actions = vec![
            action(ActionPayload::Query {
                query: "*".to_string(),
                params: None,
            }),
            action(ActionPayload::Update {
                document_id: "p1".to_string(),
                fields: json!({"children[key==\"hero\"].name": "x"})
                    .as_object()
                    .unwrap()
                    .clone(),
            }),
            action(ActionPayload::Delete {
                document_id: "p1".to_string(),
            }),
        ];

        let results = engine.execute_all(&mut actions).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(actions[1].status, ActionStatus::Failed);
        assert_eq!(actions[2].status, ActionStatus::Cancelled);
        assert!(results[2].message.contains("not executed"));
        // The delete never ran
        assert!(store.get_document("p1").await.unwrap().is_some());
    }

    /// Reply with a query block and an update that references an un-queried,
    /// fabricated key: the query runs, the update fails with query-first
    /// guidance and never touches the store.
    #[tokio::test]
    async fn test_query_then_fabricated_update_scenario() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .seed(vec![json!({"_id": "p1", "_type": "page", "name": "Home"})])
            .await;
        let mut engine = engine(store.clone());

        let reply = "\
Let me look at the pages first:

```action
{\"type\": \"query\", \"payload\": {\"query\": \"*[_type == \\\"page\\\"]\"}}
```

Now I'll update the hero section:

```action
{\"type\": \"update\", \"payload\": {\"documentId\": \"p1\", \"fields\": {\"children[key==\\\"hero\\\"].name\": \"Welcome\"}}}
```
";
        let mut actions = extract(reply);
        assert_eq!(actions.len(), 2);

        let results = engine.execute_all(&mut actions).await;
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].message.contains("query"));
        assert_eq!(
            store.get_document("p1").await.unwrap().unwrap()["name"],
            "Home",
            "fabricated update must never reach the store"
        );
    }

    // ─── Cancellation ───────────────────────────────────────────────────

    /// Store wrapper that delays every call, leaving a window to cancel.
    struct SlowStore {
        inner: MemoryDocumentStore,
        delay: Duration,
    }

    #[async_trait]
    impl crate::store::client::DocumentStore for SlowStore {
        async fn create(&self, doc: Value) -> Result<String, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.create(doc).await
        }
        async fn create_or_replace(&self, id: &str, doc: Value) -> Result<String, StoreError> {
            self.inner.create_or_replace(id, doc).await
        }
        async fn get_document(&self, id: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get_document(id).await
        }
        async fn patch(&self, id: &str, ops: Vec<PatchOp>) -> Result<Value, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.patch(id, ops).await
        }
        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
        async fn fetch(
            &self,
            query: &str,
            params: Option<Value>,
        ) -> Result<Vec<Value>, StoreError> {
            self.inner.fetch(query, params).await
        }
        async fn upload_asset(
            &self,
            kind: AssetKind,
            source: AssetSource,
            meta: AssetMeta,
        ) -> Result<AssetRef, StoreError> {
            self.inner.upload_asset(kind, source, meta).await
        }
        async fn fetch_external_frame(&self, url: &str) -> Result<Value, StoreError> {
            self.inner.fetch_external_frame(url).await
        }
        async fn import_external_asset(
            &self,
            url: &str,
            meta: AssetMeta,
        ) -> Result<AssetRef, StoreError> {
            self.inner.import_external_asset(url, meta).await
        }
        async fn listen(
            &self,
            query: &str,
        ) -> Result<BoxStream<'static, Result<DocumentEvent, StoreError>>, StoreError> {
            self.inner.listen(query).await
        }
    }

    #[tokio::test]
    async fn test_cancellation_resolves_as_cancelled_not_failed() {
        let store = Arc::new(SlowStore {
            inner: MemoryDocumentStore::new(),
            delay: Duration::from_millis(200),
        });
        let mut engine = ActionEngine::new(store.clone(), &EngineConfig::default());
        let handle = engine.cancel_handle();

        let mut act = action(ActionPayload::Create {
            document_type: "post".to_string(),
            fields: serde_json::Map::new(),
        });
        let action_id = act.id.clone();

        let (result, _) = tokio::join!(engine.execute(&mut act), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(handle.cancel(&action_id));
        });

        assert!(!result.success);
        assert_eq!(act.status, ActionStatus::Cancelled);
        assert!(result.message.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_incremental_build_ignores_cancellation() {
        let store = Arc::new(SlowStore {
            inner: MemoryDocumentStore::new(),
            delay: Duration::from_millis(40),
        });
        let mut engine = ActionEngine::new(store.clone(), &EngineConfig::default());
        let handle = engine.cancel_handle();

        let mut act = action(ActionPayload::Create {
            document_type: "page".to_string(),
            fields: json!({
                "title": "Deep",
                "sections": [{"rows": [{"columns": [{"content": [
                    {"type": "textBlock", "text": "x"}
                ]}]}]}]
            })
            .as_object()
            .unwrap()
            .clone(),
        });
        let action_id = act.id.clone();

        let (result, _) = tokio::join!(engine.execute(&mut act), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel(&action_id);
        });

        // The build ran to completion despite the cancel signal
        assert!(result.success, "{}", result.message);
        assert_eq!(act.status, ActionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_unknown_action_returns_false() {
        let store = Arc::new(MemoryDocumentStore::new());
        let engine = engine(store);
        assert!(!engine.cancel("act_nope"));
    }
}
