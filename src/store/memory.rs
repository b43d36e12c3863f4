//! In-memory `DocumentStore` implementation.
//!
//! Backs every engine test and doubles as a reference for embedders: it
//! applies the same patch semantics the backend does (key-predicate paths,
//! insert positions, the single-write depth ceiling) against a plain map.
//!
//! Query support is deliberately tiny — `field == "value"` equality, with or
//! without a `*[…]` wrapper — queries are opaque strings to the engine and
//! only need enough behavior here to exercise the pipeline.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use super::client::DocumentStore;
use super::errors::StoreError;
use super::field_path::{self, FieldPath};
use super::types::{
    content_digest, literal_depth, AssetKind, AssetMeta, AssetRef, AssetSource, DocumentEvent,
    DocumentEventKind, PatchOp, MAX_WRITE_DEPTH,
};

/// Capacity of the change-feed broadcast channel.
const EVENT_BUFFER: usize = 64;

/// An in-memory document store.
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, Value>>,
    events: broadcast::Sender<DocumentEvent>,
    /// Mutating-call counter and the call number that should fail, for
    /// exercising retry and partial-build paths in tests.
    fault: Mutex<FaultState>,
}

#[derive(Default)]
struct FaultState {
    write_calls: u64,
    fail_at: Option<u64>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            docs: Mutex::new(HashMap::new()),
            events,
            fault: Mutex::new(FaultState::default()),
        }
    }

    /// Pre-load documents (each must carry `_id`).
    pub async fn seed(&self, docs: Vec<Value>) {
        let mut map = self.docs.lock().await;
        for doc in docs {
            let id = doc
                .get("_id")
                .and_then(Value::as_str)
                .expect("seeded documents must carry _id")
                .to_string();
            map.insert(id, doc);
        }
    }

    /// Make the `n`-th mutating call from now fail with a transport error
    /// (1 = the very next write). Subsequent calls succeed again.
    pub async fn fail_write_number(&self, n: u64) {
        let mut fault = self.fault.lock().await;
        fault.fail_at = Some(fault.write_calls + n);
    }

    pub async fn document_count(&self) -> usize {
        self.docs.lock().await.len()
    }

    async fn check_fault(&self) -> Result<(), StoreError> {
        let mut fault = self.fault.lock().await;
        fault.write_calls += 1;
        if fault.fail_at == Some(fault.write_calls) {
            return Err(StoreError::Transport {
                reason: "injected fault".to_string(),
            });
        }
        Ok(())
    }

    fn emit(&self, kind: DocumentEventKind, document_id: &str, document: Option<&Value>) {
        // Nobody listening is fine
        let _ = self.events.send(DocumentEvent {
            kind,
            document_id: document_id.to_string(),
            document: document.cloned(),
        });
    }
}

/// Depth check applied to every write literal, mirroring the backend.
fn check_depth(value: &Value) -> Result<(), StoreError> {
    let depth = literal_depth(value);
    if depth > MAX_WRITE_DEPTH {
        return Err(StoreError::TooDeep {
            depth,
            ceiling: MAX_WRITE_DEPTH,
        });
    }
    Ok(())
}

/// Evaluate the tiny `field == "value"` query subset against a document.
///
/// Unknown query shapes match everything: the filter is a convenience, not a
/// query engine.
fn matches_query(query: &str, doc: &Value) -> bool {
    let q = query.trim();
    let q = q
        .strip_prefix("*[")
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(q);

    let Some((field, value)) = q.split_once("==") else {
        return true;
    };
    let field = field.trim();
    let value = value.trim();
    let Some(value) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return true;
    };
    doc.get(field).and_then(Value::as_str) == Some(value)
}

fn apply_ops(doc: &mut Value, ops: &[PatchOp]) -> Result<(), StoreError> {
    for op in ops {
        match op {
            PatchOp::Set { fields } => {
                for (path, value) in fields {
                    check_depth(value)?;
                    let parsed = FieldPath::parse(path)?;
                    field_path::set_value(doc, &parsed, value.clone())?;
                }
            }
            PatchOp::Insert {
                position,
                path,
                items,
            } => {
                for item in items {
                    check_depth(item)?;
                }
                let parsed = FieldPath::parse(path)?;
                field_path::insert_items(doc, (*position).into(), &parsed, items.clone())?;
            }
            PatchOp::Unset { paths } => {
                for path in paths {
                    let parsed = FieldPath::parse(path)?;
                    field_path::unset_value(doc, &parsed)?;
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, mut doc: Value) -> Result<String, StoreError> {
        self.check_fault().await?;
        check_depth(&doc)?;
        let id = Uuid::new_v4().to_string();
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("_id".to_string(), Value::String(id.clone()));
        } else {
            return Err(StoreError::Serialization {
                reason: "document must be a JSON object".to_string(),
            });
        }
        self.docs.lock().await.insert(id.clone(), doc.clone());
        self.emit(DocumentEventKind::Created, &id, Some(&doc));
        Ok(id)
    }

    async fn create_or_replace(&self, id: &str, mut doc: Value) -> Result<String, StoreError> {
        self.check_fault().await?;
        check_depth(&doc)?;
        let obj = doc.as_object_mut().ok_or_else(|| StoreError::Serialization {
            reason: "document must be a JSON object".to_string(),
        })?;
        obj.insert("_id".to_string(), Value::String(id.to_string()));

        let mut map = self.docs.lock().await;
        let existed = map.insert(id.to_string(), doc.clone()).is_some();
        drop(map);

        let kind = if existed {
            DocumentEventKind::Updated
        } else {
            DocumentEventKind::Created
        };
        self.emit(kind, id, Some(&doc));
        Ok(id.to_string())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.docs.lock().await.get(id).cloned())
    }

    async fn patch(&self, id: &str, ops: Vec<PatchOp>) -> Result<Value, StoreError> {
        self.check_fault().await?;
        let mut map = self.docs.lock().await;
        let doc = map.get_mut(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        // Apply against a scratch copy so a mid-patch failure leaves the
        // stored document untouched
        let mut scratch = doc.clone();
        apply_ops(&mut scratch, &ops)?;
        *doc = scratch.clone();
        drop(map);

        self.emit(DocumentEventKind::Updated, id, Some(&scratch));
        Ok(scratch)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.check_fault().await?;
        let existed = self.docs.lock().await.remove(id).is_some();
        if existed {
            self.emit(DocumentEventKind::Deleted, id, None);
        }
        Ok(())
    }

    async fn fetch(&self, query: &str, _params: Option<Value>) -> Result<Vec<Value>, StoreError> {
        let map = self.docs.lock().await;
        let mut results: Vec<Value> = map
            .values()
            .filter(|doc| matches_query(query, doc))
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            let ka = a.get("_id").and_then(Value::as_str).unwrap_or("");
            let kb = b.get("_id").and_then(Value::as_str).unwrap_or("");
            ka.cmp(kb)
        });
        Ok(results)
    }

    async fn upload_asset(
        &self,
        kind: AssetKind,
        source: AssetSource,
        meta: AssetMeta,
    ) -> Result<AssetRef, StoreError> {
        self.check_fault().await?;
        let digest = match &source {
            AssetSource::Bytes(bytes) => content_digest(bytes),
            AssetSource::Url(url) => content_digest(url.as_bytes()),
        };
        let suffix = meta
            .filename
            .as_deref()
            .and_then(|f| f.rsplit_once('.').map(|(_, ext)| ext.to_string()))
            .unwrap_or_else(|| "bin".to_string());
        Ok(AssetRef {
            id: format!("{}-{}", kind.as_str(), &digest[..12]),
            url: format!("https://cdn.invalid/{digest}.{suffix}"),
            digest: Some(digest),
        })
    }

    async fn fetch_external_frame(&self, url: &str) -> Result<Value, StoreError> {
        Ok(serde_json::json!({
            "source": url,
            "kind": "frame",
            "content": [],
        }))
    }

    async fn import_external_asset(
        &self,
        url: &str,
        meta: AssetMeta,
    ) -> Result<AssetRef, StoreError> {
        self.upload_asset(AssetKind::File, AssetSource::Url(url.to_string()), meta)
            .await
    }

    async fn listen(
        &self,
        query: &str,
    ) -> Result<BoxStream<'static, Result<DocumentEvent, StoreError>>, StoreError> {
        let rx = self.events.subscribe();
        let query = query.to_string();
        let stream = stream::unfold(rx, move |mut rx| {
            let query = query.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            let passes = match &event.document {
                                Some(doc) => matches_query(&query, doc),
                                None => true, // deletions always pass
                            };
                            if passes {
                                return Some((Ok(event), rx));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed();
        Ok(stream)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
