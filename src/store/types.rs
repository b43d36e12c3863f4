//! Shared types for the document-store boundary.
//!
//! Patch operations, the fluent patch builder, draft-ID helpers, asset
//! pipeline types, and the depth accounting the incremental builder exists
//! to respect.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::client::DocumentStore;
use super::errors::StoreError;
use super::field_path::InsertPosition;

// ─── Depth ceiling ──────────────────────────────────────────────────────────

/// Maximum literal nesting depth the backend accepts in a single write.
///
/// A full page literal (page → children → section → rows → row → columns →
/// column → content → block) is ~9 levels deep and would be rejected; shell
/// writes and small content batches stay well under the ceiling.
pub const MAX_WRITE_DEPTH: usize = 5;

/// Nesting depth of a JSON literal: scalars are 0, each object/array level
/// adds 1.
pub fn literal_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(literal_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(literal_depth).max().unwrap_or(0),
        _ => 0,
    }
}

// ─── Draft / published variants ─────────────────────────────────────────────

/// Prefix that marks the editable draft variant of a document.
pub const DRAFT_PREFIX: &str = "drafts.";

/// The draft ID for a document (identity if already a draft ID).
pub fn draft_id(id: &str) -> String {
    if id.starts_with(DRAFT_PREFIX) {
        id.to_string()
    } else {
        format!("{DRAFT_PREFIX}{id}")
    }
}

/// The published ID for a document (strips any draft prefix).
pub fn published_id(id: &str) -> &str {
    id.strip_prefix(DRAFT_PREFIX).unwrap_or(id)
}

// ─── Patch operations ───────────────────────────────────────────────────────

/// A single patch operation against one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PatchOp {
    /// Set the values at the given field paths.
    Set { fields: serde_json::Map<String, Value> },
    /// Insert items into an array, relative to the addressed element.
    Insert {
        position: PatchInsertPosition,
        path: String,
        items: Vec<Value>,
    },
    /// Remove the values at the given field paths.
    Unset { paths: Vec<String> },
}

/// Wire form of [`InsertPosition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchInsertPosition {
    Before,
    After,
    Replace,
}

impl From<PatchInsertPosition> for InsertPosition {
    fn from(p: PatchInsertPosition) -> Self {
        match p {
            PatchInsertPosition::Before => InsertPosition::Before,
            PatchInsertPosition::After => InsertPosition::After,
            PatchInsertPosition::Replace => InsertPosition::Replace,
        }
    }
}

/// Fluent builder for a multi-op patch: `Patch::new(id).set(…).commit(&store)`.
#[derive(Debug, Clone)]
pub struct Patch {
    document_id: String,
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ops: Vec::new(),
        }
    }

    /// Queue a set of `field-path → value` assignments.
    pub fn set(mut self, fields: serde_json::Map<String, Value>) -> Self {
        self.ops.push(PatchOp::Set { fields });
        self
    }

    /// Queue a single `field-path → value` assignment.
    pub fn set_one(self, path: impl Into<String>, value: Value) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert(path.into(), value);
        self.set(fields)
    }

    /// Queue an array insert relative to the element `path` addresses.
    pub fn insert(
        mut self,
        position: PatchInsertPosition,
        path: impl Into<String>,
        items: Vec<Value>,
    ) -> Self {
        self.ops.push(PatchOp::Insert {
            position,
            path: path.into(),
            items,
        });
        self
    }

    /// Queue removals for the given field paths.
    pub fn unset(mut self, paths: Vec<String>) -> Self {
        self.ops.push(PatchOp::Unset { paths });
        self
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// Execute the queued operations; returns the patched document.
    pub async fn commit(self, store: &dyn DocumentStore) -> Result<Value, StoreError> {
        store.patch(&self.document_id, self.ops).await
    }
}

// ─── Asset pipeline ─────────────────────────────────────────────────────────

/// What kind of asset is being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    File,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::File => "file",
        }
    }
}

/// Where the asset bytes come from.
#[derive(Debug, Clone)]
pub enum AssetSource {
    /// Raw bytes already in memory.
    Bytes(Vec<u8>),
    /// A URL the store should fetch server-side.
    Url(String),
}

/// Caller-supplied asset metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Reference to a stored asset, as returned by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    /// Backend-issued asset document ID.
    pub id: String,
    /// Public URL of the stored asset.
    pub url: String,
    /// Hex SHA-256 digest of the asset content (when known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Hex SHA-256 digest of asset bytes.
pub fn content_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ─── Change feed ────────────────────────────────────────────────────────────

/// What happened to a document, as reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentEventKind {
    Created,
    Updated,
    Deleted,
}

/// A single change-feed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEvent {
    pub kind: DocumentEventKind,
    pub document_id: String,
    /// The post-change document (absent for deletions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

// ─── Tests ──────────────────────────────────────────────────────────────────
