//! Shared types for the action pipeline.
//!
//! The action vocabulary, the tagged payload union, the per-reply parsed
//! action record, execution results, and the page tree specs the incremental
//! builder consumes.
//!
//! Payloads are a closed tagged union: free text is parsed into exactly one
//! of these shapes at the extraction boundary, and nothing downstream ever
//! touches raw JSON blobs of unknown shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::types::{literal_depth, AssetKind, MAX_WRITE_DEPTH};

// ─── Action vocabulary ──────────────────────────────────────────────────────

/// Every command the assistant can embed in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Query,
    Navigate,
    Explain,
    UploadAsset,
    FetchExternalFrame,
    UploadExternalAsset,
}

impl ActionType {
    /// Wire name, as it appears in the `type` field of an action block.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Query => "query",
            ActionType::Navigate => "navigate",
            ActionType::Explain => "explain",
            ActionType::UploadAsset => "uploadAsset",
            ActionType::FetchExternalFrame => "fetchExternalFrame",
            ActionType::UploadExternalAsset => "uploadExternalAsset",
        }
    }

    /// Parse a wire name; `None` for anything outside the vocabulary.
    pub fn from_wire(s: &str) -> Option<ActionType> {
        match s {
            "create" => Some(ActionType::Create),
            "update" => Some(ActionType::Update),
            "delete" => Some(ActionType::Delete),
            "query" => Some(ActionType::Query),
            "navigate" => Some(ActionType::Navigate),
            "explain" => Some(ActionType::Explain),
            "uploadAsset" => Some(ActionType::UploadAsset),
            "fetchExternalFrame" => Some(ActionType::FetchExternalFrame),
            "uploadExternalAsset" => Some(ActionType::UploadExternalAsset),
            _ => None,
        }
    }
}

// ─── Payloads ───────────────────────────────────────────────────────────────

/// Typed payload, one variant per action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ActionPayload {
    #[serde(rename_all = "camelCase")]
    Create {
        document_type: String,
        #[serde(default)]
        fields: serde_json::Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        document_id: String,
        /// Mapping of field-path → new value. Paths address nested array
        /// elements with `[key=="…"]` predicates.
        fields: serde_json::Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Delete { document_id: String },
    Query {
        query: String,
        #[serde(default)]
        params: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Navigate {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        document_id: Option<String>,
    },
    Explain { explanation: String },
    UploadAsset {
        kind: AssetKind,
        url: String,
        #[serde(default)]
        filename: Option<String>,
    },
    FetchExternalFrame { url: String },
    UploadExternalAsset {
        url: String,
        #[serde(default)]
        filename: Option<String>,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionType {
        match self {
            ActionPayload::Create { .. } => ActionType::Create,
            ActionPayload::Update { .. } => ActionType::Update,
            ActionPayload::Delete { .. } => ActionType::Delete,
            ActionPayload::Query { .. } => ActionType::Query,
            ActionPayload::Navigate { .. } => ActionType::Navigate,
            ActionPayload::Explain { .. } => ActionType::Explain,
            ActionPayload::UploadAsset { .. } => ActionType::UploadAsset,
            ActionPayload::FetchExternalFrame { .. } => ActionType::FetchExternalFrame,
            ActionPayload::UploadExternalAsset { .. } => ActionType::UploadExternalAsset,
        }
    }

    /// Whether executing this payload mutates the store (and therefore gets
    /// a pre-state snapshot).
    pub fn is_modifying(&self) -> bool {
        matches!(
            self,
            ActionPayload::Update { .. } | ActionPayload::Delete { .. }
        )
    }
}

// ─── Parsed actions ─────────────────────────────────────────────────────────

/// Lifecycle of a parsed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// A structured command extracted from one assistant reply.
///
/// Created by the extractor with `status = Pending`. The executor owns the
/// status/result/error fields afterwards; the undo manager alone writes and
/// clears `result.pre_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAction {
    /// Opaque, unique, stable — usable as a list key on the host side.
    pub id: String,
    /// Human description from the action block (may be empty).
    pub description: String,
    /// Flattened so the record serializes with `type` and `payload` as
    /// sibling fields, the same shape the wire blocks use.
    #[serde(flatten)]
    pub payload: ActionPayload,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl ParsedAction {
    pub fn new(description: impl Into<String>, payload: ActionPayload) -> Self {
        Self {
            id: format!("act_{}", Uuid::new_v4()),
            description: description.into(),
            payload,
            status: ActionStatus::Pending,
            result: None,
            error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.payload.kind()
    }
}

/// Outcome of executing (or undoing) an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    /// Human-readable outcome, surfaced to the operator and the model.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Snapshot of the document before the mutation; present only while the
    /// action is undoable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_state: Option<Value>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            document_id: None,
            data: None,
            pre_state: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            document_id: None,
            data: None,
            pre_state: None,
        }
    }

    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ─── Page tree specs ────────────────────────────────────────────────────────

/// Input to the incremental tree builder: a page and its nested structure,
/// without keys — the builder mints every key itself.
#[derive(Debug, Clone, Deserialize)]
pub struct PageSpec {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub sections: Vec<SectionSpec>,
    /// Page fields other than title/slug/sections, copied onto the shell.
    #[serde(skip)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionSpec {
    #[serde(default)]
    pub rows: Vec<RowSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowSpec {
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnSpec {
    /// Content blocks as raw objects; the builder validates each has a
    /// concrete `type` and replaces any caller-supplied `key`.
    #[serde(default)]
    pub content: Vec<Value>,
}

impl PageSpec {
    /// Interpret a create payload as a page tree, when it is one.
    ///
    /// Returns `None` for non-page documents or pages without a nested
    /// sections tree — those go through a single write.
    pub fn from_create_fields(
        document_type: &str,
        fields: &serde_json::Map<String, Value>,
    ) -> Option<PageSpec> {
        if document_type != "page" {
            return None;
        }
        let sections_value = fields.get("sections")?;
        if !sections_value.is_array() || sections_value.as_array().is_some_and(Vec::is_empty) {
            return None;
        }
        let sections: Vec<SectionSpec> =
            serde_json::from_value(sections_value.clone()).ok()?;

        let title = fields
            .get("title")
            .or_else(|| fields.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let slug = fields.get("slug").and_then(Value::as_str).map(String::from);

        let mut extra = serde_json::Map::new();
        for (k, v) in fields {
            if !matches!(k.as_str(), "title" | "name" | "slug" | "sections") {
                extra.insert(k.clone(), v.clone());
            }
        }

        Some(PageSpec {
            title,
            slug,
            sections,
            extra,
        })
    }
}

/// Whether a create payload is too deep for one write and must be built
/// incrementally.
pub fn needs_incremental_build(document_type: &str, fields: &serde_json::Map<String, Value>) -> bool {
    let mut doc = serde_json::Map::new();
    doc.insert("_type".to_string(), Value::String(document_type.to_string()));
    for (k, v) in fields {
        doc.insert(k.clone(), v.clone());
    }
    literal_depth(&Value::Object(doc)) > MAX_WRITE_DEPTH
}

// ─── Tests ──────────────────────────────────────────────────────────────────
