//! Pre-flight validation of update actions.
//!
//! The model frequently guesses identifiers it has never seen: numeric array
//! indexes, short word-like keys (`"hero"`), slug-shaped document IDs
//! (`page-about-us`). Sent to the backend these fail silently — or worse, a
//! numeric index lands on the wrong element after a concurrent edit. Every
//! check here runs client-side, synchronously, with zero network calls, and
//! produces a corrective message the model can act on.

use serde_json::Value;
use thiserror::Error;

use crate::store::field_path::{FieldPath, Segment};
use crate::store::types::published_id;

use super::config::EngineConfig;
use super::types::{ActionPayload, ParsedAction};

// ─── Errors ─────────────────────────────────────────────────────────────────

/// A structural invariant violation found before dispatch.
///
/// Messages are written for the model/operator to self-correct, not just to
/// report failure.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("field path '{path}' addresses an array element by numeric index; \
             indexes are not stable across concurrent edits — query the document \
             and address the element as [key==\"<its key>\"] instead")]
    NumericIndexPath { path: String },

    #[error("key \"{key}\" in field path '{path}' looks invented: real keys are \
             random tokens of at least {min_len} characters, not words — query \
             the document first and copy the actual key")]
    FabricatedKey {
        key: String,
        path: String,
        min_len: usize,
    },

    #[error("document ID '{document_id}' looks like a made-up type-slug; real IDs \
             are backend-issued — query for the document first and use the ID the \
             store returns")]
    FabricatedDocumentId { document_id: String },

    #[error("element {position} of \"{array}\" at '{path}' is missing its \
             \"{tag}\"; every {expected} must carry both a type and a key")]
    MissingTag {
        path: String,
        array: String,
        position: usize,
        tag: &'static str,
        expected: &'static str,
    },

    #[error("element {position} of \"{array}\" at '{path}' has the placeholder \
             type \"object\"; use the concrete {expected} type")]
    PlaceholderType {
        path: String,
        array: String,
        position: usize,
        expected: &'static str,
    },

    #[error("element {position} of \"{array}\" at '{path}' carries the word-like \
             key \"{key}\"; keys must be random tokens of at least {min_len} \
             characters, never semantic slugs")]
    SemanticKeyInLiteral {
        path: String,
        array: String,
        position: usize,
        key: String,
        min_len: usize,
    },

    #[error("field path '{path}' could not be parsed: {reason}")]
    UnparseablePath { path: String, reason: String },
}

// ─── Validator ──────────────────────────────────────────────────────────────

/// The structurally-typed arrays of the document tree and the element type
/// each one expects.
const STRUCTURAL_ARRAYS: &[(&str, &str)] = &[
    ("children", "section"),
    ("rows", "row"),
    ("columns", "column"),
    ("content", "content block"),
];

/// ID prefixes the model tends to invent when it has not queried.
const SLUG_ID_PREFIXES: &[&str] = &["page", "post", "article", "section", "block"];

/// Validates update actions against the tree's structural invariants.
pub struct Validator {
    min_random_key_len: usize,
}

impl Validator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            min_random_key_len: config.min_random_key_len,
        }
    }

    /// Check an action; `None` means it may be dispatched.
    ///
    /// Only update payloads are inspected here — creates are structurally
    /// validated by the tree builder, and the remaining action types carry
    /// no tree-addressing payload.
    pub fn validate(&self, action: &ParsedAction) -> Option<ValidationError> {
        let ActionPayload::Update {
            document_id,
            fields,
        } = &action.payload
        else {
            return None;
        };

        // Parse every path up front; checks run in severity order across
        // all paths, short-circuiting on the first hit
        let mut parsed = Vec::with_capacity(fields.len());
        for path in fields.keys() {
            match FieldPath::parse(path) {
                Ok(p) => parsed.push((path.as_str(), p)),
                Err(e) => {
                    return Some(ValidationError::UnparseablePath {
                        path: path.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        // 1. Numeric index selectors
        for (path, field_path) in &parsed {
            if field_path.contains_numeric_index() {
                return Some(ValidationError::NumericIndexPath {
                    path: path.to_string(),
                });
            }
        }

        // 2. Fabricated key predicates
        for (path, field_path) in &parsed {
            for key in field_path.key_predicates() {
                if self.is_fabricated_key(key) {
                    return Some(ValidationError::FabricatedKey {
                        key: key.to_string(),
                        path: path.to_string(),
                        min_len: self.min_random_key_len,
                    });
                }
            }
        }

        // 3. Fabricated document ID
        if is_slug_document_id(document_id) {
            return Some(ValidationError::FabricatedDocumentId {
                document_id: document_id.clone(),
            });
        }

        // 4. Nested-object shape of the new values
        for (path, field_path) in &parsed {
            let value = &fields[*path];
            let context = trailing_array_context(field_path);
            if let Some(err) = self.walk_value(path, context, value) {
                return Some(err);
            }
        }

        None
    }

    /// Word-like shape: shorter than the configured minimum and made only of
    /// lowercase letters and hyphens. A 10+ character alphanumeric token
    /// never matches.
    fn is_fabricated_key(&self, key: &str) -> bool {
        key.len() < self.min_random_key_len
            && !key.is_empty()
            && key.chars().all(|c| c.is_ascii_lowercase() || c == '-')
    }

    /// Recursively check nested literals. `context` names the structural
    /// array this value sits in, when it is an array of elements.
    fn walk_value(
        &self,
        path: &str,
        context: Option<(&'static str, &'static str)>,
        value: &Value,
    ) -> Option<ValidationError> {
        match value {
            Value::Array(items) => {
                if let Some((array, expected)) = context {
                    for (position, element) in items.iter().enumerate() {
                        if let Some(err) =
                            self.check_element(path, array, expected, position, element)
                        {
                            return Some(err);
                        }
                    }
                }
                for element in items {
                    if let Some(err) = self.walk_value(path, None, element) {
                        return Some(err);
                    }
                }
                None
            }
            Value::Object(map) => {
                for (field, nested) in map {
                    let nested_context = STRUCTURAL_ARRAYS
                        .iter()
                        .find(|(name, _)| *name == field.as_str())
                        .map(|(name, expected)| (*name, *expected));
                    if let Some(err) = self.walk_value(path, nested_context, nested) {
                        return Some(err);
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// One element of a structurally-typed array: must be an object with a
    /// concrete `type` and a plausible random `key`.
    fn check_element(
        &self,
        path: &str,
        array: &'static str,
        expected: &'static str,
        position: usize,
        element: &Value,
    ) -> Option<ValidationError> {
        let obj = element.as_object();

        let key = obj.and_then(|o| o.get("key")).and_then(Value::as_str);
        match key {
            None | Some("") => {
                return Some(ValidationError::MissingTag {
                    path: path.to_string(),
                    array: array.to_string(),
                    position,
                    tag: "key",
                    expected,
                })
            }
            Some(k) if self.is_fabricated_key(k) => {
                return Some(ValidationError::SemanticKeyInLiteral {
                    path: path.to_string(),
                    array: array.to_string(),
                    position,
                    key: k.to_string(),
                    min_len: self.min_random_key_len,
                })
            }
            Some(_) => {}
        }

        match obj.and_then(|o| o.get("type")).and_then(Value::as_str) {
            None | Some("") => Some(ValidationError::MissingTag {
                path: path.to_string(),
                array: array.to_string(),
                position,
                tag: "type",
                expected,
            }),
            Some("object") => Some(ValidationError::PlaceholderType {
                path: path.to_string(),
                array: array.to_string(),
                position,
                expected,
            }),
            Some(_) => None,
        }
    }
}

/// When a path's final field segment names a structural array, the value
/// being assigned is that array's element list.
fn trailing_array_context(path: &FieldPath) -> Option<(&'static str, &'static str)> {
    let Segment::Field(name) = path.segments.last()? else {
        return None;
    };
    STRUCTURAL_ARRAYS
        .iter()
        .find(|(array, _)| *array == name.as_str())
        .map(|(array, expected)| (*array, *expected))
}

/// Matches `(page|post|article|section|block)-<lowercase-slug>` — the shape
/// of an ID the model made up rather than queried. Checked against the
/// published ID so `drafts.page-about-us` is caught too.
fn is_slug_document_id(id: &str) -> bool {
    let id = published_id(id);
    let Some((prefix, rest)) = id.split_once('-') else {
        return false;
    };
    SLUG_ID_PREFIXES.contains(&prefix)
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_lowercase() || c == '-')
}

// ─── Tests ──────────────────────────────────────────────────────────────────
