//! Incremental page construction — shell-then-fill.
//!
//! The backend caps the literal nesting depth of a single write, so a page
//! with sections → rows → columns → content cannot land in one call. The
//! builder persists an empty shell at each level, then fills children one
//! level down, batching content blocks so no individual write ever
//! approaches the ceiling.
//!
//! Steps are strictly sequential per page: later levels address elements by
//! the keys earlier steps created. A failure aborts the remaining steps and
//! names both the failing step and the partially-built document — the build
//! is not transactional, and the caller decides whether to keep or delete
//! the partial page.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::store::client::DocumentStore;
use crate::store::types::{Patch, PatchInsertPosition};
use crate::store::StoreError;

use super::config::EngineConfig;
use super::errors::EngineError;
use super::keys::random_key;
use super::types::{ColumnSpec, PageSpec, RowSpec, SectionSpec};

// ─── Report ─────────────────────────────────────────────────────────────────

/// Outcome of a successful incremental build.
#[derive(Debug, Clone)]
pub struct TreeBuildReport {
    pub document_id: String,
    pub sections: usize,
}

// ─── TreeBuilder ────────────────────────────────────────────────────────────

/// Builds deep page trees against the store, one level at a time.
pub struct TreeBuilder {
    store: Arc<dyn DocumentStore>,
    content_batch_size: usize,
}

impl TreeBuilder {
    pub fn new(store: Arc<dyn DocumentStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            // A zero batch size would loop forever
            content_batch_size: config.content_batch_size.max(1),
        }
    }

    /// Build a full page: shell first, then every section in order.
    pub async fn build_page(&self, spec: &PageSpec) -> Result<TreeBuildReport, EngineError> {
        let mut doc = json!({
            "_type": "page",
            "name": spec.title,
            "children": [],
        });
        if let Some(slug) = &spec.slug {
            doc["slug"] = json!(slug);
        }
        if let Some(obj) = doc.as_object_mut() {
            for (k, v) in &spec.extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        let document_id = self
            .store
            .create(doc)
            .await
            .map_err(|e| build_error("create page shell", None, e))?;
        tracing::debug!(document_id = %document_id, title = %spec.title, "page shell created");

        for (index, section) in spec.sections.iter().enumerate() {
            self.fill_section(&document_id, section, index).await?;
        }

        tracing::info!(
            document_id = %document_id,
            sections = spec.sections.len(),
            "incremental page build complete"
        );
        Ok(TreeBuildReport {
            document_id,
            sections: spec.sections.len(),
        })
    }

    /// Append one section to an existing page, shell-then-fill.
    ///
    /// Reads the live document first so the insertion index reflects the
    /// current section count, then returns the new section's key.
    pub async fn append_section(
        &self,
        document_id: &str,
        section: &SectionSpec,
    ) -> Result<String, EngineError> {
        let doc = self
            .store
            .get_document(document_id)
            .await
            .map_err(|e| build_error("read page", Some(document_id), e))?
            .ok_or_else(|| {
                build_error(
                    "read page",
                    Some(document_id),
                    StoreError::NotFound {
                        id: document_id.to_string(),
                    },
                )
            })?;
        let index = doc
            .get("children")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);

        self.fill_section(document_id, section, index).await
    }

    /// Insert a section shell at the end of `children`, then fill its rows.
    async fn fill_section(
        &self,
        document_id: &str,
        section: &SectionSpec,
        index: usize,
    ) -> Result<String, EngineError> {
        let section_key = random_key();
        let shell = json!({
            "key": section_key,
            "type": "section",
            "rows": [],
        });

        let step = format!("append shell for section {}", index + 1);
        Patch::new(document_id)
            .insert(PatchInsertPosition::After, "children[-1]", vec![shell])
            .commit(self.store.as_ref())
            .await
            .map_err(|e| build_error(&step, Some(document_id), e))?;
        tracing::debug!(document_id, section = index + 1, key = %section_key, "section shell in place");

        for (row_index, row) in section.rows.iter().enumerate() {
            self.fill_row(document_id, &section_key, row, index, row_index)
                .await?;
        }

        Ok(section_key)
    }

    async fn fill_row(
        &self,
        document_id: &str,
        section_key: &str,
        row: &RowSpec,
        section_index: usize,
        row_index: usize,
    ) -> Result<(), EngineError> {
        let row_key = random_key();
        let shell = json!({
            "key": row_key,
            "type": "row",
            "columns": [],
        });

        let step = format!(
            "append shell for row {} in section {}",
            row_index + 1,
            section_index + 1
        );
        let rows_path = format!("children[key==\"{section_key}\"].rows[-1]");
        Patch::new(document_id)
            .insert(PatchInsertPosition::After, rows_path, vec![shell])
            .commit(self.store.as_ref())
            .await
            .map_err(|e| build_error(&step, Some(document_id), e))?;

        for (column_index, column) in row.columns.iter().enumerate() {
            self.fill_column(
                document_id,
                section_key,
                &row_key,
                column,
                section_index,
                row_index,
                column_index,
            )
            .await?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn fill_column(
        &self,
        document_id: &str,
        section_key: &str,
        row_key: &str,
        column: &ColumnSpec,
        section_index: usize,
        row_index: usize,
        column_index: usize,
    ) -> Result<(), EngineError> {
        let column_key = random_key();
        let shell = json!({
            "key": column_key,
            "type": "column",
            "content": [],
        });

        let position = format!(
            "column {} in row {} of section {}",
            column_index + 1,
            row_index + 1,
            section_index + 1
        );
        let columns_path =
            format!("children[key==\"{section_key}\"].rows[key==\"{row_key}\"].columns[-1]");
        Patch::new(document_id)
            .insert(PatchInsertPosition::After, columns_path, vec![shell])
            .commit(self.store.as_ref())
            .await
            .map_err(|e| build_error(&format!("append shell for {position}"), Some(document_id), e))?;

        // Content blocks go in small batches so a single insert never
        // carries a too-deep literal
        let blocks = column
            .content
            .iter()
            .enumerate()
            .map(|(i, block)| normalize_block(block, &position, i, document_id))
            .collect::<Result<Vec<Value>, EngineError>>()?;

        let content_path = format!(
            "children[key==\"{section_key}\"].rows[key==\"{row_key}\"]\
             .columns[key==\"{column_key}\"].content[-1]"
        );
        for (batch_number, batch) in blocks.chunks(self.content_batch_size).enumerate() {
            Patch::new(document_id)
                .insert(
                    PatchInsertPosition::After,
                    content_path.clone(),
                    batch.to_vec(),
                )
                .commit(self.store.as_ref())
                .await
                .map_err(|e| {
                    build_error(
                        &format!("insert content batch {} into {position}", batch_number + 1),
                        Some(document_id),
                        e,
                    )
                })?;
        }

        Ok(())
    }
}

/// Validate a content block spec and mint its key.
///
/// Caller-supplied keys are always discarded — semantic keys like
/// `"hero-block"` would break key-predicate addressing.
fn normalize_block(
    block: &Value,
    position: &str,
    index: usize,
    document_id: &str,
) -> Result<Value, EngineError> {
    let Some(obj) = block.as_object() else {
        return Err(EngineError::Build {
            step: format!("validate content block {} of {position}", index + 1),
            document_id: Some(document_id.to_string()),
            reason: "content blocks must be objects".to_string(),
        });
    };

    match obj.get("type").and_then(Value::as_str) {
        None | Some("") | Some("object") => {
            return Err(EngineError::Build {
                step: format!("validate content block {} of {position}", index + 1),
                document_id: Some(document_id.to_string()),
                reason: "every content block needs a concrete type".to_string(),
            })
        }
        Some(_) => {}
    }

    let mut normalized = obj.clone();
    normalized.insert("key".to_string(), Value::String(random_key()));
    Ok(Value::Object(normalized))
}

fn build_error(step: &str, document_id: Option<&str>, source: StoreError) -> EngineError {
    EngineError::Build {
        step: step.to_string(),
        document_id: document_id.map(String::from),
        reason: source.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
