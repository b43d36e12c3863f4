//! The `DocumentStore` trait — the seam between the engine and whatever
//! backend the host wires in.
//!
//! The engine only ever talks to this trait. Production hosts hand it an
//! [`HttpDocumentStore`](super::http::HttpDocumentStore); tests and embedders
//! use [`MemoryDocumentStore`](super::memory::MemoryDocumentStore).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use super::errors::StoreError;
use super::types::{AssetKind, AssetMeta, AssetRef, DocumentEvent, PatchOp};

/// Asynchronous client for a tree-structured content document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document; the backend issues and returns its ID.
    async fn create(&self, doc: Value) -> Result<String, StoreError>;

    /// Create a document under a caller-supplied ID, replacing any existing
    /// document with that ID.
    async fn create_or_replace(&self, id: &str, doc: Value) -> Result<String, StoreError>;

    /// Fetch a document by ID. `Ok(None)` when it does not exist.
    async fn get_document(&self, id: &str) -> Result<Option<Value>, StoreError>;

    /// Apply patch operations to a document; returns the patched document.
    async fn patch(&self, id: &str, ops: Vec<PatchOp>) -> Result<Value, StoreError>;

    /// Permanently remove a document by ID. Removing a missing document is
    /// not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Run an opaque query string and return its results.
    async fn fetch(&self, query: &str, params: Option<Value>) -> Result<Vec<Value>, StoreError>;

    /// Upload an asset (binary or server-side URL fetch).
    async fn upload_asset(
        &self,
        kind: AssetKind,
        source: super::types::AssetSource,
        meta: AssetMeta,
    ) -> Result<AssetRef, StoreError>;

    /// Fetch a frame from an external design tool as a document fragment.
    async fn fetch_external_frame(&self, url: &str) -> Result<Value, StoreError>;

    /// Import an externally-hosted asset into the store.
    async fn import_external_asset(
        &self,
        url: &str,
        meta: AssetMeta,
    ) -> Result<AssetRef, StoreError>;

    /// Subscribe to document change events for the given query.
    async fn listen(
        &self,
        query: &str,
    ) -> Result<BoxStream<'static, Result<DocumentEvent, StoreError>>, StoreError>;
}
