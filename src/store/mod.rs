//! Document-store boundary.
//!
//! Submodules:
//! - `client`: the `DocumentStore` trait the engine talks to
//! - `config`: YAML endpoint configuration
//! - `errors`: store-level error types
//! - `field_path`: key-predicate field paths — parsing and JSON resolution
//! - `http`: `reqwest`-backed production client
//! - `listen`: SSE change-feed parser
//! - `memory`: in-memory store (test double / reference implementation)
//! - `types`: patch ops, draft-ID helpers, asset pipeline types

pub mod client;
pub mod config;
pub mod errors;
pub mod field_path;
pub mod http;
pub mod listen;
pub mod memory;
pub mod types;

// Re-exports for convenience
pub use client::DocumentStore;
pub use config::StoreConfig;
pub use errors::StoreError;
pub use field_path::{FieldPath, InsertPosition, Segment};
pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;
pub use types::{
    draft_id, published_id, AssetKind, AssetMeta, AssetRef, AssetSource, DocumentEvent,
    DocumentEventKind, Patch, PatchInsertPosition, PatchOp, MAX_WRITE_DEPTH,
};
