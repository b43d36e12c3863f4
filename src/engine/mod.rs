//! The action pipeline.
//!
//! Submodules:
//! - `extractor`: reply text → `ParsedAction`s; prose stripping
//! - `json_repair`: best-effort repair of almost-JSON from the model
//! - `validator`: pre-flight structural checks on update actions
//! - `tree_builder`: shell-then-fill construction of deep page trees
//! - `executor`: dispatch, retry, cancellation, result normalization
//! - `undo`: pre-state snapshots and replay
//! - `action_store`: per-conversation action lists with TTL eviction
//! - `keys`: random array-key generation
//! - `config`: pipeline tunables
//! - `types`: action vocabulary, payloads, results, tree specs
//! - `errors`: engine-level error types

pub mod action_store;
pub mod config;
pub mod errors;
pub mod executor;
pub mod extractor;
pub mod json_repair;
pub mod keys;
pub mod tree_builder;
pub mod types;
pub mod undo;
pub mod validator;

// Re-exports for convenience
pub use action_store::ActionStore;
pub use config::EngineConfig;
pub use errors::EngineError;
pub use executor::{ActionEngine, CancelHandle};
pub use extractor::{extract, strip_action_markup};
pub use tree_builder::{TreeBuilder, TreeBuildReport};
pub use types::{
    ActionPayload, ActionResult, ActionStatus, ActionType, ColumnSpec, PageSpec, ParsedAction,
    RowSpec, SectionSpec,
};
pub use undo::UndoManager;
pub use validator::{ValidationError, Validator};
