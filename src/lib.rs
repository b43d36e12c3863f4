//! pagewright — assistant-driven content-tree editing engine.
//!
//! Turns free-text assistant replies into validated, executed mutations
//! against a tree-structured content document store:
//!
//! 1. [`engine::extract`] pulls structured actions out of reply text,
//!    repairing almost-JSON and skipping broken blocks.
//! 2. [`engine::Validator`] rejects hallucinated keys, numeric-index paths,
//!    and slug-shaped document IDs before anything touches the network.
//! 3. [`engine::ActionEngine`] executes actions against a
//!    [`store::DocumentStore`], routing deep page creates through the
//!    shell-then-fill [`engine::TreeBuilder`] and capturing pre-state for
//!    undo.
//!
//! The chat transport, conversation persistence, and prompt construction
//! are the host's concern; this crate only consumes reply text and a store
//! client.

pub mod engine;
pub mod store;

pub use engine::{
    extract, strip_action_markup, ActionEngine, ActionPayload, ActionResult, ActionStatus,
    ActionStore, ActionType, EngineConfig, EngineError, ParsedAction,
};
pub use store::{
    DocumentStore, HttpDocumentStore, MemoryDocumentStore, StoreConfig, StoreError,
};

/// Return the platform-standard data directory for pagewright.
///
/// - macOS: `~/Library/Application Support/com.pagewright.engine/`
/// - Windows: `{FOLDERID_RoamingAppData}\pagewright\`
/// - Linux: `$XDG_DATA_HOME/com.pagewright.engine/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.pagewright/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.pagewright.engine");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".pagewright")
}

/// Initialize the tracing subscriber — writes structured logs to the data
/// directory.
///
/// On each host startup:
/// 1. Rotates existing logs (engine.log → engine.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh engine.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the data directory path for discoverability.
///
/// Hosts that install their own subscriber should skip this.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    let log_path = log_dir.join("engine.log");

    // Rotate: engine.log.2 → .3, .1 → .2, engine.log → .1
    rotate_log_file(&log_path, 3);

    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("pagewright: failed to open {}: {e}", log_path.display());
            return;
        }
    };

    let flushing_writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pagewright=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(flushing_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    // Startup banner — makes it easy to find the right log file
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== pagewright engine starting ==="
    );
}

/// Rotate log files: `engine.log` → `engine.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
    // Delete the oldest
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Current → .1
    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// `tracing-subscriber` buffers log output internally. Without explicit
/// flushing, log entries may sit in OS buffers and be lost on crash.
/// This wrapper ensures each log line is on disk immediately.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
