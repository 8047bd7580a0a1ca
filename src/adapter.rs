//! Front-end adapter contract.
//!
//! The core never renders UI and never decides anything a human should
//! decide; it exposes this trait so a CLI (or, one day, a GUI) can supply
//! logging, progress display, and confirmation prompts. Engines never call
//! into a `FrontendAdapter` themselves — only the worker dispatch boundary
//! does, per the design's engine/driver separation.

#[cfg(test)]
use mockall::automock;

/// Severity for [`FrontendAdapter::log`], mirroring `log::Level` without
/// pulling the frontend trait itself into a dependency on the `log` crate's
/// global logger (the adapter may forward to `log::info!` or to a GUI pane).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// What [`FrontendAdapter::select_path`] is being asked to pick, so a GUI
/// implementation can apply the right file-dialog filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Image,
    MemoryDump,
    PartitionTable,
    LogSave,
}

/// Callbacks the core driver calls at the worker dispatch boundary.
///
/// `confirm` is synchronous and may block the calling worker thread; it must
/// never be called from inside a protocol engine method (see SPEC_FULL §9).
#[cfg_attr(test, automock)]
pub trait FrontendAdapter: Send + Sync {
    /// Append one log line.
    fn log(&self, level: LogLevel, message: &str);

    /// Overwrite the progress surface. `total` of `0` means indeterminate.
    fn progress(&self, current: u64, total: u64, label: &str);

    /// Ask the user a yes/no question. May block.
    fn confirm(&self, prompt: &str) -> bool;

    /// Ask the user to pick a path, or `None` if they cancelled.
    fn select_path(&self, kind: PathKind, filters: &[&str]) -> Option<std::path::PathBuf>;
}

/// Terminal and progress events a worker emits over its ordered channel.
/// The foreground must treat `Complete`, `Error`, and `Cancelled` as
/// terminal: no further events follow for that request.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A chunk was transferred; `cumulative` is the running total.
    ChunkReady { last_chunk_size: usize, cumulative: u64 },
    /// The operation finished successfully. `out_size` is the number of
    /// bytes written (memory read) or sent (image transfer).
    Complete { out_size: u64 },
    /// The operation failed. The engine is poisoned iff this followed a
    /// transport/protocol error rather than a device-reported one; callers
    /// should check the originating [`crate::error::Error::is_recoverable`].
    Error { message: String },
    /// Cooperative cancellation was observed.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_adapter_satisfies_trait_object() {
        let mut mock = MockFrontendAdapter::new();
        mock.expect_log().returning(|_, _| ());
        mock.expect_confirm().returning(|_| true);
        let adapter: &dyn FrontendAdapter = &mock;
        adapter.log(LogLevel::Info, "hello");
        assert!(adapter.confirm("proceed?"));
    }
}
