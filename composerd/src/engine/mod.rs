//! Engine backend abstraction
//!
//! The composition engine is non-reentrant and single-threaded. The coordinator
//! never talks to a concrete engine; it drives an [`EngineBackend`] that lives
//! exclusively on the execution queue's worker thread. Backends are created on
//! that thread by an [`EngineFactory`], so the engine itself never has to be
//! `Send`.
//!
//! # Implementations
//!
//! - [`memory::MemoryEngine`] - in-memory reference engine with a tiny built-in
//!   dictionary, used by tests and the demo CLI
//!
//! A native adapter implements the same trait over the foreign-function
//! boundary and reports engine notifications as [`RawNotification`]s.

pub mod memory;

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{CandidateItem, Commit, Context, SchemaItem, Status};

/// Errors reported across the engine boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Engine is not running")]
    NotRunning,

    #[error("Engine startup failed: {0}")]
    Startup(String),

    #[error("Engine call {call} failed: {message}")]
    Call { call: &'static str, message: String },

    #[error("Resource directory error: {0}")]
    Resources(String),

    #[error("Engine cycle was abandoned before bootstrap completed")]
    Superseded,
}

/// Result type for engine calls
pub type EngineResult<T> = Result<T, EngineError>;

/// Parameters passed to the engine at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupParams {
    /// Read-only shared resources (schemas, dictionaries)
    pub shared_dir: PathBuf,
    /// Writable user data (user dictionaries, compiled artifacts)
    pub user_dir: PathBuf,
    /// Version tag of the host application
    pub version_tag: String,
    /// Verify compiled artifacts during startup
    pub full_check: bool,
}

/// Notification as delivered by the engine's message callback
///
/// Engines report asynchronous state changes as a pair of strings such as
/// `("schema", "luna_pinyin/Luna Pinyin")` or `("option", "!ascii_mode")`.
/// They are decoded into typed events by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub message_type: String,
    pub message_value: String,
}

impl RawNotification {
    pub fn new(message_type: impl Into<String>, message_value: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            message_value: message_value.into(),
        }
    }
}

/// Capabilities the coordinator needs from a composition engine
///
/// Every method is called from the worker thread only, one at a time.
/// Boolean results mean "handled/accepted"; a `false` is a normal outcome,
/// while an `Err` is a failure of the call itself.
pub trait EngineBackend {
    /// Start the engine with the given resource directories
    fn startup(&mut self, params: &StartupParams) -> EngineResult<()>;

    /// Release all engine resources
    fn shutdown(&mut self);

    fn process_key(&mut self, keycode: i32, mask: u32) -> EngineResult<bool>;

    /// Feed a key sequence such as `"nihao{space}"`
    fn simulate_key_sequence(&mut self, sequence: &str) -> EngineResult<bool>;

    fn select_candidate(&mut self, index: usize) -> EngineResult<bool>;

    fn select_candidate_on_page(&mut self, index: usize) -> EngineResult<bool>;

    fn delete_candidate_on_page(&mut self, index: usize) -> EngineResult<bool>;

    fn forget_candidate(&mut self, index: usize) -> EngineResult<bool>;

    fn change_page(&mut self, backward: bool) -> EngineResult<bool>;

    fn set_caret_pos(&mut self, pos: usize) -> EngineResult<()>;

    fn commit_composition(&mut self) -> EngineResult<bool>;

    fn clear_composition(&mut self) -> EngineResult<()>;

    /// Take the pending commit, if any
    fn commit(&mut self) -> EngineResult<Option<Commit>>;

    fn context(&mut self) -> EngineResult<Option<Context>>;

    fn status(&mut self) -> EngineResult<Option<Status>>;

    fn runtime_option(&mut self, name: &str) -> EngineResult<bool>;

    fn set_runtime_option(&mut self, name: &str, value: bool) -> EngineResult<()>;

    /// All schemas installed in the shared/user directories
    fn available_schemas(&mut self) -> EngineResult<Vec<SchemaItem>>;

    /// Schemas the user has enabled for switching
    fn enabled_schemas(&mut self) -> EngineResult<Vec<SchemaItem>>;

    fn set_enabled_schemas(&mut self, ids: &[String]) -> EngineResult<bool>;

    fn current_schema(&mut self) -> EngineResult<String>;

    fn select_schema(&mut self, id: &str) -> EngineResult<bool>;

    /// Window over the full candidate list, independent of paging
    fn candidates(&mut self, start: usize, limit: usize) -> EngineResult<Vec<CandidateItem>>;

    fn sync_user_data(&mut self) -> EngineResult<bool>;

    /// Drain notifications produced since the last call
    fn take_notifications(&mut self) -> Vec<RawNotification>;
}

/// Creates engine instances on the worker thread
pub trait EngineFactory: Send + Sync + 'static {
    fn create(&self) -> EngineResult<Box<dyn EngineBackend>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> EngineResult<Box<dyn EngineBackend>> + Send + Sync + 'static,
{
    fn create(&self) -> EngineResult<Box<dyn EngineBackend>> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Call {
            call: "process_key",
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Engine call process_key failed: boom");
        assert_eq!(EngineError::NotRunning.to_string(), "Engine is not running");
    }

    #[test]
    fn test_closure_factory() {
        let factory = || -> EngineResult<Box<dyn EngineBackend>> { Err(EngineError::Startup("no engine".into())) };
        let result = EngineFactory::create(&factory);
        assert!(matches!(result, Err(EngineError::Startup(_))));
    }
}
