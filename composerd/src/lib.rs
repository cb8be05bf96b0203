//! composerd - serialized session coordinator for a text-composition engine
//!
//! The composition engine is non-reentrant and single-threaded. composerd
//! gives many concurrent async callers a safe way to share it: every engine
//! call runs as a job on one dedicated worker thread, results are cached as
//! immutable snapshots, and state changes fan out over a message bus.
//!
//! # Modules
//!
//! - [`domain`] - Status, composition, candidate menu and key vocabulary
//! - [`engine`] - Engine backend trait and the in-memory reference engine
//! - [`queue`] - Single-threaded execution queue with awaitable job handles
//! - [`lifecycle`] - Cycle-tagged Stopped/Starting/Ready/Stopping state machine
//! - [`state`] - Last-known engine state cache
//! - [`events`] - Event taxonomy, message bus and JSONL event log
//! - [`session`] - The public session facade
//! - [`config`] - Configuration types and loading
//! - [`cli`] / [`repl`] - Command-line driver

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod queue;
pub mod repl;
pub mod session;
pub mod state;

pub use config::{Config, EngineConfig};
pub use engine::{EngineBackend, EngineError, EngineFactory, StartupParams};
pub use events::{Event, MessageBus, Subscription};
pub use lifecycle::LifecycleState;
pub use session::{JobSequencer, Session, SessionConfig, SessionError, SessionResult};
