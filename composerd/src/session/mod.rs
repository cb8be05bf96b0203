//! Engine session coordinator
//!
//! [`Session`] ties the pieces together: it owns the lifecycle, runs every
//! engine call as a job on the cycle's execution queue, keeps the state cache
//! current and publishes events on the message bus.
//!
//! ```text
//! caller ─► Session ─► ExecutionQueue ─► engine
//!                             │
//!                             ▼
//!                         EventSink ─► StateCache
//!                             │
//!                             └──────► MessageBus ─► handlers, subscribers
//! ```

mod bootstrap;
mod config;
mod dispatch;
mod error;
mod facade;
mod sequencer;

pub use bootstrap::prepare_directories;
pub use config::SessionConfig;
pub use dispatch::{EventSink, Turn};
pub use error::{SessionError, SessionResult};
pub use facade::{Session, StopReport};
pub use sequencer::{JobSequencer, Sequenced};
