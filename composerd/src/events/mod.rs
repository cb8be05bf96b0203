//! Event taxonomy and delivery
//!
//! The engine's state changes become typed [`Event`]s, published on a
//! [`MessageBus`] and fanned out to independent consumers.
//!
//! ```text
//!              worker thread
//!   engine ──► EventSink ──► MessageBus::publish
//!                               │
//!              ┌────────────────┼──────────────────┐
//!              ▼                ▼                  ▼
//!        sync handlers    Subscription(15)   Subscription(15)
//!        (in order,       UI repaint         EventLogger
//!         same thread)    drop-oldest        drop-oldest
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use composerd::events::{Event, MessageBus};
//!
//! let bus = MessageBus::with_default_capacity();
//! bus.register_handler(|event| {
//!     if let Event::SchemaChanged { id, .. } = event {
//!         reload_schema_config(id);
//!     }
//! });
//!
//! let sub = bus.subscribe();
//! while let Some(event) = sub.recv().await {
//!     repaint(&event);
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_SUBSCRIBER_CAPACITY, HandlerId, MessageBus, Subscription};
pub use logger::{EventLogger, read_event_log, spawn_event_logger};
pub use types::{DecodeError, DeployPhase, Event, EventLogEntry};
