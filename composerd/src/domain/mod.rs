//! Domain types for composerd
//!
//! Immutable snapshots of engine-derived state (status, composition, candidate
//! menu) plus the key vocabulary the engine understands. Everything here is
//! plain data: cloneable, comparable and serializable so it can travel through
//! the event bus and the state cache unchanged.

mod context;
pub mod keys;
mod schema;
mod status;

pub use context::{CandidateItem, CandidateMenu, Commit, Composition, Context};
pub use keys::KeyModifiers;
pub use schema::{EMPTY_SCHEMA_ID, SchemaItem};
pub use status::Status;
