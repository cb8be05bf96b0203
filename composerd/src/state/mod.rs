//! Last-known engine state
//!
//! The worker thread is the only writer; any thread may read. Readers get an
//! `Arc` to an immutable snapshot, so a composition is never seen next to a
//! status from a different engine turn.

mod cache;

pub use cache::{EngineSnapshot, StateCache};
