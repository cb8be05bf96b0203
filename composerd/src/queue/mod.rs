//! Serialized execution against the engine
//!
//! [`ExecutionQueue`] owns a dedicated OS thread. Every engine-touching
//! operation is a job: a closure over [`WorkerContext`] whose result comes
//! back through a [`JobHandle`] the caller awaits without blocking.

mod job;
mod worker;

pub use job::{AbandonedJob, JobError, JobHandle, JobId};
pub use worker::{ExecutionQueue, Shutdown, WorkerContext};
