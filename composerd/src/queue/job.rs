//! Jobs and their result handles

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::worker::WorkerContext;
use crate::engine::EngineError;

/// Unique, time-ordered job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a job did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Execution queue is not accepting jobs")]
    Rejected,

    #[error("Job was discarded before it ran")]
    Abandoned,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// A queued job that never ran because the queue shut down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedJob {
    pub id: JobId,
    pub label: &'static str,
}

pub(crate) type JobFn = Box<dyn FnOnce(&mut WorkerContext) + Send>;

pub(crate) struct Job {
    pub id: JobId,
    pub label: &'static str,
    pub run: JobFn,
}

impl Job {
    pub fn abandoned(&self) -> AbandonedJob {
        AbandonedJob {
            id: self.id,
            label: self.label,
        }
    }
}

/// Awaitable result of a submitted job
///
/// The job is already queued when the handle is returned; awaiting only
/// collects the outcome. Dropping the handle does not cancel the job.
pub struct JobHandle<T> {
    id: JobId,
    label: &'static str,
    rx: oneshot::Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(id: JobId, label: &'static str, rx: oneshot::Receiver<Result<T, JobError>>) -> Self {
        Self { id, label, rx }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the job was discarded unrun
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(JobError::Abandoned)))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_dropped_sender_is_abandoned() {
        let (tx, rx) = oneshot::channel::<Result<(), JobError>>();
        let handle = JobHandle::new(JobId::new(), "test", rx);
        drop(tx);
        assert_eq!(handle.await, Err(JobError::Abandoned));
    }

    #[test]
    fn test_engine_error_converts() {
        let err: JobError = EngineError::NotRunning.into();
        assert_eq!(err.to_string(), "Engine is not running");
    }
}
