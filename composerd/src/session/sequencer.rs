//! JobSequencer - strict one-after-another host jobs
//!
//! The session only orders individual engine calls. A host that needs a
//! multi-step transaction (read options, switch schema, refresh) posts it
//! here; posted jobs never interleave with each other.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::error::{SessionError, SessionResult};
use super::facade::Session;
use crate::queue::JobError;

/// Single-consumer queue of async host jobs
///
/// Each job waits for the session to be ready before it runs. Must be created
/// within a Tokio runtime.
pub struct JobSequencer {
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
    session: Session,
}

impl JobSequencer {
    pub fn new(session: Session) -> Self {
        debug!("JobSequencer::new: called");
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    error!("JobSequencer: posted job panicked");
                }
            }
            debug!("JobSequencer: all senders gone, exiting");
        });
        Self { tx, session }
    }

    /// Queue `f` behind every previously posted job
    pub fn post<F, Fut, T>(&self, f: F) -> Sequenced<T>
    where
        F: FnOnce(Session) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let session = self.session.clone();
        let job = async move {
            let result = match session.wait_ready().await {
                Ok(()) => Ok(f(session).await),
                Err(e) => Err(e),
            };
            let _ = tx.send(result);
        }
        .boxed();
        if self.tx.send(job).is_err() {
            error!("JobSequencer: consumer task is gone, dropping job");
        }
        Sequenced { rx }
    }
}

/// Pending result of a posted job
pub struct Sequenced<T> {
    rx: oneshot::Receiver<SessionResult<T>>,
}

impl<T> Future for Sequenced<T> {
    type Output = SessionResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(SessionError::Job(JobError::Abandoned))))
    }
}
