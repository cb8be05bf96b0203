//! ExecutionQueue - one thread, one engine, one job at a time

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::job::{AbandonedJob, Job, JobError, JobHandle, JobId, panic_message};
use crate::engine::{EngineBackend, EngineError};

/// Worker-thread state handed to every job
///
/// Owns the engine instance; it never leaves the worker thread.
#[derive(Default)]
pub struct WorkerContext {
    engine: Option<Box<dyn EngineBackend>>,
}

impl WorkerContext {
    /// The installed engine, or `NotRunning` before bootstrap
    pub fn engine(&mut self) -> Result<&mut dyn EngineBackend, EngineError> {
        match self.engine {
            Some(ref mut engine) => Ok(engine.as_mut()),
            None => Err(EngineError::NotRunning),
        }
    }

    pub fn install(&mut self, engine: Box<dyn EngineBackend>) {
        debug!("WorkerContext::install: engine installed");
        self.engine = Some(engine);
    }

    pub fn take_engine(&mut self) -> Option<Box<dyn EngineBackend>> {
        self.engine.take()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_some()
    }
}

/// Outcome of [`ExecutionQueue::shutdown`]
pub struct Shutdown {
    /// Jobs that were queued but never started
    pub abandoned: Vec<AbandonedJob>,
    /// The teardown job, absent if the queue was already closed
    pub teardown: Option<JobHandle<()>>,
}

struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
    running: Option<JobId>,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// Serializes jobs onto a dedicated worker thread
///
/// Jobs run in arrival order, strictly one at a time. A failing or panicking
/// job resolves only its own handle.
pub struct ExecutionQueue {
    shared: Arc<Shared>,
    thread_name: String,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ExecutionQueue {
    /// Start the worker thread
    pub fn spawn(thread_name: impl Into<String>) -> std::io::Result<Self> {
        let thread_name = thread_name.into();
        debug!(%thread_name, "ExecutionQueue::spawn: called");
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
                running: None,
            }),
            available: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_loop(worker_shared))?;
        Ok(Self {
            shared,
            thread_name,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Queue a job; the returned handle resolves with its result
    pub fn submit<T, F>(&self, label: &'static str, f: F) -> Result<JobHandle<T>, JobError>
    where
        T: Send + 'static,
        F: FnOnce(&mut WorkerContext) -> Result<T, JobError> + Send + 'static,
    {
        let (job, handle) = make_job(label, f);
        let mut state = self.shared.state.lock();
        if state.closed {
            debug!(label, "ExecutionQueue::submit: rejected, queue closed");
            return Err(JobError::Rejected);
        }
        debug!(job_id = %job.id, label, pending = state.jobs.len(), "ExecutionQueue::submit");
        state.jobs.push_back(job);
        drop(state);
        self.shared.available.notify_one();
        Ok(handle)
    }

    /// Reject new jobs and discard queued ones
    ///
    /// A job already running is left to finish.
    pub fn close(&self) -> Vec<AbandonedJob> {
        let mut state = self.shared.state.lock();
        state.closed = true;
        let discarded: Vec<Job> = state.jobs.drain(..).collect();
        drop(state);
        self.shared.available.notify_all();
        report_abandoned(discarded)
    }

    /// Close the queue and run `teardown` as its final job
    pub fn shutdown<F>(&self, label: &'static str, teardown: F) -> Shutdown
    where
        F: FnOnce(&mut WorkerContext) -> Result<(), JobError> + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.closed {
            debug!("ExecutionQueue::shutdown: already closed");
            return Shutdown {
                abandoned: Vec::new(),
                teardown: None,
            };
        }
        state.closed = true;
        let discarded: Vec<Job> = state.jobs.drain(..).collect();
        let (job, handle) = make_job(label, teardown);
        state.jobs.push_back(job);
        drop(state);
        self.shared.available.notify_all();

        let abandoned = report_abandoned(discarded);
        debug!(abandoned = abandoned.len(), "ExecutionQueue::shutdown: teardown queued");
        Shutdown {
            abandoned,
            teardown: Some(handle),
        }
    }

    /// Jobs waiting to run
    pub fn pending(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// The job currently running, if any
    pub fn in_flight(&self) -> Option<JobId> {
        self.shared.state.lock().running
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Hand out the worker thread's join handle (once)
    ///
    /// The thread exits after the queue is closed and its last job returned.
    pub fn take_worker(&self) -> Option<thread::JoinHandle<()>> {
        self.worker.lock().take()
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        let abandoned = self.close();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "ExecutionQueue dropped with queued jobs");
        }
    }
}

fn make_job<T, F>(label: &'static str, f: F) -> (Job, JobHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(&mut WorkerContext) -> Result<T, JobError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let id = JobId::new();
    let run = Box::new(move |ctx: &mut WorkerContext| {
        let result = match catch_unwind(AssertUnwindSafe(|| f(ctx))) {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
        };
        // Caller may have stopped waiting
        let _ = tx.send(result);
    });
    (Job { id, label, run }, JobHandle::new(id, label, rx))
}

fn report_abandoned(discarded: Vec<Job>) -> Vec<AbandonedJob> {
    // Dropping the jobs drops their senders, resolving each handle as Abandoned
    discarded.iter().map(Job::abandoned).collect()
}

fn next_job(shared: &Shared) -> Option<Job> {
    let mut state = shared.state.lock();
    state.running = None;
    loop {
        if let Some(job) = state.jobs.pop_front() {
            state.running = Some(job.id);
            return Some(job);
        }
        if state.closed {
            return None;
        }
        shared.available.wait(&mut state);
    }
}

fn worker_loop(shared: Arc<Shared>) {
    debug!("worker_loop: started");
    let mut ctx = WorkerContext::default();

    while let Some(job) = next_job(&shared) {
        debug!(job_id = %job.id, label = job.label, "worker_loop: running job");
        (job.run)(&mut ctx);
    }

    if let Some(mut engine) = ctx.take_engine() {
        warn!("worker_loop: engine still installed at exit, shutting it down");
        engine.shutdown();
    }
    debug!("worker_loop: exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{EngineProbe, MemoryEngine};
    use std::sync::mpsc;
    use std::time::Duration;

    fn queue() -> ExecutionQueue {
        ExecutionQueue::spawn("test-worker").unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_result() {
        let q = queue();
        let handle = q.submit("answer", |_| Ok(42)).unwrap();
        assert_eq!(handle.await, Ok(42));
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let q = queue();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for n in 0..10 {
            let order = Arc::clone(&order);
            handles.push(
                q.submit("push", move |_| {
                    order.lock().push(n);
                    Ok(())
                })
                .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_engine_missing_before_install() {
        let q = queue();
        let result = q.submit("probe", |ctx| Ok(ctx.engine()?.sync_user_data()?)).unwrap().await;
        assert_eq!(result, Err(JobError::Engine(EngineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_isolated() {
        let q = queue();
        let failing = q
            .submit::<(), _>("fail", |_| Err(JobError::Engine(EngineError::NotRunning)))
            .unwrap();
        let panicking = q.submit::<(), _>("panic", |_| panic!("job exploded")).unwrap();
        let fine = q.submit("fine", |_| Ok("ok")).unwrap();

        assert!(matches!(failing.await, Err(JobError::Engine(_))));
        assert_eq!(panicking.await, Err(JobError::Panicked("job exploded".to_string())));
        assert_eq!(fine.await, Ok("ok"));
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queued_and_runs_teardown_last() {
        let q = queue();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let blocker = q
            .submit("blocker", move |_| {
                started_tx.send(()).ok();
                release_rx.recv().ok();
                Ok("done")
            })
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let queued: Vec<_> = (0..3).map(|_| q.submit("queued", |_| Ok(())).unwrap()).collect();
        assert_eq!(q.pending(), 3);
        assert!(q.in_flight().is_some());

        let shutdown = q.shutdown("teardown", |_| Ok(()));
        assert_eq!(shutdown.abandoned.len(), 3);
        assert!(shutdown.abandoned.iter().all(|job| job.label == "queued"));
        assert_eq!(q.submit("late", |_| Ok(())).err(), Some(JobError::Rejected));

        release_tx.send(()).unwrap();
        assert_eq!(blocker.await, Ok("done"));
        for handle in queued {
            assert_eq!(handle.await, Err(JobError::Abandoned));
        }
        assert_eq!(shutdown.teardown.unwrap().await, Ok(()));
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let q = queue();
        assert!(q.shutdown("teardown", |_| Ok(())).teardown.is_some());
        let again = q.shutdown("teardown", |_| Ok(()));
        assert!(again.teardown.is_none());
        assert!(again.abandoned.is_empty());
        assert!(q.is_closed());
    }

    #[test]
    fn test_worker_exits_after_shutdown() {
        let q = queue();
        let worker = q.take_worker().unwrap();
        assert!(q.take_worker().is_none());

        q.shutdown("teardown", |_| Ok(()));
        worker.join().unwrap();
        assert!(q.is_closed());
    }

    #[tokio::test]
    async fn test_worker_shuts_down_leftover_engine() {
        let probe = EngineProbe::new();
        let q = queue();
        let engine_probe = probe.clone();
        q.submit("install", move |ctx| {
            ctx.install(Box::new(MemoryEngine::with_probe(engine_probe)));
            Ok(())
        })
        .unwrap()
        .await
        .unwrap();
        drop(q);

        for _ in 0..100 {
            if probe.call_count("shutdown") == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine was not shut down");
    }
}
