//! Session - the public face of the engine coordinator
//!
//! Every engine-touching operation becomes a job on the cycle's
//! [`ExecutionQueue`]. Mutations refresh the [`StateCache`] and publish a
//! `Response` before the caller's future resolves; a declined key publishes
//! `KeyUnhandled` instead and leaves the cache alone.

use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::bootstrap::{self, Bootstrap};
use super::config::SessionConfig;
use super::dispatch::EventSink;
use super::error::{SessionError, SessionResult};
use crate::domain::keys;
use crate::domain::{CandidateItem, CandidateMenu, Composition, EMPTY_SCHEMA_ID, KeyModifiers, SchemaItem, Status};
use crate::engine::{EngineBackend, EngineFactory, EngineResult, StartupParams};
use crate::events::{Event, HandlerId, MessageBus, Subscription};
use crate::lifecycle::{BootstrapFailure, LifecycleController, LifecycleObserver, LifecycleState};
use crate::queue::{AbandonedJob, ExecutionQueue, JobHandle};
use crate::state::{EngineSnapshot, StateCache};

/// Result of a completed `stop()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub cycle: u64,
    /// Jobs that were queued but never ran
    pub abandoned: Vec<AbandonedJob>,
    /// Teardown finished within the configured timeout
    pub teardown_completed: bool,
}

struct CycleQueue {
    cycle: u64,
    queue: Arc<ExecutionQueue>,
}

struct SessionInner {
    config: SessionConfig,
    params: StartupParams,
    factory: Arc<dyn EngineFactory>,
    lifecycle: Arc<LifecycleController>,
    bus: MessageBus,
    cache: Arc<StateCache>,
    sink: EventSink,
    queue: Mutex<Option<CycleQueue>>,
    /// Worker threads of ended cycles that may still be inside the engine
    retired: Mutex<Vec<JoinHandle<()>>>,
}

/// Engine session coordinator
///
/// Cheap to clone; clones share one engine, one queue and one bus.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(config: SessionConfig, params: StartupParams, factory: impl EngineFactory) -> Self {
        debug!(?config, "Session::new: called");
        let bus = MessageBus::new(config.subscriber_capacity);
        let cache = Arc::new(StateCache::new());
        let sink = EventSink::new(bus.clone(), Arc::clone(&cache));
        Self {
            inner: Arc::new(SessionInner {
                config,
                params,
                factory: Arc::new(factory),
                lifecycle: Arc::new(LifecycleController::new()),
                bus,
                cache,
                sink,
                queue: Mutex::new(None),
                retired: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn params(&self) -> &StartupParams {
        &self.inner.params
    }

    // === Lifecycle ===

    /// Begin a start cycle
    ///
    /// Only legal from `Stopped`; otherwise logs a warning and returns false.
    /// Must be called within a Tokio runtime.
    pub fn start(&self) -> bool {
        debug!("Session::start: called");
        let mut slot = self.inner.queue.lock();
        let Some(cycle) = self.inner.lifecycle.begin_start() else {
            return false;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.inner.lifecycle.fail_start(cycle, "start() requires a Tokio runtime");
            return false;
        };

        let queue = match ExecutionQueue::spawn(self.inner.config.worker_thread_name.clone()) {
            Ok(queue) => Arc::new(queue),
            Err(e) => {
                self.inner
                    .lifecycle
                    .fail_start(cycle, format!("cannot spawn worker thread: {e}"));
                return false;
            }
        };

        let job = Bootstrap {
            cycle,
            predecessors: std::mem::take(&mut *self.inner.retired.lock()),
            params: self.inner.params.clone(),
            factory: Arc::clone(&self.inner.factory),
            lifecycle: Arc::clone(&self.inner.lifecycle),
            sink: self.inner.sink.clone(),
        };
        let handle = match queue.submit("bootstrap", move |ctx| job.run(ctx)) {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.lifecycle.fail_start(cycle, e.to_string());
                return false;
            }
        };
        *slot = Some(CycleQueue { cycle, queue });
        drop(slot);

        let inner = Arc::clone(&self.inner);
        let timeout = self.inner.config.bootstrap_timeout();
        runtime.spawn(async move {
            let reason = match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("bootstrap timed out after {}ms", timeout.as_millis()),
            };
            inner.abandon_cycle(cycle, reason);
        });

        info!(cycle, "Engine session starting");
        true
    }

    /// End the current cycle
    ///
    /// Only legal from `Ready`; otherwise logs a warning and returns `None`.
    /// New jobs are rejected at once, queued jobs are discarded, a running
    /// job finishes, then the engine is torn down.
    pub async fn stop(&self) -> Option<StopReport> {
        debug!("Session::stop: called");
        let (cycle, queue) = {
            let mut slot = self.inner.queue.lock();
            let cycle = self.inner.lifecycle.begin_stop()?;
            let queue = slot.take().map(|c| c.queue);
            (cycle, queue)
        };

        let mut report = StopReport {
            cycle,
            abandoned: Vec::new(),
            teardown_completed: false,
        };

        if let Some(queue) = queue {
            let shutdown = queue.shutdown("teardown", bootstrap::teardown);
            self.inner.retire(&queue);
            if !shutdown.abandoned.is_empty() {
                warn!(count = shutdown.abandoned.len(), "Jobs didn't get a chance to run");
            }
            report.abandoned = shutdown.abandoned;

            if let Some(teardown) = shutdown.teardown {
                match tokio::time::timeout(self.inner.config.teardown_timeout(), teardown).await {
                    Ok(Ok(())) => report.teardown_completed = true,
                    Ok(Err(e)) => warn!(error = %e, "Engine teardown failed"),
                    Err(_) => warn!(
                        timeout_ms = self.inner.config.teardown_timeout_ms,
                        "Engine teardown timed out"
                    ),
                }
            }
        }

        self.inner
            .lifecycle
            .transition(cycle, LifecycleState::Stopping, LifecycleState::Stopped);
        info!(cycle, abandoned = report.abandoned.len(), "Engine session stopped");
        Some(report)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lifecycle.is_ready()
    }

    pub fn observe_lifecycle(&self) -> LifecycleObserver {
        self.inner.lifecycle.observe()
    }

    pub fn last_failure(&self) -> Option<BootstrapFailure> {
        self.inner.lifecycle.last_failure()
    }

    /// Wait until the current cycle is `Ready`
    ///
    /// Fails with `NotRunning` if no cycle is active or the cycle ends
    /// without reaching `Ready`.
    pub async fn wait_ready(&self) -> SessionResult<()> {
        let mut observer = self.inner.lifecycle.observe();
        while let Some(state) = observer.next().await {
            match state {
                LifecycleState::Ready => return Ok(()),
                LifecycleState::Starting => continue,
                LifecycleState::Stopped | LifecycleState::Stopping => return Err(SessionError::NotRunning),
            }
        }
        Err(SessionError::NotRunning)
    }

    /// Run `f` once the session is ready
    pub async fn run_on_ready<F, Fut>(&self, f: F) -> SessionResult<Fut::Output>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future,
    {
        self.wait_ready().await?;
        Ok(f(self.clone()).await)
    }

    // === Bus and cache ===

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.bus.subscribe()
    }

    /// Register a handler that sees each event before any subscriber
    pub fn register_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.bus.register_handler(handler)
    }

    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        self.inner.bus.unregister_handler(id)
    }

    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.inner.cache.snapshot()
    }

    pub fn status(&self) -> Status {
        self.inner.cache.status()
    }

    pub fn composition(&self) -> Composition {
        self.inner.cache.composition()
    }

    pub fn menu(&self) -> CandidateMenu {
        self.inner.cache.menu()
    }

    pub fn raw_input(&self) -> String {
        self.inner.cache.raw_input()
    }

    // === Job plumbing ===

    fn queue(&self) -> SessionResult<Arc<ExecutionQueue>> {
        match self.inner.queue.lock().as_ref() {
            Some(current) => Ok(Arc::clone(&current.queue)),
            None => Err(SessionError::NotRunning),
        }
    }

    fn submit<T, F>(&self, label: &'static str, f: F) -> SessionResult<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn EngineBackend, &EventSink) -> EngineResult<T> + Send + 'static,
    {
        let sink = self.inner.sink.clone();
        let handle = self.queue()?.submit(label, move |ctx| {
            let engine = ctx.engine()?;
            Ok(f(engine, &sink)?)
        })?;
        Ok(handle)
    }

    async fn run<T, F>(&self, label: &'static str, f: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn EngineBackend, &EventSink) -> EngineResult<T> + Send + 'static,
    {
        Ok(self.submit(label, f)?.await?)
    }

    /// Engine call returning "handled"; refresh on success
    async fn mutate<F>(&self, label: &'static str, call: F) -> SessionResult<bool>
    where
        F: FnOnce(&mut dyn EngineBackend) -> EngineResult<bool> + Send + 'static,
    {
        self.run(label, move |engine, sink| {
            let handled = call(engine)?;
            sink.drain_notifications(engine);
            if handled {
                sink.respond(engine)?;
            }
            Ok(handled)
        })
        .await
    }

    /// Queue an arbitrary engine closure; the job is queued before this returns
    pub fn submit_job<T, F>(&self, label: &'static str, f: F) -> SessionResult<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn EngineBackend) -> EngineResult<T> + Send + 'static,
    {
        self.submit(label, move |engine, sink| {
            let result = f(engine);
            sink.drain_notifications(engine);
            result
        })
    }

    /// Run an arbitrary engine closure and wait for its result
    pub async fn with_engine<T, F>(&self, label: &'static str, f: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn EngineBackend) -> EngineResult<T> + Send + 'static,
    {
        Ok(self.submit_job(label, f)?.await?)
    }

    // === Operations ===

    /// Feed one key to the engine
    ///
    /// Returns false and publishes `KeyUnhandled` if the engine declined it.
    pub async fn process_key(&self, keycode: i32, modifiers: KeyModifiers) -> SessionResult<bool> {
        debug!(keycode, modifiers = modifiers.bits(), "Session::process_key: called");
        self.run("process_key", move |engine, sink| {
            let handled = engine.process_key(keycode, modifiers.bits())?;
            sink.drain_notifications(engine);
            if handled {
                sink.respond(engine)?;
            } else {
                sink.key_unhandled(keycode, modifiers);
            }
            Ok(handled)
        })
        .await
    }

    /// Feed a key sequence such as `"nihao{space}"`
    ///
    /// Succeeds only if the engine accepted the sequence and it produced a
    /// commit or left input pending.
    pub async fn simulate_key_sequence(&self, sequence: &str) -> SessionResult<bool> {
        debug!(%sequence, "Session::simulate_key_sequence: called");
        let Some(first) = sequence.chars().next() else {
            return Ok(false);
        };
        if !first.is_ascii() || !keys::is_printable(first as i32) {
            debug!(%sequence, "Session::simulate_key_sequence: first character is not printable ASCII");
            return Ok(false);
        }
        let sequence = sequence.replace("{}", "{braceleft}{braceright}");

        self.run("simulate_key_sequence", move |engine, sink| {
            let accepted = engine.simulate_key_sequence(&sequence)?;
            sink.drain_notifications(engine);
            if !accepted {
                return Ok(false);
            }
            match sink.read_turn(engine)? {
                Some(turn) if turn.has_output() => {
                    sink.publish_turn(turn);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    /// Select by absolute index into the candidate list
    pub async fn select_candidate(&self, index: usize) -> SessionResult<bool> {
        debug!(index, "Session::select_candidate: called");
        self.mutate("select_candidate", move |engine| engine.select_candidate(index))
            .await
    }

    /// Select by index within the current page
    pub async fn select_paged_candidate(&self, index: usize) -> SessionResult<bool> {
        debug!(index, "Session::select_paged_candidate: called");
        self.mutate("select_paged_candidate", move |engine| engine.select_candidate_on_page(index))
            .await
    }

    /// Forget a candidate by index within the current page
    pub async fn delete_paged_candidate(&self, index: usize) -> SessionResult<bool> {
        debug!(index, "Session::delete_paged_candidate: called");
        self.mutate("delete_paged_candidate", move |engine| engine.delete_candidate_on_page(index))
            .await
    }

    /// Forget a candidate by absolute index
    pub async fn forget_candidate(&self, index: usize) -> SessionResult<bool> {
        debug!(index, "Session::forget_candidate: called");
        self.mutate("forget_candidate", move |engine| engine.forget_candidate(index))
            .await
    }

    pub async fn change_page(&self, backward: bool) -> SessionResult<bool> {
        debug!(backward, "Session::change_page: called");
        self.mutate("change_page", move |engine| engine.change_page(backward))
            .await
    }

    /// Move the caret; always refreshes
    pub async fn move_cursor_pos(&self, pos: usize) -> SessionResult<()> {
        debug!(pos, "Session::move_cursor_pos: called");
        self.run("move_cursor_pos", move |engine, sink| {
            engine.set_caret_pos(pos)?;
            sink.drain_notifications(engine);
            sink.respond(engine)?;
            Ok(())
        })
        .await
    }

    /// Commit the current composition; always refreshes
    pub async fn commit_composition(&self) -> SessionResult<bool> {
        debug!("Session::commit_composition: called");
        self.run("commit_composition", |engine, sink| {
            let committed = engine.commit_composition()?;
            sink.drain_notifications(engine);
            sink.respond(engine)?;
            Ok(committed)
        })
        .await
    }

    /// Discard the current composition; always refreshes
    pub async fn clear_composition(&self) -> SessionResult<()> {
        debug!("Session::clear_composition: called");
        self.run("clear_composition", |engine, sink| {
            engine.clear_composition()?;
            sink.drain_notifications(engine);
            sink.respond(engine)?;
            Ok(())
        })
        .await
    }

    /// Read a runtime option; unknown names read as false
    pub async fn runtime_option(&self, name: &str) -> SessionResult<bool> {
        let name = name.to_string();
        self.run("runtime_option", move |engine, _| engine.runtime_option(&name))
            .await
    }

    /// Set a runtime option without refreshing
    ///
    /// The cached status follows the engine's option notification; call
    /// [`refresh`](Self::refresh) for a full Response.
    pub async fn set_runtime_option(&self, name: &str, value: bool) -> SessionResult<()> {
        debug!(%name, value, "Session::set_runtime_option: called");
        let name = name.to_string();
        self.run("set_runtime_option", move |engine, sink| {
            engine.set_runtime_option(&name, value)?;
            sink.drain_notifications(engine);
            Ok(())
        })
        .await
    }

    /// Explicit consolidated refresh
    pub async fn refresh(&self) -> SessionResult<bool> {
        self.run("refresh", |engine, sink| sink.respond(engine)).await
    }

    pub async fn available_schemas(&self) -> SessionResult<Vec<SchemaItem>> {
        self.run("available_schemas", |engine, _| engine.available_schemas())
            .await
    }

    pub async fn enabled_schemas(&self) -> SessionResult<Vec<SchemaItem>> {
        self.run("enabled_schemas", |engine, _| engine.enabled_schemas())
            .await
    }

    pub async fn set_enabled_schemas(&self, ids: Vec<String>) -> SessionResult<bool> {
        debug!(?ids, "Session::set_enabled_schemas: called");
        self.run("set_enabled_schemas", move |engine, sink| {
            let updated = engine.set_enabled_schemas(&ids)?;
            sink.drain_notifications(engine);
            Ok(updated)
        })
        .await
    }

    pub async fn current_schema(&self) -> SessionResult<String> {
        self.run("current_schema", |engine, _| engine.current_schema())
            .await
    }

    /// True when no schema is deployed
    pub async fn is_empty(&self) -> SessionResult<bool> {
        Ok(self.current_schema().await? == EMPTY_SCHEMA_ID)
    }

    /// Switch schema; publishes `SchemaChanged` then `Response`
    pub async fn select_schema(&self, id: &str) -> SessionResult<bool> {
        debug!(%id, "Session::select_schema: called");
        let id = id.to_string();
        self.run("select_schema", move |engine, sink| {
            let selected = engine.select_schema(&id)?;
            let published = sink.drain_notifications(engine);
            if !selected {
                return Ok(false);
            }
            let reported = published
                .iter()
                .any(|event| matches!(event, Event::SchemaChanged { id: changed, .. } if *changed == id));
            if !reported {
                let name = engine.status()?.map(|s| s.schema_name).unwrap_or_default();
                sink.publish_notification(engine, Event::SchemaChanged { id, name });
            }
            sink.respond(engine)?;
            Ok(true)
        })
        .await
    }

    /// Window over the full candidate list
    pub async fn get_candidates(&self, start: usize, limit: usize) -> SessionResult<Vec<CandidateItem>> {
        self.run("get_candidates", move |engine, _| engine.candidates(start, limit))
            .await
    }

    pub async fn sync_user_data(&self) -> SessionResult<bool> {
        debug!("Session::sync_user_data: called");
        self.run("sync_user_data", |engine, sink| {
            let synced = engine.sync_user_data()?;
            sink.drain_notifications(engine);
            Ok(synced)
        })
        .await
    }
}

impl SessionInner {
    /// End a start cycle that never reached Ready
    fn abandon_cycle(&self, cycle: u64, reason: String) {
        let mut slot = self.queue.lock();
        if !self.lifecycle.fail_start(cycle, reason) {
            return;
        }
        if let Some(current) = slot.take_if(|c| c.cycle == cycle) {
            let abandoned = current.queue.close();
            self.retire(&current.queue);
            if !abandoned.is_empty() {
                error!(cycle, count = abandoned.len(), "Jobs abandoned by failed bootstrap");
            }
        }
    }

    /// Keep a closed queue's worker so the next cycle can wait for it
    fn retire(&self, queue: &ExecutionQueue) {
        if let Some(worker) = queue.take_worker() {
            self.retired.lock().push(worker);
        }
    }
}
