//! Bootstrap and teardown jobs

use std::fs;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use super::dispatch::EventSink;
use crate::engine::{EngineError, EngineFactory, StartupParams};
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::queue::{JobError, WorkerContext};

/// Make sure the engine's resource directories are usable
pub fn prepare_directories(params: &StartupParams) -> Result<(), EngineError> {
    debug!(shared_dir = %params.shared_dir.display(), user_dir = %params.user_dir.display(), "prepare_directories: called");
    if !params.shared_dir.is_dir() {
        return Err(EngineError::Resources(format!(
            "shared directory {} does not exist",
            params.shared_dir.display()
        )));
    }
    fs::create_dir_all(&params.user_dir).map_err(|e| {
        EngineError::Resources(format!("cannot create user directory {}: {}", params.user_dir.display(), e))
    })?;
    Ok(())
}

/// Everything the bootstrap job needs, moved onto the worker thread
pub struct Bootstrap {
    pub cycle: u64,
    /// Workers of earlier cycles; joined before this cycle touches an engine
    pub predecessors: Vec<JoinHandle<()>>,
    pub params: StartupParams,
    pub factory: Arc<dyn EngineFactory>,
    pub lifecycle: Arc<LifecycleController>,
    pub sink: EventSink,
}

impl Bootstrap {
    /// Create and start the engine, then move the cycle to Ready
    ///
    /// Waits for earlier cycles' workers first, so two engines never run at
    /// once. The first turn is in the cache before the cycle reads as Ready,
    /// and its Response is published before this job returns, ahead of any
    /// job queued behind the bootstrap.
    pub fn run(self, ctx: &mut WorkerContext) -> Result<(), JobError> {
        let Bootstrap {
            cycle,
            predecessors,
            params,
            factory,
            lifecycle,
            sink,
        } = self;
        debug!(cycle, predecessors = predecessors.len(), "Bootstrap::run: called");

        for worker in predecessors {
            if worker.join().is_err() {
                warn!(cycle, "Previous worker thread panicked");
            }
        }
        if !lifecycle.is_current(cycle, LifecycleState::Starting) {
            debug!(cycle, "Bootstrap::run: cycle ended while waiting for previous worker");
            return Err(EngineError::Superseded.into());
        }

        prepare_directories(&params)?;
        let mut engine = factory.create()?;
        engine.startup(&params)?;

        if !lifecycle.is_current(cycle, LifecycleState::Starting) {
            warn!(cycle, "Engine started after its cycle was abandoned, shutting it down");
            engine.shutdown();
            return Err(EngineError::Superseded.into());
        }

        sink.cache().reset();
        ctx.install(engine);
        let engine = ctx.engine()?;
        sink.drain_notifications(engine);
        let turn = sink.read_turn(engine)?;
        if let Some(turn) = &turn {
            sink.store_turn(turn);
        }

        if !lifecycle.transition(cycle, LifecycleState::Starting, LifecycleState::Ready) {
            warn!(cycle, "Bootstrap finished after its cycle was abandoned, shutting engine down");
            if let Some(mut engine) = ctx.take_engine() {
                engine.shutdown();
            }
            return Err(EngineError::Superseded.into());
        }

        if let Some(turn) = turn {
            sink.announce_turn(turn);
        }
        info!(cycle, "Engine ready");
        Ok(())
    }
}

/// Release the engine; runs as the last job of a cycle
pub fn teardown(ctx: &mut WorkerContext) -> Result<(), JobError> {
    debug!("teardown: called");
    if let Some(mut engine) = ctx.take_engine() {
        engine.shutdown();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{EngineProbe, MemoryEngine};
    use crate::events::MessageBus;
    use crate::state::StateCache;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn bootstrap(probe: &EngineProbe, lifecycle: &Arc<LifecycleController>, cycle: u64) -> (Bootstrap, TempDir) {
        let temp = tempdir().unwrap();
        let params = StartupParams {
            shared_dir: temp.path().to_path_buf(),
            user_dir: temp.path().join("user"),
            version_tag: "test".to_string(),
            full_check: false,
        };
        let job = Bootstrap {
            cycle,
            predecessors: Vec::new(),
            params,
            factory: Arc::new(MemoryEngine::factory(probe.clone())),
            lifecycle: Arc::clone(lifecycle),
            sink: EventSink::new(MessageBus::with_default_capacity(), Arc::new(StateCache::new())),
        };
        (job, temp)
    }

    #[test]
    fn test_prepare_creates_user_dir() {
        let temp = tempdir().unwrap();
        let params = StartupParams {
            shared_dir: temp.path().to_path_buf(),
            user_dir: temp.path().join("user").join("nested"),
            version_tag: "test".to_string(),
            full_check: false,
        };
        prepare_directories(&params).unwrap();
        assert!(params.user_dir.is_dir());
    }

    #[test]
    fn test_prepare_requires_shared_dir() {
        let temp = tempdir().unwrap();
        let params = StartupParams {
            shared_dir: temp.path().join("missing"),
            user_dir: temp.path().join("user"),
            version_tag: "test".to_string(),
            full_check: false,
        };
        assert!(matches!(prepare_directories(&params), Err(EngineError::Resources(_))));
    }

    #[test]
    fn test_teardown_without_engine() {
        let mut ctx = WorkerContext::default();
        assert_eq!(teardown(&mut ctx), Ok(()));
    }

    #[test]
    fn test_abandoned_cycle_never_creates_engine() {
        let probe = EngineProbe::new();
        let lifecycle = Arc::new(LifecycleController::new());
        let cycle = lifecycle.begin_start().unwrap();
        lifecycle.fail_start(cycle, "timed out");
        let (job, _temp) = bootstrap(&probe, &lifecycle, cycle);

        let mut ctx = WorkerContext::default();
        assert_eq!(job.run(&mut ctx), Err(JobError::Engine(EngineError::Superseded)));
        assert_eq!(probe.call_count("startup"), 0);
        assert!(!ctx.is_running());
    }

    #[test]
    fn test_waits_for_previous_worker() {
        let probe = EngineProbe::new();
        let lifecycle = Arc::new(LifecycleController::new());
        let cycle = lifecycle.begin_start().unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let previous = {
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                finished.store(true, Ordering::SeqCst);
            })
        };
        let (mut job, _temp) = bootstrap(&probe, &lifecycle, cycle);
        job.predecessors.push(previous);
        let sink = job.sink.clone();

        let mut ctx = WorkerContext::default();
        job.run(&mut ctx).unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert!(lifecycle.is_ready());
        assert_eq!(sink.cache().status().schema_id, "luna_pinyin");
    }
}
