//! EventSink - turns engine state into cache updates and bus events
//!
//! Runs on the worker thread only, which makes it the single writer of the
//! state cache.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{Commit, KeyModifiers, Status};
use crate::engine::{EngineBackend, EngineResult};
use crate::events::{Event, MessageBus};
use crate::state::{EngineSnapshot, StateCache};

/// One consolidated engine turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub commit: Option<Commit>,
    pub snapshot: EngineSnapshot,
}

impl Turn {
    /// The turn produced text or left input pending
    pub fn has_output(&self) -> bool {
        self.commit.as_ref().is_some_and(|c| !c.is_empty()) || !self.snapshot.raw_input.is_empty()
    }
}

#[derive(Clone)]
pub struct EventSink {
    bus: MessageBus,
    cache: Arc<StateCache>,
}

impl EventSink {
    pub fn new(bus: MessageBus, cache: Arc<StateCache>) -> Self {
        Self { bus, cache }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Decode and publish pending engine notifications
    ///
    /// Returns the events that were published. Malformed notifications are
    /// logged and skipped.
    pub fn drain_notifications(&self, engine: &mut dyn EngineBackend) -> Vec<Event> {
        let mut published = Vec::new();
        for raw in engine.take_notifications() {
            match Event::from_notification(&raw) {
                Ok(event) => {
                    self.publish_notification(engine, event.clone());
                    published.push(event);
                }
                Err(e) => {
                    warn!(
                        message_type = %raw.message_type,
                        message_value = %raw.message_value,
                        error = %e,
                        "Dropping malformed engine notification"
                    );
                }
            }
        }
        published
    }

    /// Refresh the cached status for a notification event, then publish it
    ///
    /// Schema and option changes re-read the engine's status; the local patch
    /// is only used when the engine has no status to give.
    pub fn publish_notification(&self, engine: &mut dyn EngineBackend, event: Event) {
        if matches!(event, Event::SchemaChanged { .. } | Event::OptionChanged { .. }) {
            match engine.status() {
                Ok(Some(status)) => self.cache.apply_status(move |_| status.clone()),
                Ok(None) => {
                    debug!(event_type = event.event_type(), "EventSink::publish_notification: no status, patching");
                    self.patch_status(&event);
                }
                Err(e) => {
                    warn!(event_type = event.event_type(), error = %e, "Status re-read failed, patching cached status");
                    self.patch_status(&event);
                }
            }
        }
        self.bus.publish(event);
    }

    fn patch_status(&self, event: &Event) {
        match event {
            Event::SchemaChanged { id, name } => self.cache.apply_status(|status| Status {
                schema_id: id.clone(),
                schema_name: name.clone(),
                ..status.clone()
            }),
            Event::OptionChanged { name, value } => self.cache.apply_status(|status| status.with_flag(name, *value)),
            _ => {}
        }
    }

    /// Read commit, context and status as one group
    ///
    /// `None` means the engine withheld its context or status; that turn is
    /// dropped.
    pub fn read_turn(&self, engine: &mut dyn EngineBackend) -> EngineResult<Option<Turn>> {
        let commit = engine.commit()?.filter(|c| !c.is_empty());
        let context = engine.context()?;
        let status = engine.status()?;
        match (context, status) {
            (Some(context), Some(status)) => Ok(Some(Turn {
                commit,
                snapshot: EngineSnapshot::from_parts(context, status),
            })),
            (context, status) => {
                warn!(
                    has_context = context.is_some(),
                    has_status = status.is_some(),
                    "Engine returned incomplete state, dropping response"
                );
                Ok(None)
            }
        }
    }

    /// Store a turn's snapshot in the cache without announcing it
    pub fn store_turn(&self, turn: &Turn) {
        debug!(raw_input = %turn.snapshot.raw_input, has_commit = turn.commit.is_some(), "EventSink::store_turn");
        self.cache.apply_response(turn.snapshot.clone());
    }

    /// Publish an already stored turn as a Response
    pub fn announce_turn(&self, turn: Turn) {
        let Turn { commit, snapshot } = turn;
        self.bus.publish(Event::Response {
            commit,
            composition: snapshot.composition,
            menu: snapshot.menu,
            raw_input: snapshot.raw_input,
            status: snapshot.status,
        });
    }

    /// Store a turn in the cache and publish it as a Response
    pub fn publish_turn(&self, turn: Turn) {
        self.store_turn(&turn);
        self.announce_turn(turn);
    }

    /// Consolidated refresh; false if the turn had to be dropped
    pub fn respond(&self, engine: &mut dyn EngineBackend) -> EngineResult<bool> {
        match self.read_turn(engine)? {
            Some(turn) => {
                self.publish_turn(turn);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn key_unhandled(&self, keycode: i32, modifiers: KeyModifiers) {
        debug!(keycode, modifiers = modifiers.bits(), "EventSink::key_unhandled");
        self.bus.publish(Event::KeyUnhandled {
            key_value: keycode,
            modifiers,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{EngineProbe, MemoryEngine};
    use crate::engine::{RawNotification, StartupParams};

    fn started(probe: EngineProbe) -> MemoryEngine {
        let mut engine = MemoryEngine::with_probe(probe);
        engine
            .startup(&StartupParams {
                shared_dir: "/tmp".into(),
                user_dir: "/tmp".into(),
                version_tag: "test".to_string(),
                full_check: false,
            })
            .unwrap();
        engine
    }

    fn sink() -> (EventSink, crate::events::Subscription) {
        let bus = MessageBus::with_default_capacity();
        let sub = bus.subscribe();
        (EventSink::new(bus, Arc::new(StateCache::new())), sub)
    }

    #[test]
    fn test_malformed_notifications_dropped_others_delivered() {
        let (sink, sub) = sink();
        let probe = EngineProbe::new();
        let mut engine = started(probe.clone());
        for (message_type, message_value) in [
            ("option", "full_shape"),
            ("bogus", "value"),
            ("schema", "no-slash"),
            ("deploy", "start"),
        ] {
            probe.inject_notification(RawNotification::new(message_type, message_value));
        }

        let published = sink.drain_notifications(&mut engine);
        assert_eq!(published.len(), 2);
        assert_eq!(sub.try_recv().map(|e| e.event_type()), Some("OptionChanged"));
        assert_eq!(sub.try_recv().map(|e| e.event_type()), Some("DeployStateChanged"));
        assert!(sub.try_recv().is_none());
        assert!(sink.cache().status().is_full_shape);
    }

    #[test]
    fn test_schema_notification_updates_status_only() {
        let (sink, _sub) = sink();
        let mut engine = started(EngineProbe::new());
        engine.process_key(0x6e, 0).unwrap();
        sink.respond(&mut engine).unwrap();

        engine.select_schema("bopomofo").unwrap();
        sink.drain_notifications(&mut engine);

        let snap = sink.cache().snapshot();
        assert_eq!(snap.status.schema_id, "bopomofo");
        assert_eq!(snap.status.schema_name, "Bopomofo");
        // Status comes from the engine, composition still from the previous turn
        assert!(!snap.status.is_composing);
        assert_eq!(snap.raw_input, "n");
    }

    #[test]
    fn test_schema_change_resyncs_status_from_engine() {
        let (sink, sub) = sink();
        let mut engine = started(EngineProbe::new());
        engine.process_key(0x6e, 0).unwrap();
        sink.respond(&mut engine).unwrap();
        assert!(sink.cache().status().is_composing);
        sub.try_recv();

        engine.set_enabled_schemas(&["bopomofo".to_string()]).unwrap();
        let published = sink.drain_notifications(&mut engine);

        assert_eq!(published.len(), 1);
        assert_eq!(sink.cache().status(), engine.status().unwrap().unwrap());
        assert!(!sink.cache().status().is_composing);
        assert_eq!(sub.try_recv().map(|e| e.event_type()), Some("SchemaChanged"));
    }

    #[test]
    fn test_failed_status_read_falls_back_to_patch() {
        let (sink, _sub) = sink();
        let probe = EngineProbe::new();
        let mut engine = started(probe.clone());
        probe.fail_next("status", "status unavailable");

        sink.publish_notification(
            &mut engine,
            Event::SchemaChanged {
                id: "cangjie5".to_string(),
                name: "Cangjie 5".to_string(),
            },
        );

        let status = sink.cache().status();
        assert_eq!(status.schema_id, "cangjie5");
        assert_eq!(status.schema_name, "Cangjie 5");
    }

    #[test]
    fn test_stored_turn_visible_before_announcement() {
        let (sink, sub) = sink();
        let mut engine = started(EngineProbe::new());
        engine.process_key(0x6e, 0).unwrap();
        let turn = sink.read_turn(&mut engine).unwrap().unwrap();

        sink.store_turn(&turn);
        assert_eq!(sink.cache().raw_input(), "n");
        assert!(sub.try_recv().is_none());

        sink.announce_turn(turn);
        assert_eq!(sub.try_recv().map(|e| e.event_type()), Some("Response"));
    }

    #[test]
    fn test_respond_publishes_response() {
        let (sink, sub) = sink();
        let mut engine = started(EngineProbe::new());
        for c in "nihao ".chars() {
            engine.process_key(c as i32, 0).unwrap();
        }

        assert!(sink.respond(&mut engine).unwrap());
        match sub.try_recv() {
            Some(Event::Response { commit, raw_input, .. }) => {
                assert_eq!(commit, Some(Commit::new("你好")));
                assert!(raw_input.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_withheld_context_drops_response() {
        let (sink, sub) = sink();
        let probe = EngineProbe::new();
        let mut engine = started(probe.clone());
        engine.process_key(0x6e, 0).unwrap();
        probe.withhold_next_context();

        assert!(!sink.respond(&mut engine).unwrap());
        assert!(sub.try_recv().is_none());
        assert!(sink.cache().raw_input().is_empty());
    }

    #[test]
    fn test_turn_has_output() {
        let mut turn = Turn {
            commit: None,
            snapshot: EngineSnapshot::default(),
        };
        assert!(!turn.has_output());
        turn.snapshot.raw_input = "n".to_string();
        assert!(turn.has_output());
        turn.snapshot.raw_input.clear();
        turn.commit = Some(Commit::new("你"));
        assert!(turn.has_output());
    }
}
