//! StateCache - atomically replaced engine snapshots

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CandidateMenu, Composition, Context, Status};

/// One consistent view of engine-derived state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub status: Status,
    pub composition: Composition,
    pub menu: CandidateMenu,
    pub raw_input: String,
}

impl EngineSnapshot {
    /// Build a snapshot from a context/status pair read in the same turn
    pub fn from_parts(context: Context, status: Status) -> Self {
        Self {
            status,
            composition: context.composition,
            menu: context.menu,
            raw_input: context.input,
        }
    }
}

/// Lock-free cache of the latest [`EngineSnapshot`]
#[derive(Default)]
pub struct StateCache {
    snap: ArcSwap<EngineSnapshot>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snap.load_full()
    }

    pub fn status(&self) -> Status {
        self.snap.load().status.clone()
    }

    pub fn composition(&self) -> Composition {
        self.snap.load().composition.clone()
    }

    pub fn menu(&self) -> CandidateMenu {
        self.snap.load().menu.clone()
    }

    pub fn raw_input(&self) -> String {
        self.snap.load().raw_input.clone()
    }

    /// Replace the whole group after a consolidated refresh
    pub fn apply_response(&self, snapshot: EngineSnapshot) {
        debug!(schema_id = %snapshot.status.schema_id, raw_input = %snapshot.raw_input, "StateCache::apply_response");
        self.snap.store(Arc::new(snapshot));
    }

    /// Replace only the status, keeping composition, menu and raw input
    pub fn apply_status<F>(&self, update: F)
    where
        F: Fn(&Status) -> Status,
    {
        self.snap.rcu(|current| {
            let mut next = EngineSnapshot::clone(current);
            next.status = update(&current.status);
            next
        });
    }

    /// Back to defaults when a new engine instance is created
    pub fn reset(&self) {
        debug!("StateCache::reset: called");
        self.snap.store(Arc::new(EngineSnapshot::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandidateItem;

    fn composing_snapshot() -> EngineSnapshot {
        EngineSnapshot {
            status: Status {
                schema_id: "luna_pinyin".to_string(),
                is_composing: true,
                ..Default::default()
            },
            composition: Composition {
                preedit: "ni".to_string(),
                length: 2,
                cursor_pos: 2,
                ..Default::default()
            },
            menu: CandidateMenu {
                page_size: 5,
                candidates: vec![CandidateItem::new("你", "")],
                ..Default::default()
            },
            raw_input: "ni".to_string(),
        }
    }

    #[test]
    fn test_new_cache_is_default() {
        let cache = StateCache::new();
        assert_eq!(*cache.snapshot(), EngineSnapshot::default());
    }

    #[test]
    fn test_apply_response_replaces_group() {
        let cache = StateCache::new();
        cache.apply_response(composing_snapshot());
        assert_eq!(cache.raw_input(), "ni");
        assert_eq!(cache.composition().preedit, "ni");
        assert!(cache.status().is_composing);
        assert_eq!(cache.menu().candidates.len(), 1);
    }

    #[test]
    fn test_apply_status_keeps_composition() {
        let cache = StateCache::new();
        cache.apply_response(composing_snapshot());
        cache.apply_status(|s| s.with_flag("ascii_mode", true));

        let snap = cache.snapshot();
        assert!(snap.status.is_ascii_mode);
        assert_eq!(snap.status.schema_id, "luna_pinyin");
        assert_eq!(snap.raw_input, "ni");
        assert_eq!(snap.composition.preedit, "ni");
    }

    #[test]
    fn test_old_snapshot_is_immutable() {
        let cache = StateCache::new();
        cache.apply_response(composing_snapshot());
        let before = cache.snapshot();
        cache.reset();
        assert_eq!(before.raw_input, "ni");
        assert!(cache.raw_input().is_empty());
    }
}
