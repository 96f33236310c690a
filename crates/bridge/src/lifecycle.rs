//! Per-guest teardown registry.

use crate::registry::SourceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

type Teardown = Box<dyn FnOnce() + Send>;

/// Tracks the teardown procedure for every live guest resource.
///
/// A procedure runs at most once: [`CleanupRegistry::run`] takes the entry
/// out of the map before invoking it, so a second `run` for the same id is a
/// no-op. Procedures themselves must be safe to call when the underlying
/// connection is already gone; each internal close is independently guarded
/// so a partial failure cannot stop the rest.
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Mutex<HashMap<SourceId, Teardown>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the teardown procedure for `source_id`, overwriting any
    /// previous one.
    pub fn set_cleanup(&self, source_id: SourceId, teardown: impl FnOnce() + Send + 'static) {
        self.entries.lock().insert(source_id, Box::new(teardown));
    }

    /// Invoke and discard the stored procedure. No-op for an unknown id.
    pub fn run(&self, source_id: &SourceId) {
        let teardown = self.entries.lock().remove(source_id);
        if let Some(teardown) = teardown {
            debug!(%source_id, "running guest teardown");
            teardown();
        }
    }

    /// Run cleanup for every tracked resource (conversation reset path).
    pub fn run_all(&self) {
        let drained: Vec<(SourceId, Teardown)> = {
            let mut entries = self.entries.lock();
            entries.drain().collect()
        };
        for (source_id, teardown) in drained {
            debug!(%source_id, "running guest teardown");
            teardown();
        }
    }

    /// Source ids with a stored teardown.
    pub fn tracked(&self) -> Vec<SourceId> {
        let mut ids: Vec<SourceId> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_invokes_at_most_once() {
        let registry = CleanupRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        registry.set_cleanup(SourceId::new("g"), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.run(&SourceId::new("g"));
        registry.run(&SourceId::new("g"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_unknown_id_is_noop() {
        let registry = CleanupRegistry::new();
        registry.run(&SourceId::new("missing"));
    }

    #[test]
    fn set_cleanup_overwrites() {
        let registry = CleanupRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        registry.set_cleanup(SourceId::new("g"), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = count.clone();
        registry.set_cleanup(SourceId::new("g"), move || {
            c.fetch_add(10, Ordering::SeqCst);
        });

        registry.run(&SourceId::new("g"));
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn run_all_drains_everything() {
        let registry = CleanupRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        for id in ["a", "b", "c"] {
            let c = count.clone();
            registry.set_cleanup(SourceId::new(id), move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(registry.tracked().len(), 3);
        registry.run_all();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(registry.tracked().is_empty());
        registry.run_all();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
