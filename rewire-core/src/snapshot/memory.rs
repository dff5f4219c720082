//! In-process snapshot source.
//!
//! Deliveries are queued by the host (or a test) and handed out one per
//! pull. A pull with nothing queued parks the calling thread on a condvar.

use std::collections::{BTreeSet, VecDeque};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::{Snapshot, SnapshotSource};
use crate::config::{ConfigKey, ConfigSet};
use crate::error::SnapshotError;

#[derive(Debug)]
struct Delivery {
    generation: u64,
    snapshot: Snapshot,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Delivery>,
    bootstrap_generation: u64,
    components_generation: u64,
    /// Configs of the last components snapshot handed out, for reloads.
    last_components: Option<ConfigSet>,
    shutdown: bool,
}

/// Snapshot source fed through [`deliver_bootstrap`] and
/// [`deliver_components`].
///
/// [`deliver_bootstrap`]: InMemorySnapshotSource::deliver_bootstrap
/// [`deliver_components`]: InMemorySnapshotSource::deliver_components
#[derive(Debug, Default)]
pub struct InMemorySnapshotSource {
    state: Mutex<State>,
    available: Condvar,
}

impl InMemorySnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a bootstrap snapshot for `generation`.
    pub fn deliver_bootstrap(&self, generation: u64, configs: ConfigSet) {
        self.push(generation, Snapshot::Bootstrap(configs));
    }

    /// Queue a components snapshot for `generation`.
    pub fn deliver_components(&self, generation: u64, configs: ConfigSet) {
        self.push(generation, Snapshot::Components(configs));
    }

    /// Number of queued deliveries not yet pulled.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    fn push(&self, generation: u64, snapshot: Snapshot) {
        let mut state = self.state.lock();
        trace!(
            generation,
            bootstrap = snapshot.is_bootstrap(),
            configs = snapshot.configs().len(),
            "queued snapshot"
        );
        state.queue.push_back(Delivery { generation, snapshot });
        self.available.notify_all();
    }
}

impl SnapshotSource for InMemorySnapshotSource {
    fn get_snapshot(
        &self,
        keys: &BTreeSet<ConfigKey>,
        least_generation: u64,
        restart_on_redeploy: bool,
    ) -> Result<Snapshot, SnapshotError> {
        let mut state = self.state.lock();
        debug!(keys = keys.len(), least_generation, "waiting for snapshot");

        loop {
            if state.shutdown {
                return Err(SnapshotError::Cancelled);
            }

            let frozen = restart_on_redeploy && state.last_components.is_some();
            if !frozen {
                if let Some(delivery) = state.queue.pop_front() {
                    if delivery.generation < least_generation {
                        debug!(
                            generation = delivery.generation,
                            least_generation, "skipping stale snapshot"
                        );
                        continue;
                    }

                    match &delivery.snapshot {
                        Snapshot::Bootstrap(_) => state.bootstrap_generation = delivery.generation,
                        Snapshot::Components(configs) => {
                            state.components_generation = delivery.generation;
                            state.last_components = Some(configs.clone());
                        }
                    }
                    return Ok(delivery.snapshot);
                }
            }

            self.available.wait(&mut state);
        }
    }

    fn bootstrap_generation(&self) -> u64 {
        self.state.lock().bootstrap_generation
    }

    fn components_generation(&self) -> u64 {
        self.state.lock().components_generation
    }

    fn reload(&self, generation: u64) {
        let mut state = self.state.lock();
        match state.last_components.clone() {
            Some(configs) => {
                debug!(generation, "reloading configs");
                state.queue.push_back(Delivery {
                    generation,
                    snapshot: Snapshot::Components(configs),
                });
                self.available.notify_all();
            }
            None => debug!(generation, "nothing to reload"),
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.shutdown {
            debug!("shutting down snapshot source");
            state.shutdown = true;
        }
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn configs(value: u64) -> ConfigSet {
        let mut configs = ConfigSet::new();
        configs.insert(ConfigKey::new("value", "test"), serde_json::json!(value));
        configs
    }

    #[test]
    fn deliveries_come_out_in_order() {
        let source = InMemorySnapshotSource::new();
        source.deliver_bootstrap(1, configs(1));
        source.deliver_components(1, configs(2));

        let keys = BTreeSet::new();
        assert!(source.get_snapshot(&keys, 0, false).unwrap().is_bootstrap());
        assert_eq!(source.bootstrap_generation(), 1);

        let snapshot = source.get_snapshot(&keys, 0, false).unwrap();
        assert_eq!(snapshot, Snapshot::Components(configs(2)));
        assert_eq!(source.components_generation(), 1);
        assert_eq!(source.pending(), 0);
    }

    #[test]
    fn stale_deliveries_are_skipped() {
        let source = InMemorySnapshotSource::new();
        source.deliver_bootstrap(1, configs(1));
        source.deliver_bootstrap(3, configs(3));

        let snapshot = source.get_snapshot(&BTreeSet::new(), 2, false).unwrap();
        assert_eq!(snapshot, Snapshot::Bootstrap(configs(3)));
        assert_eq!(source.bootstrap_generation(), 3);
    }

    #[test]
    fn shutdown_cancels_a_blocked_pull() {
        let source = Arc::new(InMemorySnapshotSource::new());
        let puller = {
            let source = source.clone();
            thread::spawn(move || source.get_snapshot(&BTreeSet::new(), 0, false))
        };

        thread::sleep(Duration::from_millis(20));
        source.shutdown();

        assert!(matches!(puller.join().unwrap(), Err(SnapshotError::Cancelled)));
        assert!(source.is_shut_down());
    }

    #[test]
    fn blocked_pull_wakes_on_delivery() {
        let source = Arc::new(InMemorySnapshotSource::new());
        let puller = {
            let source = source.clone();
            thread::spawn(move || source.get_snapshot(&BTreeSet::new(), 0, false))
        };

        thread::sleep(Duration::from_millis(20));
        source.deliver_bootstrap(4, configs(4));

        let snapshot = puller.join().unwrap().unwrap();
        assert!(snapshot.is_bootstrap());
        assert_eq!(snapshot.configs(), &configs(4));
    }

    #[test]
    fn reload_requeues_last_components() {
        let source = InMemorySnapshotSource::new();
        source.reload(5);
        assert_eq!(source.pending(), 0);

        source.deliver_components(1, configs(7));
        source.get_snapshot(&BTreeSet::new(), 0, false).unwrap();
        source.reload(2);

        assert_eq!(
            source.get_snapshot(&BTreeSet::new(), 0, false).unwrap(),
            Snapshot::Components(configs(7))
        );
        assert_eq!(source.components_generation(), 2);
    }

    #[test]
    fn restart_on_redeploy_freezes_after_components() {
        let source = Arc::new(InMemorySnapshotSource::new());
        source.deliver_components(1, configs(1));
        source.get_snapshot(&BTreeSet::new(), 0, true).unwrap();
        source.deliver_bootstrap(2, configs(2));

        let puller = {
            let source = source.clone();
            thread::spawn(move || source.get_snapshot(&BTreeSet::new(), 0, true))
        };
        thread::sleep(Duration::from_millis(20));
        source.shutdown();

        assert!(matches!(puller.join().unwrap(), Err(SnapshotError::Cancelled)));
        assert_eq!(source.pending(), 1);
    }
}
