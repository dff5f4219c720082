//! Config Snapshots
//!
//! The reconciler pulls configuration from a [`SnapshotSource`] in two
//! phases. A bootstrap snapshot carries the container's own `modules` and
//! `components` configs and starts a new generation; a components snapshot
//! carries the per-component configs the new topology reads and ends the
//! pull.
//!
//! Pulls block. A source is shut down from another thread to cancel a
//! pending pull, which then returns [`SnapshotError::Cancelled`].

mod memory;

pub use memory::InMemorySnapshotSource;

use std::collections::BTreeSet;

use crate::config::{ConfigKey, ConfigSet};
use crate::error::SnapshotError;

/// One delivery from a snapshot source.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Module set and topology; starts a new generation.
    Bootstrap(ConfigSet),

    /// Per-component configs for the current topology.
    Components(ConfigSet),
}

impl Snapshot {
    pub fn configs(&self) -> &ConfigSet {
        match self {
            Snapshot::Bootstrap(configs) | Snapshot::Components(configs) => configs,
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Snapshot::Bootstrap(_))
    }
}

/// Blocking source of config snapshots.
pub trait SnapshotSource: Send + Sync {
    /// Block until the next snapshot is available.
    ///
    /// `keys` are the configs the caller currently reads. Deliveries older
    /// than `least_generation` are skipped. With `restart_on_redeploy` set,
    /// nothing is delivered after the first components snapshot; the pull
    /// only returns when the source is shut down.
    fn get_snapshot(
        &self,
        keys: &BTreeSet<ConfigKey>,
        least_generation: u64,
        restart_on_redeploy: bool,
    ) -> Result<Snapshot, SnapshotError>;

    /// Generation of the last bootstrap snapshot returned.
    fn bootstrap_generation(&self) -> u64;

    /// Generation of the last components snapshot returned.
    fn components_generation(&self) -> u64;

    /// Deliver the current configs again, stamped with `generation`.
    fn reload(&self, generation: u64);

    /// Cancel pending and future pulls.
    fn shutdown(&self);
}
