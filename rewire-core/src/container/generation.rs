//! Config generation bookkeeping.

use crate::error::ReconfigError;

/// Tracks the generations a reconciler has accepted.
///
/// `previous` is the generation of the last graph that was built, bootstrap
/// or components. `least` is the floor passed to the snapshot source: after
/// a failed attempt it is raised past every generation the source has
/// delivered so far, so a broken delivery is never retried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationTracker {
    previous: Option<u64>,
    least: u64,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the last graph built, if any.
    pub fn previous(&self) -> Option<u64> {
        self.previous
    }

    pub fn least_generation(&self) -> u64 {
        self.least
    }

    /// Reject a bootstrap generation that does not advance past the previous
    /// one.
    pub fn check_bootstrap(&self, generation: u64) -> Result<(), ReconfigError> {
        match self.previous {
            Some(previous) if generation <= previous => Err(ReconfigError::OutOfSequence {
                generation,
                previous,
            }),
            _ => Ok(()),
        }
    }

    pub fn record(&mut self, generation: u64) {
        self.previous = Some(generation);
    }

    /// Raise the floor past the generations of a failed attempt.
    pub fn invalidate(&mut self, bootstrap_generation: u64, components_generation: u64) {
        self.least = bootstrap_generation.max(components_generation) + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_bootstrap_is_always_in_sequence() {
        let tracker = GenerationTracker::new();
        assert!(tracker.check_bootstrap(0).is_ok());
        assert_eq!(tracker.previous(), None);
    }

    #[test]
    fn bootstrap_must_advance() {
        let mut tracker = GenerationTracker::new();
        tracker.record(3);

        assert!(matches!(
            tracker.check_bootstrap(3),
            Err(ReconfigError::OutOfSequence {
                generation: 3,
                previous: 3
            })
        ));
        assert!(tracker.check_bootstrap(2).is_err());
        assert!(tracker.check_bootstrap(4).is_ok());
    }

    #[test]
    fn invalidate_skips_past_both_generations() {
        let mut tracker = GenerationTracker::new();
        tracker.invalidate(4, 6);
        assert_eq!(tracker.least_generation(), 7);

        tracker.invalidate(9, 2);
        assert_eq!(tracker.least_generation(), 10);
    }
}
