use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A point-in-time read of a source's cumulative traffic counters.
///
/// Counters are monotonically non-decreasing under normal operation; a
/// decrease means the source restarted and reset them. The timestamp is the
/// source's own clock (the `now` field of its status document), not the
/// local receive time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub taken_at: DateTime<Utc>,
}

/// Derived per-second throughput for one polling cycle.
///
/// Rates are f64 so that small deltas over short intervals are not silently
/// truncated to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateSample {
    pub in_msgs_sec: f64,
    pub out_msgs_sec: f64,
    pub in_bytes_sec: f64,
    pub out_bytes_sec: f64,
}

/// Rate derivation state for a single source.
///
/// Retains the most recent successfully processed snapshot and the sample
/// computed from it. The prior snapshot advances only when a sample is
/// computed (or on first-sample bootstrap), so a failed poll leaves the
/// baseline intact for the next successful cycle.
#[derive(Debug, Default)]
pub struct SourceState {
    prior: Option<Snapshot>,
    last_sample: RateSample,
}

impl SourceState {
    /// Derive the per-second rates for `current` against the retained prior
    /// snapshot, then advance the prior.
    ///
    /// First snapshot: stores the baseline and returns an all-zero sample.
    /// Zero or negative elapsed time (clock jitter, sub-second polling):
    /// returns the previous sample unchanged and keeps the old baseline.
    /// A counter below its prior value (source restart): that rate is 0 for
    /// this cycle while the others compute normally, and the baseline still
    /// advances.
    pub fn advance(&mut self, current: Snapshot) -> RateSample {
        let Some(prior) = self.prior else {
            self.prior = Some(current);
            self.last_sample = RateSample::default();
            return self.last_sample;
        };

        let elapsed = (current.taken_at - prior.taken_at).num_seconds();
        if elapsed <= 0 {
            return self.last_sample;
        }

        let sample = RateSample {
            in_msgs_sec: per_second(prior.in_msgs, current.in_msgs, elapsed),
            out_msgs_sec: per_second(prior.out_msgs, current.out_msgs, elapsed),
            in_bytes_sec: per_second(prior.in_bytes, current.in_bytes, elapsed),
            out_bytes_sec: per_second(prior.out_bytes, current.out_bytes, elapsed),
        };

        self.prior = Some(current);
        self.last_sample = sample;
        sample
    }

    /// Whether a baseline snapshot has been stored for this source.
    pub fn bootstrapped(&self) -> bool {
        self.prior.is_some()
    }
}

/// Rate for one counter pair. A backwards counter yields 0 rather than a
/// negative rate.
fn per_second(prior: u64, current: u64, elapsed: i64) -> f64 {
    match current.checked_sub(prior) {
        Some(delta) => delta as f64 / elapsed as f64,
        None => 0.0,
    }
}

/// Per-source rate tracker shared across concurrent poll tasks.
///
/// The outer map lock is held only to look up or insert an entry; the
/// per-source lock is held only for the synchronous computation. Neither is
/// ever held across an await point, and unrelated sources never contend on
/// the same entry lock.
pub struct RateTracker {
    sources: Mutex<HashMap<String, Arc<Mutex<SourceState>>>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &str) -> Arc<Mutex<SourceState>> {
        let mut sources = self.sources.lock();
        match sources.get(key) {
            Some(entry) => Arc::clone(entry),
            None => {
                let entry = Arc::new(Mutex::new(SourceState::default()));
                sources.insert(key.to_string(), Arc::clone(&entry));
                entry
            }
        }
    }

    /// Compute the rate sample for `key` from `snapshot`, updating the
    /// retained per-source state.
    pub fn compute(&self, key: &str, snapshot: Snapshot) -> RateSample {
        let entry = self.entry(key);
        let mut state = entry.lock();
        state.advance(snapshot)
    }

    /// Number of sources with retained state.
    pub fn tracked_sources(&self) -> usize {
        self.sources.lock().len()
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn snapshot(secs: i64, in_msgs: u64, out_msgs: u64, in_bytes: u64, out_bytes: u64) -> Snapshot {
        Snapshot {
            in_msgs,
            out_msgs,
            in_bytes,
            out_bytes,
            taken_at: Utc.timestamp_opt(secs, 0).single().expect("valid timestamp"),
        }
    }

    #[test]
    fn test_first_snapshot_bootstraps_with_zero_rates() {
        let mut state = SourceState::default();
        let sample = state.advance(snapshot(0, 10, 20, 1000, 2000));

        assert_eq!(sample, RateSample::default());
        assert!(state.bootstrapped());
    }

    #[test]
    fn test_rates_equal_delta_over_elapsed() {
        let mut state = SourceState::default();
        state.advance(snapshot(0, 100, 200, 1000, 4000));
        let sample = state.advance(snapshot(2, 300, 260, 3000, 4000));

        assert_eq!(sample.in_msgs_sec, 100.0);
        assert_eq!(sample.out_msgs_sec, 30.0);
        assert_eq!(sample.in_bytes_sec, 1000.0);
        assert_eq!(sample.out_bytes_sec, 0.0);
    }

    #[test]
    fn test_rates_are_non_negative_for_monotonic_input() {
        let mut state = SourceState::default();
        let mut counters = (0u64, 0u64, 0u64, 0u64);

        for step in 0..20i64 {
            counters.0 += 17 * step as u64;
            counters.1 += 3;
            counters.2 += 4096;
            counters.3 += 1;

            let sample = state.advance(snapshot(
                step * 2,
                counters.0,
                counters.1,
                counters.2,
                counters.3,
            ));

            assert!(sample.in_msgs_sec >= 0.0);
            assert!(sample.out_msgs_sec >= 0.0);
            assert!(sample.in_bytes_sec >= 0.0);
            assert!(sample.out_bytes_sec >= 0.0);
        }
    }

    #[test]
    fn test_fractional_rates_are_not_truncated() {
        let mut state = SourceState::default();
        state.advance(snapshot(0, 0, 0, 0, 0));
        let sample = state.advance(snapshot(4, 2, 0, 3, 0));

        assert_eq!(sample.in_msgs_sec, 0.5);
        assert_eq!(sample.in_bytes_sec, 0.75);
    }

    #[test]
    fn test_identical_timestamp_returns_previous_sample() {
        let mut state = SourceState::default();
        state.advance(snapshot(0, 100, 100, 100, 100));
        let first = state.advance(snapshot(2, 300, 300, 300, 300));

        // Same timestamp again: no division, no state corruption.
        let repeat = state.advance(snapshot(2, 500, 500, 500, 500));
        assert_eq!(repeat, first);

        // The baseline is still the t=2 snapshot, not the t=2 repeat.
        let next = state.advance(snapshot(4, 500, 500, 500, 500));
        assert_eq!(next.in_msgs_sec, 100.0);
    }

    #[test]
    fn test_backwards_timestamp_keeps_baseline() {
        let mut state = SourceState::default();
        state.advance(snapshot(10, 100, 100, 100, 100));
        let sample = state.advance(snapshot(8, 500, 500, 500, 500));

        assert_eq!(sample, RateSample::default());

        let next = state.advance(snapshot(12, 300, 300, 300, 300));
        assert_eq!(next.in_bytes_sec, 100.0);
    }

    #[test]
    fn test_counter_reset_zeroes_only_affected_rate() {
        let mut state = SourceState::default();
        state.advance(snapshot(0, 1000, 1000, 1000, 1000));

        // in_msgs went backwards (source restart); the rest kept growing.
        let sample = state.advance(snapshot(2, 10, 1200, 3000, 1400));

        assert_eq!(sample.in_msgs_sec, 0.0);
        assert_eq!(sample.out_msgs_sec, 100.0);
        assert_eq!(sample.in_bytes_sec, 1000.0);
        assert_eq!(sample.out_bytes_sec, 200.0);

        // Baseline advanced to the post-reset snapshot.
        let next = state.advance(snapshot(4, 110, 1400, 5000, 1600));
        assert_eq!(next.in_msgs_sec, 50.0);
    }

    #[test]
    fn test_bootstrap_scenario_thousand_bytes_per_second() {
        let tracker = RateTracker::new();

        let first = tracker.compute("http://a:8222", snapshot(0, 0, 0, 1000, 0));
        assert_eq!(first, RateSample::default());

        let second = tracker.compute("http://a:8222", snapshot(2, 0, 0, 3000, 0));
        assert_eq!(second.in_bytes_sec, 1000.0);
    }

    #[test]
    fn test_tracker_keeps_sources_independent() {
        let tracker = RateTracker::new();

        tracker.compute("a", snapshot(0, 0, 0, 1000, 0));
        tracker.compute("b", snapshot(0, 0, 0, 9000, 0));

        let a = tracker.compute("a", snapshot(2, 0, 0, 2000, 0));
        let b = tracker.compute("b", snapshot(4, 0, 0, 9400, 0));

        assert_eq!(a.in_bytes_sec, 500.0);
        assert_eq!(b.in_bytes_sec, 100.0);
        assert_eq!(tracker.tracked_sources(), 2);
    }
}
