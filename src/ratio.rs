//! Running ratio of values matching a predicate.
//!
//! A [`RatioTracker`] counts every value it sees and, separately, the values
//! that match its predicate. The execution environment keeps two of them: one
//! over invocations (matching cold starts) and one over profiling decisions
//! (matching enabled decisions).

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A consistent copy of a tracker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioSnapshot {
    /// Number of values recorded
    pub total: u64,
    /// Number of recorded values that matched the predicate
    pub subset: u64,
}

impl RatioSnapshot {
    /// Returns `subset / total`, or `0.0` when nothing has been recorded.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.subset as f64 / self.total as f64
        }
    }
}

/// Counter pair with a running percentage.
///
/// Both counters sit behind a single mutex so that concurrent increments can
/// never expose `subset > total`.
pub struct RatioTracker<T> {
    counts: Mutex<RatioSnapshot>,
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> RatioTracker<T> {
    /// Creates an empty tracker with the given predicate.
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            counts: Mutex::new(RatioSnapshot::default()),
            predicate: Box::new(predicate),
        }
    }

    /// Records one value and returns the counters after recording it.
    pub fn increment(&self, value: &T) -> RatioSnapshot {
        let matched = (self.predicate)(value);
        let mut counts = self.lock();
        counts.total += 1;
        if matched {
            counts.subset += 1;
        }
        *counts
    }

    /// Fraction of recorded values that matched, in `[0, 1]`.
    ///
    /// Callers comparing against a 0-100 target multiply by 100 first.
    pub fn percentage(&self) -> f64 {
        self.snapshot().percentage()
    }

    /// Number of values recorded.
    pub fn total(&self) -> u64 {
        self.snapshot().total
    }

    /// Number of recorded values that matched the predicate.
    pub fn subset(&self) -> u64 {
        self.snapshot().subset
    }

    /// Returns a consistent copy of both counters.
    pub fn snapshot(&self) -> RatioSnapshot {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RatioSnapshot> {
        // The guarded data is two integers; a poisoned lock still holds valid counts.
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RatioTracker<bool> {
    /// Creates a tracker that counts `true` values.
    pub fn truthy() -> Self {
        Self::new(|value: &bool| *value)
    }
}

impl<T> fmt::Debug for RatioTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RatioTracker")
            .field("total", &snapshot.total)
            .field("subset", &snapshot.subset)
            .finish_non_exhaustive()
    }
}
