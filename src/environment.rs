//! Execution-environment state shared across invocations.
//!
//! A Lambda execution environment is reused for many sequential invocations.
//! Everything that must survive from one invocation to the next lives in an
//! [`ExecutionEnvironment`], which is created once (usually at process start)
//! and handed to every invocation as a [`SharedEnvironment`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::profiling::ProfilerCache;
use crate::ratio::{RatioSnapshot, RatioTracker};

/// Shared handle to an execution environment.
pub type SharedEnvironment = Arc<ExecutionEnvironment>;

/// Environment-wide cold-start flag.
///
/// `true` until the first observation, `false` forever after.
#[derive(Debug)]
pub struct ColdStartRegistry {
    fresh: AtomicBool,
}

impl ColdStartRegistry {
    /// Creates a registry for a fresh environment.
    pub fn new() -> Self {
        Self {
            fresh: AtomicBool::new(true),
        }
    }

    /// Reads the flag and flips it to `false` in one atomic step.
    ///
    /// Only the first caller in the environment's lifetime gets `true`.
    pub fn observe(&self) -> bool {
        self.fresh.swap(false, Ordering::SeqCst)
    }

    /// Returns true if no invocation has been observed yet.
    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::SeqCst)
    }
}

impl Default for ColdStartRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// State owned by one execution environment.
#[derive(Debug)]
pub struct ExecutionEnvironment {
    cold_start: ColdStartRegistry,
    /// One entry per constructed invocation; matches cold starts.
    invocations: RatioTracker<bool>,
    /// One entry per profiling decision; matches enabled decisions.
    profiled: RatioTracker<bool>,
    profiler: ProfilerCache,
}

impl ExecutionEnvironment {
    /// Creates an environment with no profiler available.
    pub fn new() -> Self {
        Self::with_profiler(ProfilerCache::unavailable())
    }

    /// Creates an environment that binds its profiler through `profiler`.
    pub fn with_profiler(profiler: ProfilerCache) -> Self {
        Self {
            cold_start: ColdStartRegistry::new(),
            invocations: RatioTracker::truthy(),
            profiled: RatioTracker::truthy(),
            profiler,
        }
    }

    /// Wraps the environment for sharing across invocations.
    pub fn shared(self) -> SharedEnvironment {
        Arc::new(self)
    }

    /// Registers a newly constructed invocation.
    ///
    /// Returns whether it is the cold start and its 1-based position.
    pub(crate) fn register_invocation(&self) -> (bool, u64) {
        let is_cold_start = self.cold_start.observe();
        let snapshot = self.invocations.increment(&is_cold_start);
        (is_cold_start, snapshot.total)
    }

    /// Records a profiling decision.
    pub(crate) fn record_profiling_decision(&self, enabled: bool) -> RatioSnapshot {
        self.profiled.increment(&enabled)
    }

    /// The cold-start registry.
    pub fn cold_start(&self) -> &ColdStartRegistry {
        &self.cold_start
    }

    /// Invocation counters (`subset` counts cold starts).
    pub fn invocations(&self) -> RatioSnapshot {
        self.invocations.snapshot()
    }

    /// Profiling decision counters (`subset` counts profiled invocations).
    pub fn profiling(&self) -> RatioSnapshot {
        self.profiled.snapshot()
    }

    /// The profiler resource cache.
    pub fn profiler(&self) -> &ProfilerCache {
        &self.profiler
    }
}

impl Default for ExecutionEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_flips_once() {
        let registry = ColdStartRegistry::new();
        assert!(registry.is_fresh());
        assert!(registry.observe());
        assert!(!registry.is_fresh());
        assert!(!registry.observe());
        assert!(!registry.observe());
    }

    #[test]
    fn test_register_invocation_numbers_and_cold_start() {
        let env = ExecutionEnvironment::new();
        let observed: Vec<_> = (0..4).map(|_| env.register_invocation()).collect();

        assert_eq!(observed, vec![(true, 1), (false, 2), (false, 3), (false, 4)]);
        assert_eq!(env.invocations(), RatioSnapshot { total: 4, subset: 1 });
    }

    #[test]
    fn test_profiling_decisions_recorded() {
        let env = ExecutionEnvironment::new();
        env.record_profiling_decision(true);
        env.record_profiling_decision(false);
        let snapshot = env.record_profiling_decision(false);

        assert_eq!(snapshot, RatioSnapshot { total: 3, subset: 1 });
        assert_eq!(env.profiling(), snapshot);
    }

    #[test]
    fn test_environments_are_independent() {
        let first = ExecutionEnvironment::new().shared();
        let second = ExecutionEnvironment::new().shared();

        assert!(first.register_invocation().0);
        assert!(second.register_invocation().0);
        assert!(!first.register_invocation().0);
    }

    #[test]
    fn test_concurrent_registration_has_one_cold_start() {
        let env = ExecutionEnvironment::new().shared();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let env = env.clone();
                std::thread::spawn(move || env.register_invocation().0)
            })
            .collect();
        let cold: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();

        assert_eq!(cold, 1);
        assert_eq!(env.invocations(), RatioSnapshot { total: 16, subset: 1 });
    }
}
