//! Mock profiler for testing.
//!
//! [`MockProfiler`] records every call the engine makes to it, including the
//! calls made on the profiles it hands out, so tests can verify that cleanup
//! stopped, serialized and disposed exactly what it should have.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use lambda_lifecycle::ProfilingSession;
//! use lambda_lifecycle_testing::{MockProfiler, ProfilerCall};
//!
//! let profiler = Arc::new(MockProfiler::new().with_payload(b"samples".to_vec()));
//! let cache = profiler.preloaded_cache();
//!
//! let session = ProfilingSession::start(&cache, "req-1").unwrap();
//! let encoded = session.finish().unwrap();
//! assert!(!encoded.is_empty());
//!
//! assert_eq!(
//!     profiler.get_calls(),
//!     vec![
//!         ProfilerCall::Start("req-1".to_string()),
//!         ProfilerCall::Stop("req-1".to_string()),
//!         ProfilerCall::Serialize,
//!         ProfilerCall::Dispose,
//!     ]
//! );
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lambda_lifecycle::{Profile, Profiler, ProfilerBindings, ProfilerCache, ProfilingError};

/// A call recorded by [`MockProfiler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfilerCall {
    /// `start` was called for the request id
    Start(String),
    /// `stop` was called for the request id
    Stop(String),
    /// A profile was serialized
    Serialize,
    /// A profile was disposed
    Dispose,
}

/// Which profiler operation should fail.
#[derive(Debug, Clone, Copy, Default)]
struct Failures {
    start: bool,
    stop: bool,
    serialize: bool,
    load: bool,
}

/// Mock implementation of [`Profiler`] for testing.
///
/// The mock profiler uses an internal mutex, so it can be shared across
/// tasks behind an `Arc`.
#[derive(Debug)]
pub struct MockProfiler {
    calls: Arc<Mutex<Vec<ProfilerCall>>>,
    payload: Vec<u8>,
    failures: Failures,
    loads: AtomicUsize,
}

impl MockProfiler {
    /// Creates a mock profiler that produces an empty profile.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            payload: Vec::new(),
            failures: Failures::default(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Sets the bytes every profile serializes to.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Makes `start` fail.
    pub fn failing_start(mut self) -> Self {
        self.failures.start = true;
        self
    }

    /// Makes `stop` fail.
    pub fn failing_stop(mut self) -> Self {
        self.failures.stop = true;
        self
    }

    /// Makes profile serialization fail.
    pub fn failing_serialize(mut self) -> Self {
        self.failures.serialize = true;
        self
    }

    /// Makes the lazy loader fail.
    pub fn failing_load(mut self) -> Self {
        self.failures.load = true;
        self
    }

    /// A cache that already holds this profiler.
    pub fn preloaded_cache(self: &Arc<Self>) -> ProfilerCache {
        ProfilerCache::preloaded(ProfilerBindings::new(self.clone()))
    }

    /// A cache that loads this profiler on first use, counting loads.
    pub fn lazy_cache(self: &Arc<Self>) -> ProfilerCache {
        let profiler = self.clone();
        ProfilerCache::lazy(move || {
            profiler.loads.fetch_add(1, Ordering::SeqCst);
            if profiler.failures.load {
                return Err(ProfilingError::Unavailable("mock profiler failed to load".to_string()));
            }
            Ok(ProfilerBindings::new(profiler.clone()))
        })
    }

    /// Number of times the lazy loader ran.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Gets all recorded calls.
    pub fn get_calls(&self) -> Vec<ProfilerCall> {
        self.calls().clone()
    }

    /// Number of `start` calls.
    pub fn starts(&self) -> usize {
        self.count(|call| matches!(call, ProfilerCall::Start(_)))
    }

    /// Number of `stop` calls.
    pub fn stops(&self) -> usize {
        self.count(|call| matches!(call, ProfilerCall::Stop(_)))
    }

    /// Number of disposed profiles.
    pub fn disposals(&self) -> usize {
        self.count(|call| matches!(call, ProfilerCall::Dispose))
    }

    /// Clears all recorded calls.
    pub fn clear_calls(&self) {
        self.calls().clear();
    }

    fn count(&self, predicate: impl Fn(&ProfilerCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, Vec<ProfilerCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: ProfilerCall) {
        self.calls().push(call);
    }
}

impl Default for MockProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler for MockProfiler {
    fn start(&self, request_id: &str) -> Result<(), ProfilingError> {
        self.record(ProfilerCall::Start(request_id.to_string()));
        if self.failures.start {
            return Err(ProfilingError::Start("mock start failure".to_string()));
        }
        Ok(())
    }

    fn stop(&self, request_id: &str) -> Result<Box<dyn Profile>, ProfilingError> {
        self.record(ProfilerCall::Stop(request_id.to_string()));
        if self.failures.stop {
            return Err(ProfilingError::Stop("mock stop failure".to_string()));
        }
        Ok(Box::new(MockProfile {
            calls: self.calls.clone(),
            payload: self.payload.clone(),
            fail_serialize: self.failures.serialize,
        }))
    }
}

/// Profile handed out by [`MockProfiler`].
struct MockProfile {
    calls: Arc<Mutex<Vec<ProfilerCall>>>,
    payload: Vec<u8>,
    fail_serialize: bool,
}

impl MockProfile {
    fn record(&self, call: ProfilerCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

impl Profile for MockProfile {
    fn serialize(&self) -> Result<Vec<u8>, ProfilingError> {
        self.record(ProfilerCall::Serialize);
        if self.fail_serialize {
            return Err(ProfilingError::Serialize("mock serialize failure".to_string()));
        }
        Ok(self.payload.clone())
    }

    fn dispose(self: Box<Self>) {
        self.record(ProfilerCall::Dispose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_lifecycle::ProfilingSession;

    #[test]
    fn test_failing_serialize_still_disposes() {
        let profiler = Arc::new(MockProfiler::new().failing_serialize());
        let cache = profiler.preloaded_cache();

        let session = ProfilingSession::start(&cache, "req-1").unwrap();
        assert!(session.finish().is_err());

        assert_eq!(profiler.stops(), 1);
        assert_eq!(profiler.disposals(), 1);
    }

    #[test]
    fn test_lazy_cache_loads_once() {
        let profiler = Arc::new(MockProfiler::new());
        let cache = profiler.lazy_cache();

        for id in ["a", "b", "c"] {
            ProfilingSession::start(&cache, id).unwrap().finish().unwrap();
        }

        assert_eq!(profiler.loads(), 1);
        assert_eq!(profiler.starts(), 3);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let profiler = Arc::new(MockProfiler::new().failing_load());
        let cache = profiler.lazy_cache();

        assert!(ProfilingSession::start(&cache, "a").is_err());
        assert!(ProfilingSession::start(&cache, "b").is_err());

        assert_eq!(profiler.loads(), 2);
        assert!(!cache.is_loaded());
        assert_eq!(profiler.starts(), 0);
    }

    #[test]
    fn test_clear_calls() {
        let profiler = MockProfiler::new();
        profiler.start("req").unwrap();
        profiler.clear_calls();
        assert!(profiler.get_calls().is_empty());
    }
}
