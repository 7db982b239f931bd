//! CPU profiling support.
//!
//! The profiler and the compressor are external capabilities, expressed as the
//! [`Profiler`], [`Profile`] and [`Compressor`] traits. They are bound lazily
//! through a [`ProfilerCache`] owned by the execution environment, so an
//! environment that never profiles never pays the cost of loading them.
//!
//! A [`ProfilingSession`] covers one invocation: it is started during the
//! init stage and finished during cleanup, where the profile is serialized,
//! compressed, base64-encoded and then disposed.

use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{panic_message, ProfilingError};

/// A sampling CPU profiler.
pub trait Profiler: Send + Sync {
    /// Begins sampling for the invocation identified by `request_id`.
    fn start(&self, request_id: &str) -> Result<(), ProfilingError>;

    /// Ends sampling for `request_id` and returns the collected profile.
    fn stop(&self, request_id: &str) -> Result<Box<dyn Profile>, ProfilingError>;
}

/// A profile produced by [`Profiler::stop`].
pub trait Profile: Send {
    /// Serializes the profile to its wire format.
    fn serialize(&self) -> Result<Vec<u8>, ProfilingError>;

    /// Releases any native resources held by the profile.
    fn dispose(self: Box<Self>) {}
}

/// Compresses a serialized profile.
pub trait Compressor: Send + Sync {
    /// Returns the compressed form of `data`.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ProfilingError>;
}

/// Gzip compressor backed by `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    /// Creates a compressor with an explicit level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ProfilingError> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }
}

/// The bound profiler and compressor.
#[derive(Clone)]
pub struct ProfilerBindings {
    /// The profiler handle
    pub profiler: Arc<dyn Profiler>,
    /// The compressor applied to serialized profiles
    pub compressor: Arc<dyn Compressor>,
}

impl ProfilerBindings {
    /// Binds a profiler with the default gzip compressor.
    pub fn new(profiler: Arc<dyn Profiler>) -> Self {
        Self {
            profiler,
            compressor: Arc::new(GzipCompressor::default()),
        }
    }

    /// Replaces the compressor.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }
}

impl fmt::Debug for ProfilerBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilerBindings").finish_non_exhaustive()
    }
}

/// Loads the profiler bindings on first use.
pub type ProfilerLoader = Arc<dyn Fn() -> Result<ProfilerBindings, ProfilingError> + Send + Sync>;

/// Lazily populated, environment-wide cache of profiler bindings.
///
/// `None` in the slot means "not loaded yet". A failed load leaves the slot
/// empty, so a later profiled invocation tries again.
pub struct ProfilerCache {
    loader: Option<ProfilerLoader>,
    bindings: Mutex<Option<Arc<ProfilerBindings>>>,
}

impl ProfilerCache {
    /// A cache with no loader; profiling requests are logged and skipped.
    pub fn unavailable() -> Self {
        Self {
            loader: None,
            bindings: Mutex::new(None),
        }
    }

    /// A cache that calls `loader` the first time bindings are needed.
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<ProfilerBindings, ProfilingError> + Send + Sync + 'static,
    {
        Self {
            loader: Some(Arc::new(loader)),
            bindings: Mutex::new(None),
        }
    }

    /// A cache that is already populated.
    pub fn preloaded(bindings: ProfilerBindings) -> Self {
        Self {
            loader: None,
            bindings: Mutex::new(Some(Arc::new(bindings))),
        }
    }

    /// Returns true once bindings have been loaded.
    pub fn is_loaded(&self) -> bool {
        self.slot().is_some()
    }

    /// Returns the cached bindings, loading them if this is the first use.
    pub fn get_or_load(&self) -> Result<Arc<ProfilerBindings>, ProfilingError> {
        let mut slot = self.slot();
        if let Some(bindings) = slot.as_ref() {
            return Ok(bindings.clone());
        }

        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| ProfilingError::Unavailable("no profiler loader configured".to_string()))?;
        let bindings = Arc::new(loader()?);
        tracing::debug!("Profiler bindings loaded");
        *slot = Some(bindings.clone());
        Ok(bindings)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<ProfilerBindings>>> {
        self.bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ProfilerCache {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl fmt::Debug for ProfilerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilerCache")
            .field("has_loader", &self.loader.is_some())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Profiling for a single invocation.
#[derive(Debug)]
pub struct ProfilingSession {
    request_id: String,
    bindings: Arc<ProfilerBindings>,
}

impl ProfilingSession {
    /// Acquires the bindings from `cache` and starts sampling for `request_id`.
    ///
    /// A panic in the loader or the profiler is returned as
    /// [`ProfilingError::Panicked`].
    pub fn start(cache: &ProfilerCache, request_id: impl Into<String>) -> Result<Self, ProfilingError> {
        let request_id = request_id.into();
        let bindings = contain(|| {
            let bindings = cache.get_or_load()?;
            bindings.profiler.start(&request_id)?;
            Ok(bindings)
        })?;
        Ok(Self {
            request_id,
            bindings,
        })
    }

    /// The request id this session samples.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Stops sampling and returns the encoded profile.
    ///
    /// The profile object is disposed whether or not encoding succeeds.
    pub fn finish(self) -> Result<String, ProfilingError> {
        contain(|| {
            let profile = self.bindings.profiler.stop(&self.request_id)?;
            let encoded = encode_profile(profile.as_ref(), self.bindings.compressor.as_ref());
            profile.dispose();
            encoded
        })
    }
}

fn contain<T>(f: impl FnOnce() -> Result<T, ProfilingError>) -> Result<T, ProfilingError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ProfilingError::Panicked(panic_message(payload))))
}

/// Serializes, compresses and base64-encodes a profile.
pub fn encode_profile(profile: &dyn Profile, compressor: &dyn Compressor) -> Result<String, ProfilingError> {
    let serialized = profile.serialize()?;
    let compressed = compressor.compress(&serialized)?;
    Ok(STANDARD.encode(compressed))
}
