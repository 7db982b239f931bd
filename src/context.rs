//! Per-invocation context types.
//!
//! [`InvocationContext`] is the platform side of an invocation: the request id,
//! the "wait for background work" flag and the background tasks spawned during
//! the invocation. [`LifecycleContext`] is what the processing function sees.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

/// Platform-supplied context for one invocation.
pub struct InvocationContext {
    request_id: String,
    deadline_ms: Option<u64>,
    waits_for_empty_event_loop: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl InvocationContext {
    /// Creates a context for `request_id` that waits for background work.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline_ms: None,
            waits_for_empty_event_loop: AtomicBool::new(true),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Builds a context from the `lambda_runtime` invocation context.
    pub fn from_lambda(context: &lambda_runtime::Context) -> Self {
        Self::new(context.request_id.clone()).with_deadline_ms(context.deadline)
    }

    /// Sets the invocation deadline in epoch milliseconds.
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// The platform request id.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The invocation deadline in epoch milliseconds, if known.
    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Whether the response waits for outstanding background work.
    pub fn callback_waits_for_empty_event_loop(&self) -> bool {
        self.waits_for_empty_event_loop.load(Ordering::SeqCst)
    }

    /// Sets whether the response waits for outstanding background work.
    pub fn set_callback_waits_for_empty_event_loop(&self, wait: bool) {
        self.waits_for_empty_event_loop.store(wait, Ordering::SeqCst);
    }

    /// Spawns background work tied to this invocation.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_background<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles().push(handle);
    }

    /// Number of background tasks that have not been drained yet.
    pub fn pending_background(&self) -> usize {
        self.handles().iter().filter(|h| !h.is_finished()).count()
    }

    /// Waits for every background task spawned so far.
    ///
    /// Tasks spawned while draining are picked up as well.
    pub async fn drain_background(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(error) = handle.await {
                    tracing::warn!(
                        request_id = %self.request_id,
                        error = %error,
                        "Background task failed"
                    );
                }
            }
        }
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("request_id", &self.request_id)
            .field("deadline_ms", &self.deadline_ms)
            .field(
                "waits_for_empty_event_loop",
                &self.callback_waits_for_empty_event_loop(),
            )
            .finish_non_exhaustive()
    }
}

/// The view of an invocation handed to the processing function.
///
/// Cheap to clone; all clones share the same invocation.
pub struct LifecycleContext<E> {
    inner: Arc<LifecycleContextInner<E>>,
}

struct LifecycleContextInner<E> {
    event: E,
    invocation: Arc<InvocationContext>,
    is_cold_start: bool,
    invocation_number: u64,
    profiling_enabled: bool,
}

impl<E> LifecycleContext<E> {
    pub(crate) fn new(
        event: E,
        invocation: Arc<InvocationContext>,
        is_cold_start: bool,
        invocation_number: u64,
        profiling_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleContextInner {
                event,
                invocation,
                is_cold_start,
                invocation_number,
                profiling_enabled,
            }),
        }
    }

    /// The decoded event payload.
    pub fn event(&self) -> &E {
        &self.inner.event
    }

    /// The platform request id.
    pub fn request_id(&self) -> &str {
        self.inner.invocation.request_id()
    }

    /// Whether this is the first invocation of the execution environment.
    pub fn is_cold_start(&self) -> bool {
        self.inner.is_cold_start
    }

    /// 1-based position of this invocation in the execution environment.
    pub fn invocation_number(&self) -> u64 {
        self.inner.invocation_number
    }

    /// Whether this invocation is being profiled.
    pub fn profiling_enabled(&self) -> bool {
        self.inner.profiling_enabled
    }

    /// The platform context.
    pub fn invocation(&self) -> &InvocationContext {
        &self.inner.invocation
    }

    /// Spawns background work tied to this invocation.
    pub fn spawn_background<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.invocation.spawn_background(future);
    }
}

impl<E> Clone for LifecycleContext<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for LifecycleContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleContext")
            .field("event", &self.inner.event)
            .field("request_id", &self.request_id())
            .field("is_cold_start", &self.inner.is_cold_start)
            .field("invocation_number", &self.inner.invocation_number)
            .field("profiling_enabled", &self.inner.profiling_enabled)
            .finish()
    }
}
