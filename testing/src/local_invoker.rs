//! In-process invoker.
//!
//! [`LocalInvoker`] plays the host platform for a [`Lifecycle`]: it creates a
//! fresh execution environment, assigns a random request id to every
//! invocation, records the response with a [`RecordingCallback`] and honors
//! the "wait for background work" flag the same way the Lambda adapter does.
//!
//! # Example
//!
//! ```
//! use lambda_lifecycle::{BoxError, LifecycleContext, LifecycleOptions};
//! use lambda_lifecycle_testing::LocalInvoker;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let invoker = LocalInvoker::from_processor(
//!     |ctx: LifecycleContext<u32>| async move { Ok::<_, BoxError>(ctx.event() + 1) },
//!     LifecycleOptions::default(),
//! )
//! .unwrap();
//!
//! let first = invoker.invoke(serde_json::json!(1)).await;
//! let second = invoker.invoke(serde_json::json!(2)).await;
//!
//! assert!(first.summary.is_cold_start);
//! assert!(!second.summary.is_cold_start);
//! assert_eq!(second.result().unwrap().unwrap(), 3);
//! # });
//! ```

use std::future::Future;
use std::sync::Arc;

use lambda_lifecycle::{
    BoxError, ErrorObject, ExecutionEnvironment, InvocationContext, InvocationSummary, Lifecycle, LifecycleContext,
    LifecycleError, LifecycleOptions,
};
use serde_json::Value;

use crate::callback::RecordingCallback;
use crate::mock_profiler::MockProfiler;

/// The outcome of one local invocation.
#[derive(Debug)]
pub struct LocalInvocation<R> {
    /// The engine's summary
    pub summary: InvocationSummary,
    /// The callback that received the response
    pub callback: RecordingCallback<R>,
    /// The context the invocation ran with
    pub context: Arc<InvocationContext>,
}

impl<R: Clone> LocalInvocation<R> {
    /// The response the platform accepted, if any.
    pub fn result(&self) -> Option<Result<R, ErrorObject>> {
        self.callback.accepted()
    }
}

/// Runs invocations of a [`Lifecycle`] in-process.
#[derive(Debug, Clone)]
pub struct LocalInvoker<E, R> {
    lifecycle: Lifecycle<E, R>,
}

impl<E, R> LocalInvoker<E, R>
where
    E: serde::de::DeserializeOwned + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Wraps an existing lifecycle.
    pub fn new(lifecycle: Lifecycle<E, R>) -> Self {
        Self { lifecycle }
    }

    /// Builds a lifecycle for `processor` in a fresh environment.
    pub fn from_processor<F, Fut>(processor: F, options: LifecycleOptions) -> Result<Self, LifecycleError>
    where
        F: Fn(LifecycleContext<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        Lifecycle::new(processor, options).map(Self::new)
    }

    /// Builds a lifecycle whose environment profiles with `profiler`.
    pub fn with_profiler<F, Fut>(
        processor: F,
        options: LifecycleOptions,
        profiler: &Arc<MockProfiler>,
    ) -> Result<Self, LifecycleError>
    where
        F: Fn(LifecycleContext<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        let environment = ExecutionEnvironment::with_profiler(profiler.lazy_cache()).shared();
        Lifecycle::builder()
            .processor(processor)
            .options(options)
            .environment(environment)
            .build()
            .map(Self::new)
    }

    /// The wrapped lifecycle.
    pub fn lifecycle(&self) -> &Lifecycle<E, R> {
        &self.lifecycle
    }

    /// Runs one invocation with an accepting callback.
    pub async fn invoke(&self, payload: Value) -> LocalInvocation<R> {
        self.invoke_with(payload, RecordingCallback::new()).await
    }

    /// Runs one invocation with the given callback.
    pub async fn invoke_with(&self, payload: Value, callback: RecordingCallback<R>) -> LocalInvocation<R> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let context = Arc::new(InvocationContext::new(request_id));

        let summary = self.lifecycle.invoke(payload, context.clone(), &callback).await;

        if context.callback_waits_for_empty_event_loop() {
            context.drain_background().await;
        }
        tracing::debug!(request_id = %summary.request_id, "Local invocation finished");

        LocalInvocation {
            summary,
            callback,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_lifecycle::ProfileStrategy;

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let invoker = LocalInvoker::from_processor(
            |ctx: LifecycleContext<Value>| async move { Ok::<_, BoxError>(ctx.request_id().to_string()) },
            LifecycleOptions::default(),
        )
        .unwrap();

        let first = invoker.invoke(Value::Null).await;
        let second = invoker.invoke(Value::Null).await;

        assert_ne!(first.summary.request_id, second.summary.request_id);
        assert_eq!(first.result().unwrap().unwrap(), first.summary.request_id);
    }

    #[tokio::test]
    async fn test_with_profiler_loads_on_first_profiled_invocation() {
        let profiler = Arc::new(MockProfiler::new());
        let invoker = LocalInvoker::with_profiler(
            |_ctx: LifecycleContext<Value>| async move { Ok::<_, BoxError>(()) },
            LifecycleOptions::default().with_profile_strategy(ProfileStrategy::AllColdStarts),
            &profiler,
        )
        .unwrap();

        let cold = invoker.invoke(Value::Null).await;
        let warm = invoker.invoke(Value::Null).await;

        assert!(cold.summary.profile.is_some());
        assert!(warm.summary.profile.is_none());
        assert_eq!(profiler.loads(), 1);
        assert_eq!(profiler.starts(), 1);
    }
}
