//! The invocation lifecycle engine.
//!
//! A [`Lifecycle`] wraps a processing function once; every platform
//! invocation then gets its own [`Invocation`], which runs a fixed pipeline:
//!
//! ```text
//! Created -> Initializing -> Processing -> CleaningUp -> Responding -> Terminated
//!                 |               |                          |
//!                 +---- error ----+----> ErrorResponding ----+--> CallbackFallback
//! ```
//!
//! - **Initializing** decides profiling, starts the profiler if needed, applies
//!   the event-loop option and decodes the payload.
//! - **Processing** runs the processing function on a spawned task, so a panic
//!   becomes an error instead of unwinding through the engine.
//! - **CleaningUp** always runs, exactly once, before any response is
//!   delivered. It stops the profiler and stores the encoded profile.
//! - **Responding** delivers the result or the stage error. A failed delivery
//!   is retried with the delivery error itself, up to
//!   [`MAX_DELIVERY_ATTEMPTS`] attempts in total, after which the error goes to
//!   the callback's raw [`fail`](InvocationCallback::fail) primitive.
//!
//! Running an invocation never returns an error; the [`InvocationSummary`]
//! records how it ended.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lambda_lifecycle::{
//!     BoxError, InvocationCallback, InvocationContext, Lifecycle, LifecycleContext,
//!     LifecycleError, LifecycleOptions, Response,
//! };
//!
//! struct PrintCallback;
//!
//! impl InvocationCallback<String> for PrintCallback {
//!     fn deliver(&self, response: Response<String>) -> Result<(), BoxError> {
//!         println!("{:?}", response);
//!         Ok(())
//!     }
//!     fn fail(&self, error: LifecycleError) {
//!         eprintln!("{}", error);
//!     }
//! }
//!
//! # tokio_test_block_on(async {
//! let lifecycle = Lifecycle::builder()
//!     .processor(|ctx: LifecycleContext<String>| async move {
//!         Ok::<_, BoxError>(format!("hello {}", ctx.event()))
//!     })
//!     .options(LifecycleOptions::default())
//!     .build()
//!     .unwrap();
//!
//! let context = Arc::new(InvocationContext::new("req-1"));
//! let summary = lifecycle
//!     .invoke(serde_json::json!("world"), context, &PrintCallback)
//!     .await;
//! assert!(summary.is_cold_start);
//! assert!(summary.delivery.is_delivered());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::callback::{InvocationCallback, Response};
use crate::config::{InvocationSnapshot, LifecycleOptions};
use crate::context::{InvocationContext, LifecycleContext};
use crate::environment::{ExecutionEnvironment, SharedEnvironment};
use crate::error::{panic_message, BoxError, ErrorObject, LifecycleError};
use crate::profiling::ProfilingSession;

/// Total number of delivery attempts before falling back to the raw callback.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

type ProcessFuture<R> = Pin<Box<dyn Future<Output = Result<R, BoxError>> + Send>>;
type ProcessorFn<E, R> = Arc<dyn Fn(LifecycleContext<E>) -> ProcessFuture<R> + Send + Sync>;

/// Position of an invocation in the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Constructed; cold start observed.
    Created,
    /// Running the init stage.
    Initializing,
    /// Running the processing function.
    Processing,
    /// Tearing down profiling.
    CleaningUp,
    /// Delivering a successful result.
    Responding,
    /// Delivering an error.
    ErrorResponding,
    /// Delivery attempts exhausted; using the raw callback.
    CallbackFallback,
    /// Done.
    Terminated,
}

/// How the response reached the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    /// `deliver` succeeded on the given attempt.
    Delivered {
        /// Number of attempts made, including the successful one
        attempts: u32,
    },
    /// Every attempt failed and the raw callback received the final error.
    Fallback {
        /// Number of failed attempts
        attempts: u32,
    },
}

impl DeliveryOutcome {
    /// Returns true if `deliver` eventually succeeded.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Number of delivery attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Fallback { attempts } => *attempts,
        }
    }
}

/// Record of a finished invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSummary {
    /// The platform request id
    pub request_id: String,
    /// Whether this was the environment's first invocation
    pub is_cold_start: bool,
    /// 1-based position in the environment
    pub invocation_number: u64,
    /// Whether profiling was decided for this invocation
    pub profiling_enabled: bool,
    /// Gzip-compressed, base64-encoded profile, if one was collected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// How the response was delivered
    pub delivery: DeliveryOutcome,
    /// The last error handed to the platform, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Every stage visited, in order
    pub stages: Vec<Stage>,
}

/// A processing function wrapped with its options and execution environment.
///
/// Build one per process with [`Lifecycle::builder`] and call
/// [`invoke`](Lifecycle::invoke) for every platform invocation. Clones share
/// the same environment.
pub struct Lifecycle<E, R> {
    processor: ProcessorFn<E, R>,
    options: Arc<LifecycleOptions>,
    environment: SharedEnvironment,
}

impl<E, R> Clone for Lifecycle<E, R> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            options: self.options.clone(),
            environment: self.environment.clone(),
        }
    }
}

impl<E, R> fmt::Debug for Lifecycle<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("options", &self.options)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl<E, R> Lifecycle<E, R>
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Starts building a lifecycle.
    pub fn builder() -> LifecycleBuilder<E, R> {
        LifecycleBuilder::new()
    }

    /// Wraps `processor` with `options` in a fresh execution environment.
    pub fn new<F, Fut>(processor: F, options: LifecycleOptions) -> Result<Self, LifecycleError>
    where
        F: Fn(LifecycleContext<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        Self::builder().processor(processor).options(options).build()
    }

    /// The resolved options.
    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    /// The execution environment shared by all invocations of this lifecycle.
    pub fn environment(&self) -> &SharedEnvironment {
        &self.environment
    }

    /// Constructs the invocation for one platform request.
    ///
    /// Construction observes the cold-start flag, so the order in which
    /// invocations are prepared decides which one is the cold start.
    pub fn prepare(&self, payload: serde_json::Value, context: Arc<InvocationContext>) -> Invocation<E, R> {
        Invocation::new(self, payload, context)
    }

    /// Prepares and runs one invocation.
    pub async fn invoke(
        &self,
        payload: serde_json::Value,
        context: Arc<InvocationContext>,
        callback: &dyn InvocationCallback<R>,
    ) -> InvocationSummary {
        self.prepare(payload, context).run(callback).await
    }
}

/// Builder for [`Lifecycle`].
pub struct LifecycleBuilder<E, R> {
    processor: Option<ProcessorFn<E, R>>,
    options: LifecycleOptions,
    environment: Option<SharedEnvironment>,
}

impl<E, R> LifecycleBuilder<E, R>
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Creates a builder with default options and no processor.
    pub fn new() -> Self {
        Self {
            processor: None,
            options: LifecycleOptions::default(),
            environment: None,
        }
    }

    /// Sets the processing function.
    pub fn processor<F, Fut>(mut self, processor: F) -> Self
    where
        F: Fn(LifecycleContext<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        let processor: ProcessorFn<E, R> =
            Arc::new(move |ctx: LifecycleContext<E>| -> ProcessFuture<R> { Box::pin(processor(ctx)) });
        self.processor = Some(processor);
        self
    }

    /// Sets the options.
    pub fn options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses an existing execution environment instead of a fresh one.
    pub fn environment(mut self, environment: SharedEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Validates the configuration and builds the lifecycle.
    pub fn build(self) -> Result<Lifecycle<E, R>, LifecycleError> {
        let processor = self
            .processor
            .ok_or_else(|| LifecycleError::configuration("a processing function is required"))?;
        self.options.validate()?;

        Ok(Lifecycle {
            processor,
            options: Arc::new(self.options),
            environment: self
                .environment
                .unwrap_or_else(|| ExecutionEnvironment::new().shared()),
        })
    }
}

impl<E, R> Default for LifecycleBuilder<E, R>
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// One invocation's state.
pub struct Invocation<E, R> {
    processor: ProcessorFn<E, R>,
    options: Arc<LifecycleOptions>,
    environment: SharedEnvironment,
    context: Arc<InvocationContext>,
    payload: Option<serde_json::Value>,
    is_cold_start: bool,
    invocation_number: u64,
    profiling_enabled: bool,
    session: Option<ProfilingSession>,
    profile: Option<String>,
    cleaned_up: bool,
    stages: Vec<Stage>,
}

impl<E, R> Invocation<E, R>
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Send + 'static,
{
    fn new(lifecycle: &Lifecycle<E, R>, payload: serde_json::Value, context: Arc<InvocationContext>) -> Self {
        let (is_cold_start, invocation_number) = lifecycle.environment.register_invocation();
        if is_cold_start {
            tracing::info!(request_id = %context.request_id(), "Cold start");
        }

        Self {
            processor: lifecycle.processor.clone(),
            options: lifecycle.options.clone(),
            environment: lifecycle.environment.clone(),
            context,
            payload: Some(payload),
            is_cold_start,
            invocation_number,
            profiling_enabled: false,
            session: None,
            profile: None,
            cleaned_up: false,
            stages: vec![Stage::Created],
        }
    }

    /// The platform request id.
    pub fn request_id(&self) -> &str {
        self.context.request_id()
    }

    /// Whether this is the environment's first invocation.
    pub fn is_cold_start(&self) -> bool {
        self.is_cold_start
    }

    /// 1-based position of this invocation in the environment.
    pub fn invocation_number(&self) -> u64 {
        self.invocation_number
    }

    /// Whether profiling was decided for this invocation.
    pub fn profiling_enabled(&self) -> bool {
        self.profiling_enabled
    }

    /// The encoded profile, once cleanup has stored one.
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// The current stage.
    pub fn stage(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Created)
    }

    /// Every stage visited so far.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Runs the full pipeline and delivers the response through `callback`.
    pub async fn run(self, callback: &dyn InvocationCallback<R>) -> InvocationSummary {
        let span = tracing::info_span!(
            "invocation",
            request_id = %self.context.request_id(),
            cold_start = self.is_cold_start,
            invocation = self.invocation_number,
        );
        self.run_stages(callback).instrument(span).await
    }

    async fn run_stages(mut self, callback: &dyn InvocationCallback<R>) -> InvocationSummary {
        let outcome = match self.initialize() {
            Ok(event) => self.process(event).await,
            Err(error) => Err(error),
        };
        if let Err(error) = &outcome {
            tracing::debug!(stage = ?self.stage(), error = %error, "Invocation stage failed");
        }

        self.cleanup();
        let (delivery, error) = self.respond(callback, outcome);

        InvocationSummary {
            request_id: self.context.request_id().to_string(),
            is_cold_start: self.is_cold_start,
            invocation_number: self.invocation_number,
            profiling_enabled: self.profiling_enabled,
            profile: self.profile.take(),
            delivery,
            error,
            stages: std::mem::take(&mut self.stages),
        }
    }

    fn initialize(&mut self) -> Result<E, LifecycleError> {
        self.transition(Stage::Initializing);

        let snapshot = InvocationSnapshot {
            request_id: self.context.request_id(),
            is_cold_start: self.is_cold_start,
            invocation_number: self.invocation_number,
            profiling: self.environment.profiling(),
        };
        let enabled = panic::catch_unwind(AssertUnwindSafe(|| self.options.should_profile(&snapshot)))
            .unwrap_or_else(|payload| {
                tracing::warn!(
                    error = %panic_message(payload),
                    "Profiling predicate panicked, not profiling"
                );
                false
            });
        self.environment.record_profiling_decision(enabled);
        self.profiling_enabled = enabled;

        if enabled {
            match ProfilingSession::start(self.environment.profiler(), self.context.request_id()) {
                Ok(session) => {
                    tracing::debug!("Profiling started");
                    self.session = Some(session);
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Profiling requested but could not start");
                }
            }
        }

        if !self.options.wait_for_event_loop {
            self.context.set_callback_waits_for_empty_event_loop(false);
        }

        let payload = self.payload.take().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(payload)?)
    }

    async fn process(&mut self, event: E) -> Result<R, LifecycleError> {
        self.transition(Stage::Processing);

        let ctx = LifecycleContext::new(
            event,
            self.context.clone(),
            self.is_cold_start,
            self.invocation_number,
            self.profiling_enabled,
        );
        let processor = self.processor.clone();
        let task = async move { processor(ctx).await };

        match tokio::spawn(task.in_current_span()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(LifecycleError::from(error)),
            Err(join_error) if join_error.is_panic() => Err(LifecycleError::Panic {
                message: panic_message(join_error.into_panic()),
            }),
            Err(join_error) => Err(LifecycleError::processing(join_error.to_string())),
        }
    }

    /// Runs the cleanup stage. Only the first call has any effect.
    fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        self.transition(Stage::CleaningUp);
        self.stop_profiling();
    }

    /// Stops profiling and stores the encoded profile.
    ///
    /// Does nothing if no profiling session is running, so it is safe to call
    /// more than once or when profiling was never enabled.
    pub fn stop_profiling(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match session.finish() {
            Ok(profile) => {
                tracing::debug!(bytes = profile.len(), "Profile captured");
                self.profile = Some(profile);
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to capture profile");
            }
        }
    }

    fn respond(
        &mut self,
        callback: &dyn InvocationCallback<R>,
        response: Response<R>,
    ) -> (DeliveryOutcome, Option<ErrorObject>) {
        let mut last_error = response.as_ref().err().map(ErrorObject::from);
        let mut response = response;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.transition(if response.is_ok() {
                Stage::Responding
            } else {
                Stage::ErrorResponding
            });

            let delivered = panic::catch_unwind(AssertUnwindSafe(|| callback.deliver(response)))
                .unwrap_or_else(|payload| Err(panic_message(payload).into()));

            let source = match delivered {
                Ok(()) => {
                    self.transition(Stage::Terminated);
                    return (DeliveryOutcome::Delivered { attempts: attempt }, last_error);
                }
                Err(source) => source,
            };

            let error = LifecycleError::delivery(attempt, source.to_string());
            tracing::warn!(
                attempt = attempt,
                max_attempts = MAX_DELIVERY_ATTEMPTS,
                error = %error,
                "Response delivery failed"
            );
            last_error = Some(ErrorObject::from(&error));

            if attempt >= MAX_DELIVERY_ATTEMPTS {
                self.transition(Stage::CallbackFallback);
                tracing::error!(
                    attempts = attempt,
                    error = %error,
                    "Delivery attempts exhausted, handing error to raw callback"
                );
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback.fail(error))) {
                    tracing::error!(error = %panic_message(payload), "Raw callback panicked");
                }
                self.transition(Stage::Terminated);
                return (DeliveryOutcome::Fallback { attempts: attempt }, last_error);
            }

            response = Err(error);
        }
    }

    fn transition(&mut self, next: Stage) {
        tracing::trace!(from = ?self.stage(), to = ?next, "Stage transition");
        self.stages.push(next);
    }
}

impl<E, R> fmt::Debug for Invocation<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("request_id", &self.context.request_id())
            .field("is_cold_start", &self.is_cold_start)
            .field("invocation_number", &self.invocation_number)
            .field("profiling_enabled", &self.profiling_enabled)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}
