//! # Lambda Lifecycle
//!
//! An invocation lifecycle engine for Lambda-style handlers.
//!
//! A handler is wrapped once in a [`Lifecycle`]. Every invocation then runs
//! the same fixed pipeline: initialize, process, clean up, respond. Cold
//! starts are detected per execution environment, CPU profiling is sampled
//! by a configurable strategy, and the response reaches the platform
//! through a bounded delivery ladder that always ends in the raw callback.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use lambda_lifecycle::{lambda, BoxError, Lifecycle, LifecycleContext, LifecycleOptions, ProfileStrategy};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     id: String,
//! }
//!
//! #[derive(Serialize)]
//! struct Receipt {
//!     id: String,
//!     cold_start: bool,
//! }
//!
//! async fn process(ctx: LifecycleContext<Order>) -> Result<Receipt, BoxError> {
//!     Ok(Receipt {
//!         id: ctx.event().id.clone(),
//!         cold_start: ctx.is_cold_start(),
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lambda_runtime::Error> {
//!     lambda_runtime::tracing::init_default_subscriber();
//!
//!     let options = LifecycleOptions::default()
//!         .with_profile_strategy(ProfileStrategy::Percentage)
//!         .with_profile_percentage(5);
//!
//!     lambda::run(Lifecycle::new(process, options)?).await
//! }
//! ```
//!
//! ## Profiling strategies
//!
//! | Strategy            | Profiles                                              |
//! |---------------------|-------------------------------------------------------|
//! | `ALWAYS`            | every invocation                                      |
//! | `NEVER`             | nothing (default)                                     |
//! | `ALL_COLD_STARTS`   | cold starts only                                      |
//! | `ONE_COLD_ONE_WARM` | the first two invocations of an environment           |
//! | `PERCENTAGE`        | while the profiled share is below the target percent  |
//!
//! A custom `should_profile` predicate in [`LifecycleOptions`] overrides the
//! strategy. Profilers are plugged in through
//! [`ExecutionEnvironment::with_profiler`]; without one, profiling requests are
//! logged and skipped.
//!
//! ## Attribute macro
//!
//! With the default `macros` feature, [`lifecycle_handler`] generates a
//! constructor for a [`Lifecycle`] from an async processing function:
//!
//! ```rust,ignore
//! use lambda_lifecycle::{lifecycle_handler, BoxError, LifecycleContext};
//!
//! #[lifecycle_handler(strategy = "ALL_COLD_STARTS")]
//! async fn echo(ctx: LifecycleContext<String>) -> Result<String, BoxError> {
//!     Ok(ctx.event().clone())
//! }
//!
//! // generated: fn echo_lifecycle() -> Result<Lifecycle<String, String>, LifecycleError>
//! ```

pub mod callback;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod lambda;
pub mod lifecycle;
pub mod profiling;
pub mod ratio;

pub use callback::{InvocationCallback, Response};
pub use config::{
    InvocationSnapshot, LifecycleOptions, ProfileStrategy, ShouldProfileFn, DEFAULT_PROFILE_PERCENTAGE,
    ENV_PROFILE_PERCENTAGE, ENV_PROFILE_STRATEGY, ENV_WAIT_FOR_EVENT_LOOP,
};
pub use context::{InvocationContext, LifecycleContext};
pub use environment::{ColdStartRegistry, ExecutionEnvironment, SharedEnvironment};
pub use error::{BoxError, ErrorObject, LifecycleError, ProfilingError};
pub use lifecycle::{
    DeliveryOutcome, Invocation, InvocationSummary, Lifecycle, LifecycleBuilder, Stage, MAX_DELIVERY_ATTEMPTS,
};
pub use profiling::{
    encode_profile, Compressor, GzipCompressor, Profile, Profiler, ProfilerBindings, ProfilerCache, ProfilerLoader,
    ProfilingSession,
};
pub use ratio::{RatioSnapshot, RatioTracker};

#[cfg(feature = "macros")]
pub use lambda_lifecycle_macros::lifecycle_handler;
