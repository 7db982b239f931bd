//! Testing utilities for lambda-lifecycle
//!
//! This crate provides test doubles for the capabilities the lifecycle engine
//! depends on, plus an in-process invoker.
//!
//! # Features
//!
//! - **MockProfiler**: records profiler, profile and loader calls; can fail any step
//! - **RecordingCallback**: records deliveries and fallbacks; can reject deliveries
//! - **LocalInvoker**: runs invocations in a fresh environment with random request ids
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lambda_lifecycle::{BoxError, LifecycleContext, LifecycleOptions, ProfileStrategy};
//! use lambda_lifecycle_testing::{LocalInvoker, MockProfiler, RecordingCallback};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let profiler = Arc::new(MockProfiler::new());
//! let invoker = LocalInvoker::with_profiler(
//!     |_ctx: LifecycleContext<serde_json::Value>| async move { Ok::<_, BoxError>("ok") },
//!     LifecycleOptions::default().with_profile_strategy(ProfileStrategy::Always),
//!     &profiler,
//! )
//! .unwrap();
//!
//! let run = invoker
//!     .invoke_with(serde_json::Value::Null, RecordingCallback::failing_first(1))
//!     .await;
//!
//! assert_eq!(run.callback.delivery_count(), 2);
//! assert_eq!(profiler.stops(), 1);
//! # });
//! ```

pub mod callback;
pub mod local_invoker;
pub mod mock_profiler;

pub use callback::{DeliveryRecord, RecordingCallback};
pub use local_invoker::{LocalInvocation, LocalInvoker};
pub use mock_profiler::{MockProfiler, ProfilerCall};
