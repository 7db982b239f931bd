//! Lambda runtime integration.
//!
//! This module connects a [`Lifecycle`] to `lambda_runtime`. Each Lambda event
//! becomes one invocation whose response travels through a [`ChannelCallback`]
//! back to the runtime.
//!
//! ```rust,no_run
//! use lambda_lifecycle::{lambda, BoxError, Lifecycle, LifecycleContext, LifecycleOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lambda_runtime::Error> {
//!     lambda_runtime::tracing::init_default_subscriber();
//!
//!     let lifecycle = Lifecycle::new(
//!         |ctx: LifecycleContext<serde_json::Value>| async move {
//!             Ok::<_, BoxError>(ctx.event().clone())
//!         },
//!         LifecycleOptions::from_env()?,
//!     )?;
//!
//!     lambda::run(lifecycle).await
//! }
//! ```

use std::sync::{Arc, Mutex};

use lambda_runtime::{service_fn, Diagnostic, LambdaEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::callback::{InvocationCallback, Response};
use crate::context::InvocationContext;
use crate::error::{BoxError, ErrorObject, LifecycleError};
use crate::lifecycle::{InvocationSummary, Lifecycle};

/// Maximum size of a synchronous Lambda response payload (6MB).
pub const MAX_RESPONSE_SIZE: usize = 6 * 1024 * 1024;

/// What the runtime eventually receives for one invocation.
pub type ChannelResponse = Result<Value, ErrorObject>;

/// A failed invocation as reported to `lambda_runtime`.
///
/// Converts into a [`Diagnostic`] carrying the engine's error type, so the
/// platform sees `ProcessingError` or `DeliveryError` rather than a Rust type
/// name.
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .0.error_type, .0.error_message)]
pub struct InvocationFailure(pub ErrorObject);

impl From<InvocationFailure> for Diagnostic {
    fn from(failure: InvocationFailure) -> Self {
        Diagnostic {
            error_type: failure.0.error_type,
            error_message: failure.0.error_message,
        }
    }
}

/// Callback that hands the response to a oneshot channel.
///
/// `deliver` serializes the result with `serde_json`; a serialization failure
/// or an oversized payload is reported as a delivery failure and leaves the
/// channel open for the next attempt. The channel completes at most once.
#[derive(Debug)]
pub struct ChannelCallback {
    sender: Mutex<Option<oneshot::Sender<ChannelResponse>>>,
}

impl ChannelCallback {
    /// Creates a callback and the receiver that observes its response.
    pub fn new() -> (Self, oneshot::Receiver<ChannelResponse>) {
        let (sender, receiver) = oneshot::channel();
        let callback = Self {
            sender: Mutex::new(Some(sender)),
        };
        (callback, receiver)
    }

    /// Returns true once a response has been sent.
    pub fn is_completed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    fn send(&self, response: ChannelResponse) -> Result<(), BoxError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or("response already sent")?;

        sender
            .send(response)
            .map_err(|_| BoxError::from("invocation receiver dropped"))
    }
}

impl<R: Serialize> InvocationCallback<R> for ChannelCallback {
    fn deliver(&self, response: Response<R>) -> Result<(), BoxError> {
        let payload = match response {
            Ok(result) => {
                let json = serde_json::to_value(&result)
                    .map_err(|e| format!("Failed to serialize result: {}", e))?;
                let size = json.to_string().len();
                if size > MAX_RESPONSE_SIZE {
                    return Err(format!(
                        "Response size {} bytes exceeds maximum {} bytes",
                        size, MAX_RESPONSE_SIZE
                    )
                    .into());
                }
                Ok(json)
            }
            Err(error) => Err(ErrorObject::from(&error)),
        };
        self.send(payload)
    }

    fn fail(&self, error: LifecycleError) {
        if let Err(send_error) = self.send(Err(ErrorObject::from(&error))) {
            tracing::error!(
                error = %error,
                send_error = %send_error,
                "Dropping invocation error"
            );
        }
    }
}

/// Runs one Lambda event through `lifecycle` and returns its response.
///
/// Background work spawned during the invocation is awaited before returning
/// unless the invocation cleared the context's wait flag.
pub async fn handle<E, R>(
    lifecycle: &Lifecycle<E, R>,
    event: LambdaEvent<Value>,
) -> Result<Value, InvocationFailure>
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Serialize + Send + 'static,
{
    let (result, _summary) = handle_with_summary(lifecycle, event).await;
    result
}

/// Like [`handle`], but also returns the invocation summary.
pub async fn handle_with_summary<E, R>(
    lifecycle: &Lifecycle<E, R>,
    event: LambdaEvent<Value>,
) -> (Result<Value, InvocationFailure>, InvocationSummary)
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Serialize + Send + 'static,
{
    let (payload, lambda_context) = event.into_parts();
    let context = Arc::new(InvocationContext::from_lambda(&lambda_context));
    let (callback, receiver) = ChannelCallback::new();

    let summary = lifecycle.invoke(payload, context.clone(), &callback).await;

    if context.callback_waits_for_empty_event_loop() {
        context.drain_background().await;
    } else if context.pending_background() > 0 {
        tracing::debug!(
            request_id = %context.request_id(),
            pending = context.pending_background(),
            "Responding without waiting for background tasks"
        );
    }

    let result = match receiver.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(InvocationFailure(error)),
        Err(_) => Err(InvocationFailure(ErrorObject::new(
            "DeliveryError",
            "invocation produced no response",
        ))),
    };
    (result, summary)
}

/// Serves invocations until the runtime shuts down.
///
/// Each summary is logged at debug level.
pub async fn run<E, R>(lifecycle: Lifecycle<E, R>) -> Result<(), lambda_runtime::Error>
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Serialize + Send + 'static,
{
    run_with(lifecycle, |summary| {
        tracing::debug!(
            request_id = %summary.request_id,
            cold_start = summary.is_cold_start,
            profiled = summary.profile.is_some(),
            delivered = summary.delivery.is_delivered(),
            "Invocation finished"
        );
    })
    .await
}

/// Serves invocations, passing every [`InvocationSummary`] to `sink`.
///
/// The sink is where collected profiles leave the process.
pub async fn run_with<E, R, S>(lifecycle: Lifecycle<E, R>, sink: S) -> Result<(), lambda_runtime::Error>
where
    E: DeserializeOwned + Send + Sync + 'static,
    R: Serialize + Send + 'static,
    S: Fn(InvocationSummary) + Send + Sync + 'static,
{
    let sink = Arc::new(sink);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let lifecycle = lifecycle.clone();
        let sink = sink.clone();
        async move {
            let (result, summary) = handle_with_summary(&lifecycle, event).await;
            sink(summary);
            result
        }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleOptions;
    use crate::context::LifecycleContext;
    use crate::lifecycle::DeliveryOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn lambda_event(payload: Value, request_id: &str) -> LambdaEvent<Value> {
        let mut context = lambda_runtime::Context::default();
        context.request_id = request_id.to_string();
        context.deadline = 1_700_000_000_000;
        LambdaEvent::new(payload, context)
    }

    #[tokio::test]
    async fn test_channel_callback_completes_once() {
        let (callback, receiver) = ChannelCallback::new();

        InvocationCallback::<u32>::deliver(&callback, Ok(7)).unwrap();
        assert!(callback.is_completed());
        assert!(InvocationCallback::<u32>::deliver(&callback, Ok(8)).is_err());

        assert_eq!(receiver.await.unwrap().unwrap(), serde_json::json!(7));
    }

    #[tokio::test]
    async fn test_channel_callback_serialization_failure_keeps_channel_open() {
        struct Unserializable;

        impl Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("not today"))
            }
        }

        let (callback, receiver) = ChannelCallback::new();

        let error = InvocationCallback::<Unserializable>::deliver(&callback, Ok(Unserializable)).unwrap_err();
        assert!(error.to_string().contains("not today"));
        assert!(!callback.is_completed());

        InvocationCallback::<Unserializable>::fail(&callback, LifecycleError::delivery(3, "not today"));
        let reported = receiver.await.unwrap().unwrap_err();
        assert_eq!(reported.error_type, "DeliveryError");
    }

    #[tokio::test]
    async fn test_handle_returns_json_response() {
        let lifecycle = Lifecycle::new(
            |ctx: LifecycleContext<Vec<u32>>| async move {
                Ok::<_, BoxError>(ctx.event().iter().sum::<u32>())
            },
            LifecycleOptions::default(),
        )
        .unwrap();

        let response = handle(&lifecycle, lambda_event(serde_json::json!([1, 2, 3]), "req-1"))
            .await
            .unwrap();

        assert_eq!(response, serde_json::json!(6));
    }

    #[tokio::test]
    async fn test_handle_reports_processing_error() {
        let lifecycle = Lifecycle::new(
            |_ctx: LifecycleContext<Value>| async move { Err::<u32, BoxError>("bad input".into()) },
            LifecycleOptions::default(),
        )
        .unwrap();

        let error = handle(&lifecycle, lambda_event(Value::Null, "req-2"))
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "ProcessingError: bad input");
        assert_eq!(
            Diagnostic::from(error),
            Diagnostic {
                error_type: "ProcessingError".to_string(),
                error_message: "bad input".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_response_walks_retry_ladder() {
        let lifecycle = Lifecycle::new(
            |_ctx: LifecycleContext<Value>| async move { Ok::<_, BoxError>("x".repeat(MAX_RESPONSE_SIZE)) },
            LifecycleOptions::default(),
        )
        .unwrap();

        let (result, summary) = handle_with_summary(&lifecycle, lambda_event(Value::Null, "req-5")).await;

        assert_eq!(summary.delivery, DeliveryOutcome::Delivered { attempts: 2 });
        let diagnostic = Diagnostic::from(result.unwrap_err());
        assert_eq!(diagnostic.error_type, "DeliveryError");
        assert!(diagnostic.error_message.contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn test_handle_waits_for_background_work() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let lifecycle = Lifecycle::new(
            move |ctx: LifecycleContext<Value>| {
                let counter = counter.clone();
                async move {
                    ctx.spawn_background(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                    Ok::<_, BoxError>(())
                }
            },
            LifecycleOptions::default(),
        )
        .unwrap();

        let (result, summary) = handle_with_summary(&lifecycle, lambda_event(Value::Null, "req-3")).await;

        assert!(result.is_ok());
        assert_eq!(summary.request_id, "req-3");
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_skips_background_work_when_not_waiting() {
        let lifecycle = Lifecycle::new(
            |ctx: LifecycleContext<Value>| async move {
                ctx.spawn_background(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
                Ok::<_, BoxError>("done")
            },
            LifecycleOptions::default().with_wait_for_event_loop(false),
        )
        .unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            handle(&lifecycle, lambda_event(Value::Null, "req-4")),
        )
        .await
        .expect("handle should not wait for background work")
        .unwrap();

        assert_eq!(response, serde_json::json!("done"));
    }
}
