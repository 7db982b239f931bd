//! Integration tests for the engine's structured logging.

mod common;

use std::sync::Arc;

use lambda_lifecycle::ProfileStrategy;
use lambda_lifecycle_testing::{MockProfiler, RecordingCallback};
use tracing::Level;

use common::*;

#[tokio::test]
async fn test_delivery_failures_are_logged() {
    let (logs, _guard) = capture_logs();
    let profiler = Arc::new(MockProfiler::new());
    let invoker = order_invoker(ProfileStrategy::Never, &profiler);

    invoker
        .invoke_with(order("o-1", 1), RecordingCallback::always_failing())
        .await;

    assert_eq!(logs.messages_at(Level::WARN).len(), 3);
    assert_eq!(
        logs.messages_at(Level::ERROR),
        vec!["Delivery attempts exhausted, handing error to raw callback".to_string()]
    );
}

#[tokio::test]
async fn test_profiler_failure_is_logged_not_raised() {
    let (logs, _guard) = capture_logs();
    let profiler = Arc::new(MockProfiler::new().failing_start());
    let invoker = order_invoker(ProfileStrategy::Always, &profiler);

    let run = invoker.invoke(order("o-2", 1)).await;

    assert!(run.result().unwrap().is_ok());
    assert!(logs
        .messages_at(Level::WARN)
        .contains(&"Profiling requested but could not start".to_string()));
}

#[tokio::test]
async fn test_cold_start_logged_once() {
    let (logs, _guard) = capture_logs();
    let profiler = Arc::new(MockProfiler::new());
    let invoker = order_invoker(ProfileStrategy::Never, &profiler);

    invoker.invoke(order("o-3", 1)).await;
    invoker.invoke(order("o-4", 1)).await;

    let cold_starts = logs
        .messages_at(Level::INFO)
        .into_iter()
        .filter(|m| m == "Cold start")
        .count();
    assert_eq!(cold_starts, 1);
}
