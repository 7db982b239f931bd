//! Integration tests for the `#[lifecycle_handler]` attribute macro.

#![cfg(feature = "macros")]

mod common;

use std::sync::Arc;

use lambda_lifecycle::{lifecycle_handler, BoxError, InvocationContext, LifecycleContext, ProfileStrategy};
use lambda_lifecycle_testing::RecordingCallback;

use common::{Order, Receipt};

#[lifecycle_handler(strategy = "one-cold-one-warm", percentage = 35, wait_for_event_loop = false)]
async fn checkout(ctx: LifecycleContext<Order>) -> Result<Receipt, BoxError> {
    Ok(Receipt {
        id: ctx.event().id.clone(),
        total: ctx.event().quantity,
        cold_start: ctx.is_cold_start(),
    })
}

#[lifecycle_handler]
async fn echo(ctx: LifecycleContext<String>) -> Result<String, BoxError> {
    Ok(ctx.event().clone())
}

#[test]
fn test_attribute_properties_applied() {
    let lifecycle = checkout_lifecycle().unwrap();
    let options = lifecycle.options();

    assert_eq!(options.profile_strategy, ProfileStrategy::OneColdOneWarm);
    assert_eq!(options.profile_percentage, 35);
    assert!(!options.wait_for_event_loop);
}

#[tokio::test]
async fn test_generated_lifecycle_runs_function() {
    let lifecycle = echo_lifecycle().unwrap();
    let callback = RecordingCallback::<String>::new();

    let summary = lifecycle
        .invoke(
            serde_json::json!("ping"),
            Arc::new(InvocationContext::new("req-1")),
            &callback,
        )
        .await;

    assert!(summary.is_cold_start);
    assert_eq!(callback.accepted(), Some(Ok("ping".to_string())));
}

#[tokio::test]
async fn test_generated_lifecycle_decodes_event() {
    let lifecycle = checkout_lifecycle().unwrap();
    let callback = RecordingCallback::<Receipt>::new();

    lifecycle
        .invoke(
            common::order("o-1", 4),
            Arc::new(InvocationContext::new("req-2")),
            &callback,
        )
        .await;

    let receipt = callback.accepted().unwrap().unwrap();
    assert_eq!(receipt.total, 4);
    assert!(receipt.cold_start);
}
