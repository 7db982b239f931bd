//! Shared test utilities for integration tests.
//!
//! This module provides processing functions, fixtures and proptest strategies
//! used across integration tests.

#![allow(dead_code)] // These utilities are used by other integration test files

use std::io::Read;
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use lambda_lifecycle::{BoxError, LifecycleContext, LifecycleOptions, ProfileStrategy};
use lambda_lifecycle_testing::{LocalInvoker, MockProfiler};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub total: u32,
    pub cold_start: bool,
}

pub fn order(id: &str, quantity: u32) -> serde_json::Value {
    serde_json::json!({ "id": id, "quantity": quantity })
}

/// Prices an order at 5 per unit; zero quantities are rejected.
pub async fn price_order(ctx: LifecycleContext<Order>) -> Result<Receipt, BoxError> {
    let order = ctx.event();
    if order.quantity == 0 {
        return Err(format!("order {} has no items", order.id).into());
    }
    Ok(Receipt {
        id: order.id.clone(),
        total: order.quantity * 5,
        cold_start: ctx.is_cold_start(),
    })
}

pub fn order_invoker(strategy: ProfileStrategy, profiler: &Arc<MockProfiler>) -> LocalInvoker<Order, Receipt> {
    LocalInvoker::with_profiler(
        price_order,
        LifecycleOptions::default().with_profile_strategy(strategy),
        profiler,
    )
    .unwrap()
}

/// Decodes a base64 gzip profile back to its serialized bytes.
pub fn decode_profile(encoded: &str) -> Vec<u8> {
    let compressed = STANDARD.decode(encoded).unwrap();
    let mut decoded = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut decoded)
        .unwrap();
    decoded
}

// =============================================================================
// Log capture
// =============================================================================

/// Captured log events, as `(level, message)` pairs.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<(tracing::Level, String)>>>,
}

impl CapturedLogs {
    pub fn messages_at(&self, level: tracing::Level) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message));
    }
}

/// Installs a capturing subscriber for the current thread.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(logs.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

// =============================================================================
// Proptest strategies
// =============================================================================

/// Strategy for generating profile strategies.
pub fn profile_strategy() -> impl Strategy<Value = ProfileStrategy> {
    prop_oneof![
        Just(ProfileStrategy::Always),
        Just(ProfileStrategy::Never),
        Just(ProfileStrategy::AllColdStarts),
        Just(ProfileStrategy::OneColdOneWarm),
        Just(ProfileStrategy::Percentage),
    ]
}
