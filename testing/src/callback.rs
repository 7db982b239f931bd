//! Recording platform callback.
//!
//! [`RecordingCallback`] stands in for the host platform. It records every
//! delivery attempt and every raw fallback, and can be scripted to reject
//! the first few deliveries so tests can walk the delivery ladder.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use lambda_lifecycle::{BoxError, ErrorObject, InvocationCallback, LifecycleError, Response};

/// One call to [`InvocationCallback::deliver`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord<R> {
    /// 1-based delivery attempt
    pub attempt: u32,
    /// What was delivered
    pub response: Result<R, ErrorObject>,
    /// Whether the callback accepted the delivery
    pub accepted: bool,
}

impl<R> DeliveryRecord<R> {
    /// Returns true if this delivery carried an error.
    pub fn is_error(&self) -> bool {
        self.response.is_err()
    }
}

/// Callback that records every delivery and fallback.
#[derive(Debug)]
pub struct RecordingCallback<R> {
    reject_first: u32,
    attempts: AtomicU32,
    deliveries: Mutex<Vec<DeliveryRecord<R>>>,
    fallbacks: Mutex<Vec<ErrorObject>>,
}

impl<R> RecordingCallback<R> {
    /// Creates a callback that accepts every delivery.
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    /// Creates a callback that rejects the first `count` deliveries.
    pub fn failing_first(count: u32) -> Self {
        Self {
            reject_first: count,
            attempts: AtomicU32::new(0),
            deliveries: Mutex::new(Vec::new()),
            fallbacks: Mutex::new(Vec::new()),
        }
    }

    /// Creates a callback that rejects every delivery.
    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Number of fallbacks recorded.
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Number of deliveries recorded.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Gets all recorded fallbacks.
    pub fn get_fallbacks(&self) -> Vec<ErrorObject> {
        self.fallbacks.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl<R: Clone> RecordingCallback<R> {
    /// Gets all recorded deliveries.
    pub fn get_deliveries(&self) -> Vec<DeliveryRecord<R>> {
        self.deliveries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// The response of the accepted delivery, if any.
    pub fn accepted(&self) -> Option<Result<R, ErrorObject>> {
        self.deliveries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|record| record.accepted)
            .map(|record| record.response.clone())
    }
}

impl<R> Default for RecordingCallback<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send> InvocationCallback<R> for RecordingCallback<R> {
    fn deliver(&self, response: Response<R>) -> Result<(), BoxError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let accepted = attempt > self.reject_first;

        self.deliveries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(DeliveryRecord {
                attempt,
                response: response.map_err(|error| ErrorObject::from(&error)),
                accepted,
            });

        if accepted {
            Ok(())
        } else {
            Err(format!("platform rejected delivery {}", attempt).into())
        }
    }

    fn fail(&self, error: LifecycleError) {
        self.fallbacks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ErrorObject::from(&error));
    }
}
