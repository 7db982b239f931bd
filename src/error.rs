//! Error types for the invocation lifecycle engine.
//!
//! [`LifecycleError`] covers every failure the engine can route into the
//! response path, plus configuration errors raised while building a
//! [`Lifecycle`](crate::Lifecycle). [`ProfilingError`] is internal to the
//! profiling teardown and never reaches the platform callback.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error type returned by processing functions and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for the lifecycle engine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Invalid or incomplete configuration, raised by `build()`.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing what is wrong
        message: String,
    },

    /// The init stage failed (for example, the payload did not decode).
    #[error("Initialization error: {message}")]
    Initialization {
        /// Error message describing what went wrong
        message: String,
    },

    /// The processing function returned an error.
    #[error("{message}")]
    Processing {
        /// Error message from the processing function
        message: String,
        /// Short type name reported alongside the message
        error_type: String,
    },

    /// The processing function panicked.
    #[error("Processing panicked: {message}")]
    Panic {
        /// The panic payload, if it was a string
        message: String,
    },

    /// Delivering a response to the platform callback failed.
    #[error("Delivery error (attempt {attempt}): {message}")]
    Delivery {
        /// Error message describing the delivery failure
        message: String,
        /// The 1-based delivery attempt that failed
        attempt: u32,
    },
}

impl LifecycleError {
    /// Creates a new Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new Initialization error.
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    /// Creates a new Processing error with the generic `ProcessingError` type.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            error_type: "ProcessingError".to_string(),
        }
    }

    /// Creates a new Delivery error for the given attempt.
    pub fn delivery(attempt: u32, message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
            attempt,
        }
    }

    /// Returns true if this is a Configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns true if this is a Delivery error.
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery { .. })
    }
}

impl From<BoxError> for LifecycleError {
    fn from(error: BoxError) -> Self {
        Self::Processing {
            message: error.to_string(),
            error_type: "ProcessingError".to_string(),
        }
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(error: serde_json::Error) -> Self {
        Self::Initialization {
            message: format!("Failed to decode invocation payload: {}", error),
        }
    }
}

/// Errors raised while acquiring or running the profiler.
///
/// These are logged and swallowed by the engine; profiling never changes the
/// business outcome of an invocation.
#[derive(Debug, Error)]
pub enum ProfilingError {
    /// No profiler loader is configured, or loading the bindings failed.
    #[error("Profiler unavailable: {0}")]
    Unavailable(String),

    /// The profiler refused to start.
    #[error("Failed to start profiling: {0}")]
    Start(String),

    /// The profiler failed to stop or produce a profile.
    #[error("Failed to stop profiling: {0}")]
    Stop(String),

    /// The profile could not be serialized.
    #[error("Failed to serialize profile: {0}")]
    Serialize(String),

    /// The serialized profile could not be compressed.
    #[error("Failed to compress profile: {0}")]
    Compress(#[from] std::io::Error),

    /// The profiler panicked.
    #[error("Profiler panicked: {0}")]
    Panicked(String),
}

/// Extracts the message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Error object for reporting a failed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error type/name
    #[serde(rename = "ErrorType")]
    pub error_type: String,
    /// The error message
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
}

impl ErrorObject {
    /// Creates a new ErrorObject.
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
        }
    }
}

impl From<&LifecycleError> for ErrorObject {
    fn from(error: &LifecycleError) -> Self {
        match error {
            LifecycleError::Configuration { message } => {
                ErrorObject::new("ConfigurationError", message)
            }
            LifecycleError::Initialization { message } => {
                ErrorObject::new("InitializationError", message)
            }
            LifecycleError::Processing { message, error_type } => {
                ErrorObject::new(error_type, message)
            }
            LifecycleError::Panic { message } => ErrorObject::new("PanicError", message),
            LifecycleError::Delivery { message, .. } => {
                ErrorObject::new("DeliveryError", message)
            }
        }
    }
}
