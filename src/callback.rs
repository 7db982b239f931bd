//! The platform's response callback.

use crate::error::{BoxError, LifecycleError};

/// The outcome handed to the platform callback.
pub type Response<R> = Result<R, LifecycleError>;

/// Delivers an invocation's response to the host platform.
///
/// `deliver` is the regular response path and may fail, for example when the
/// result cannot be serialized. `fail` is the raw primitive the engine falls
/// back to once delivery attempts are exhausted; it must not fail.
pub trait InvocationCallback<R>: Send + Sync {
    /// Delivers a result or an error.
    fn deliver(&self, response: Response<R>) -> Result<(), BoxError>;

    /// Hands an error straight to the platform, bypassing `deliver`.
    fn fail(&self, error: LifecycleError);
}
