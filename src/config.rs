//! Configuration for the lifecycle engine.
//!
//! [`LifecycleOptions`] holds everything a [`Lifecycle`](crate::Lifecycle) is
//! configured with. Options start from their defaults and are overridden
//! either in code through the `with_*` methods or from the process
//! environment through [`LifecycleOptions::from_env`].
//!
//! ## Profiling strategies
//!
//! Unless a custom `should_profile` predicate is supplied, the decision to
//! profile an invocation is made by the configured [`ProfileStrategy`]:
//!
//! ```rust
//! use lambda_lifecycle::{LifecycleOptions, ProfileStrategy};
//!
//! // Profile roughly one invocation in five
//! let options = LifecycleOptions::default()
//!     .with_profile_strategy(ProfileStrategy::Percentage)
//!     .with_profile_percentage(20);
//! assert!(options.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::ratio::RatioSnapshot;

/// Environment variable selecting the [`ProfileStrategy`].
pub const ENV_PROFILE_STRATEGY: &str = "LAMBDA_LIFECYCLE_PROFILE_STRATEGY";
/// Environment variable holding the target profiling percentage (0-100).
pub const ENV_PROFILE_PERCENTAGE: &str = "LAMBDA_LIFECYCLE_PROFILE_PERCENTAGE";
/// Environment variable controlling whether responses wait for background work.
pub const ENV_WAIT_FOR_EVENT_LOOP: &str = "LAMBDA_LIFECYCLE_WAIT_FOR_EVENT_LOOP";

/// Default target for [`ProfileStrategy::Percentage`].
pub const DEFAULT_PROFILE_PERCENTAGE: u8 = 10;

/// Number of leading invocations profiled by [`ProfileStrategy::OneColdOneWarm`].
const ONE_COLD_ONE_WARM_LIMIT: u64 = 3;

/// Built-in policies for deciding whether to profile an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileStrategy {
    /// Profile every invocation.
    Always,
    /// Never profile.
    #[default]
    Never,
    /// Profile only the cold start.
    AllColdStarts,
    /// Profile the cold start and the warm invocation right after it.
    OneColdOneWarm,
    /// Keep the profiled share of invocations at the configured percentage.
    ///
    /// An invocation is profiled when the share profiled so far is strictly
    /// below the target, so the running ratio corrects itself over time.
    Percentage,
}

impl ProfileStrategy {
    /// Applies the strategy to one invocation.
    pub fn should_profile(&self, invocation: &InvocationSnapshot<'_>, percentage: u8) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::AllColdStarts => invocation.is_cold_start,
            Self::OneColdOneWarm => invocation.invocation_number < ONE_COLD_ONE_WARM_LIMIT,
            Self::Percentage => {
                invocation.profiling.percentage() * 100.0 < f64::from(percentage)
            }
        }
    }

    /// The canonical configuration name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "ALWAYS",
            Self::Never => "NEVER",
            Self::AllColdStarts => "ALL_COLD_STARTS",
            Self::OneColdOneWarm => "ONE_COLD_ONE_WARM",
            Self::Percentage => "PERCENTAGE",
        }
    }
}

impl fmt::Display for ProfileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileStrategy {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ALWAYS" => Ok(Self::Always),
            "NEVER" | "" => Ok(Self::Never),
            "ALL_COLD_STARTS" => Ok(Self::AllColdStarts),
            "ONE_COLD_ONE_WARM" => Ok(Self::OneColdOneWarm),
            "PERCENTAGE" => Ok(Self::Percentage),
            other => Err(LifecycleError::configuration(format!(
                "unknown profile strategy '{}'",
                other
            ))),
        }
    }
}

/// What a profiling decision gets to see about the invocation.
#[derive(Debug, Clone, Copy)]
pub struct InvocationSnapshot<'a> {
    /// The platform request id
    pub request_id: &'a str,
    /// Whether this is the environment's first invocation
    pub is_cold_start: bool,
    /// 1-based position of this invocation in the environment
    pub invocation_number: u64,
    /// Profiling decisions recorded before this one
    pub profiling: RatioSnapshot,
}

/// Custom profiling predicate.
pub type ShouldProfileFn = Arc<dyn Fn(&InvocationSnapshot<'_>) -> bool + Send + Sync>;

/// Resolved configuration of a [`Lifecycle`](crate::Lifecycle).
#[derive(Clone)]
pub struct LifecycleOptions {
    /// Custom predicate; overrides `profile_strategy` when set.
    pub should_profile: Option<ShouldProfileFn>,
    /// Strategy used when no custom predicate is set.
    pub profile_strategy: ProfileStrategy,
    /// Target for [`ProfileStrategy::Percentage`], 0-100.
    pub profile_percentage: u8,
    /// Whether the response waits for outstanding background work.
    pub wait_for_event_loop: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            should_profile: None,
            profile_strategy: ProfileStrategy::Never,
            profile_percentage: DEFAULT_PROFILE_PERCENTAGE,
            wait_for_event_loop: true,
        }
    }
}

impl LifecycleOptions {
    /// Reads overrides from the process environment.
    ///
    /// Unset variables keep their defaults; malformed values are
    /// configuration errors.
    pub fn from_env() -> Result<Self, LifecycleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LifecycleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(value) = lookup(ENV_PROFILE_STRATEGY) {
            options.profile_strategy = value.parse()?;
        }

        if let Some(value) = lookup(ENV_PROFILE_PERCENTAGE) {
            options.profile_percentage = value.trim().parse().map_err(|_| {
                LifecycleError::configuration(format!(
                    "{} must be an integer between 0 and 100, got '{}'",
                    ENV_PROFILE_PERCENTAGE, value
                ))
            })?;
        }

        if let Some(value) = lookup(ENV_WAIT_FOR_EVENT_LOOP) {
            options.wait_for_event_loop = parse_bool(&value).ok_or_else(|| {
                LifecycleError::configuration(format!(
                    "{} must be a boolean, got '{}'",
                    ENV_WAIT_FOR_EVENT_LOOP, value
                ))
            })?;
        }

        options.validate()?;
        Ok(options)
    }

    /// Sets a custom profiling predicate.
    pub fn with_should_profile<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&InvocationSnapshot<'_>) -> bool + Send + Sync + 'static,
    {
        self.should_profile = Some(Arc::new(predicate));
        self
    }

    /// Sets the profiling strategy.
    pub fn with_profile_strategy(mut self, strategy: ProfileStrategy) -> Self {
        self.profile_strategy = strategy;
        self
    }

    /// Sets the target percentage for [`ProfileStrategy::Percentage`].
    pub fn with_profile_percentage(mut self, percentage: u8) -> Self {
        self.profile_percentage = percentage;
        self
    }

    /// Sets whether responses wait for outstanding background work.
    pub fn with_wait_for_event_loop(mut self, wait: bool) -> Self {
        self.wait_for_event_loop = wait;
        self
    }

    /// Checks option ranges.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.profile_percentage > 100 {
            return Err(LifecycleError::configuration(format!(
                "profile_percentage must be between 0 and 100, got {}",
                self.profile_percentage
            )));
        }
        Ok(())
    }

    /// Decides whether to profile the given invocation.
    pub fn should_profile(&self, invocation: &InvocationSnapshot<'_>) -> bool {
        match &self.should_profile {
            Some(predicate) => predicate(invocation),
            None => self
                .profile_strategy
                .should_profile(invocation, self.profile_percentage),
        }
    }
}

impl fmt::Debug for LifecycleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOptions")
            .field("should_profile", &self.should_profile.is_some())
            .field("profile_strategy", &self.profile_strategy)
            .field("profile_percentage", &self.profile_percentage)
            .field("wait_for_event_loop", &self.wait_for_event_loop)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
