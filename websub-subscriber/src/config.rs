//! Configuration types for the websub-subscriber crate
//!
//! `SubscriberConfig` controls outbound timeouts, lease defaults, the renewal
//! scanner cadence and the retry budget of the subscription engine.

use std::time::Duration;

use crate::error::SubscriberError;

/// Configuration for the SubscriptionEngine
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Public base URL hubs use to reach the callback routes.
    /// When `None`, the base URL of the callback server started by
    /// `SubscriptionEngine::serve` is used.
    /// Default: None
    pub callback_base_url: Option<String>,

    /// Timeout for each outbound request (discovery fetch, hub POST)
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Lease assumed when a hub verifies without `hub.lease_seconds`
    /// and none was requested
    /// Default: 10 days
    pub default_lease: Duration,

    /// How often the renewal scanner runs
    /// Default: 60 seconds
    pub renewal_check_interval: Duration,

    /// How long a dispatched request may stay unverified before it is re-sent
    /// Default: 5 minutes
    pub verification_timeout: Duration,

    /// Dispatch attempts per request, and unanswered dispatches before a
    /// never-verified subscription is expired
    /// Default: 3
    pub max_retry_attempts: u32,

    /// First backoff delay between dispatch attempts; doubles per attempt
    /// Default: 2 seconds
    pub retry_backoff_base: Duration,

    /// Upper bound of the backoff delay
    /// Default: 60 seconds
    pub retry_backoff_max: Duration,

    /// How long `cancel` waits for the hub's unsubscribe verification
    /// before cancelling locally
    /// Default: 30 seconds
    pub cancel_grace: Duration,

    /// Buffer size of each per-subscription event channel
    /// Default: 64
    pub event_buffer_size: usize,

    /// User-Agent sent on outbound requests
    pub user_agent: String,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            callback_base_url: None,
            request_timeout: Duration::from_secs(10),
            default_lease: Duration::from_secs(10 * 24 * 60 * 60), // 10 days
            renewal_check_interval: Duration::from_secs(60),
            verification_timeout: Duration::from_secs(300), // 5 minutes
            max_retry_attempts: 3,
            retry_backoff_base: Duration::from_secs(2),
            retry_backoff_max: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(30),
            event_buffer_size: 64,
            user_agent: concat!("websub-subscriber/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SubscriberConfig {
    /// Create a new SubscriberConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), SubscriberError> {
        if let Some(base) = &self.callback_base_url {
            let parsed = url::Url::parse(base).map_err(|e| {
                SubscriberError::ConfigurationError(format!("Invalid callback base URL {base}: {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SubscriberError::ConfigurationError(format!(
                    "Callback base URL must be http or https: {base}"
                )));
            }
        }

        if self.request_timeout == Duration::ZERO {
            return Err(SubscriberError::ConfigurationError(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.default_lease == Duration::ZERO {
            return Err(SubscriberError::ConfigurationError(
                "Default lease must be greater than 0".to_string(),
            ));
        }

        if self.renewal_check_interval == Duration::ZERO {
            return Err(SubscriberError::ConfigurationError(
                "Renewal check interval must be greater than 0".to_string(),
            ));
        }

        if self.max_retry_attempts == 0 {
            return Err(SubscriberError::ConfigurationError(
                "Max retry attempts must be greater than 0".to_string(),
            ));
        }

        if self.retry_backoff_base > self.retry_backoff_max {
            return Err(SubscriberError::ConfigurationError(
                "Invalid retry backoff: base must not exceed max".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(SubscriberError::ConfigurationError(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Backoff delay before dispatch attempt `attempt + 1`.
    ///
    /// `base * 2^(attempt-1)`, capped at `retry_backoff_max`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.retry_backoff_max)
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_callback_base_url(mut self, url: impl Into<String>) -> Self {
        self.callback_base_url = Some(url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    pub fn with_renewal_check_interval(mut self, interval: Duration) -> Self {
        self.renewal_check_interval = interval;
        self
    }

    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, base: Duration, max: Duration) -> Self {
        self.max_retry_attempts = attempts;
        self.retry_backoff_base = base;
        self.retry_backoff_max = max;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
