//! Core data types: the persisted subscription record and its state machine,
//! subscribe options, and the per-subscription event stream.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::auth::AuthRejection;
use crate::error::SubscriberError;

/// Lifecycle state of a subscription.
///
/// ```text
/// Pending ──verify──▶ Active ──renew──▶ Pending
///    │                  │
///    └──deny──▶ Denied ◀┘  Active ──lease elapsed──▶ Expired
///                          Active ──unsubscribe──▶ Cancelled
/// ```
///
/// Denied and Expired only leave through an explicit renewal, which starts a
/// new Pending cycle under the same callback. Cancelled is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Pending,
    Active,
    Denied,
    Expired,
    Cancelled,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;

        match (self, next) {
            // Verification outcomes; Expired when the lease lapses or the
            // dispatch budget runs out, Cancelled when cancel is forced.
            (Pending, Active | Denied | Expired | Cancelled) => true,
            // Re-verification of the current cycle refreshes the lease.
            (Active, Active) => true,
            (Active, Pending | Cancelled | Expired | Denied) => true,
            (Denied | Expired, Pending | Cancelled) => true,
            _ => false,
        }
    }

    /// States the engine no longer drives forward on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Cancelled)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted subscription, keyed by its callback token.
///
/// The secret is only reachable inside the crate; read APIs hand out
/// [`SubscriptionInfo`] instead.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub callback: String,
    /// Hub last used to (re)request this subscription
    pub hub: String,
    /// Canonical topic URL
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    pub state: SubscriptionState,
    /// Lease requested from the hub; also re-requested on renewal
    pub lease_seconds: Option<u64>,
    /// Set when the hub verifies; survives renewal so content keeps flowing
    /// while the next cycle is pending
    pub expires_at: Option<DateTime<Utc>>,
    pub denied_reason: Option<String>,
    /// Renew automatically once the remaining lease drops to this many seconds
    pub renew_window_secs: Option<u64>,
    /// Extra form parameters sent with every subscribe request
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Extra headers sent with every subscribe request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// When the current cycle's request was last dispatched
    pub requested_at: DateTime<Utc>,
    /// Dispatches of the current cycle not yet answered by a verification
    #[serde(default)]
    pub dispatch_attempts: u32,
    /// Set once `cancel` has sent the unsubscribe request
    #[serde(default)]
    pub cancel_requested_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub(crate) fn new(
        callback: String,
        hub: String,
        topic: String,
        secret: Option<String>,
        options: &SubscribeOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            callback,
            hub,
            topic,
            secret,
            state: SubscriptionState::Pending,
            lease_seconds: options.lease_seconds,
            expires_at: None,
            denied_reason: None,
            renew_window_secs: options.renew_window.map(|w| w.as_secs()),
            params: options.params.clone(),
            headers: options.headers.clone(),
            created_at: now,
            requested_at: now,
            dispatch_attempts: 0,
            cancel_requested_at: None,
        }
    }

    pub(crate) fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn renew_window(&self) -> Option<chrono::Duration> {
        self.renew_window_secs
            .and_then(|secs| chrono::Duration::try_seconds(i64::try_from(secs).ok()?))
    }

    /// Whether the last granted lease is still running at `now`.
    pub fn lease_running(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires| expires > now)
    }

    /// Whether pushed content should reach the subscriber.
    ///
    /// Active subscriptions accept content, and so does a pending renewal
    /// whose previous lease has not run out.
    pub fn accepts_content(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            SubscriptionState::Active => true,
            SubscriptionState::Pending => self.lease_running(now),
            _ => false,
        }
    }

    /// Move to `next`, returning false when the state machine forbids it.
    pub(crate) fn transition(&mut self, next: SubscriptionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next != SubscriptionState::Denied {
            self.denied_reason = None;
        }
        true
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("callback", &self.callback)
            .field("hub", &self.hub)
            .field("topic", &self.topic)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("state", &self.state)
            .field("lease_seconds", &self.lease_seconds)
            .field("expires_at", &self.expires_at)
            .field("denied_reason", &self.denied_reason)
            .field("renew_window_secs", &self.renew_window_secs)
            .field("requested_at", &self.requested_at)
            .field("dispatch_attempts", &self.dispatch_attempts)
            .finish()
    }
}

/// Read-only view of a subscription without its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub callback: String,
    pub hub: String,
    pub topic: String,
    pub state: SubscriptionState,
    pub has_secret: bool,
    pub lease_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub denied_reason: Option<String>,
    pub renew_window_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionInfo {
    fn from(record: &Subscription) -> Self {
        Self {
            callback: record.callback.clone(),
            hub: record.hub.clone(),
            topic: record.topic.clone(),
            state: record.state,
            has_secret: record.has_secret(),
            lease_seconds: record.lease_seconds,
            expires_at: record.expires_at,
            denied_reason: record.denied_reason.clone(),
            renew_window_secs: record.renew_window_secs,
            created_at: record.created_at,
        }
    }
}

impl From<Subscription> for SubscriptionInfo {
    fn from(record: Subscription) -> Self {
        Self::from(&record)
    }
}

/// Options for a new subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Requested lease; the hub may grant a different one
    pub lease_seconds: Option<u64>,
    /// Auto-renew once the remaining lease drops below this window
    pub renew_window: Option<Duration>,
    /// Generate a secret so deliveries are signed
    pub secret: bool,
    /// Extra form parameters for the hub request
    pub params: BTreeMap<String, String>,
    /// Extra headers for the hub request
    pub headers: BTreeMap<String, String>,
    /// Only trust `<link>` elements inside `<head>` during discovery
    pub head_only: bool,
    /// Subscribe at no more than this many of the discovered hubs
    pub max_hubs: Option<usize>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_seconds(mut self, lease_seconds: u64) -> Self {
        self.lease_seconds = Some(lease_seconds);
        self
    }

    pub fn with_renew_window(mut self, window: Duration) -> Self {
        self.renew_window = Some(window);
        self
    }

    pub fn with_secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn head_only(mut self) -> Self {
        self.head_only = true;
        self
    }

    pub fn with_max_hubs(mut self, max_hubs: usize) -> Self {
        self.max_hubs = Some(max_hubs);
        self
    }
}

/// Lifecycle notifications for a single subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The hub confirmed the subscription (again, after a renewal)
    Validated { expires_at: DateTime<Utc> },
    /// The hub refused or revoked the subscription
    Denied { reason: Option<String> },
    /// Authenticated (or unsigned, when no secret is set) content
    Content {
        content_type: Option<String>,
        body: Bytes,
    },
    /// A delivery that failed authentication and was discarded
    ContentRejected { reason: AuthRejection },
    /// A renewal request has been dispatched
    Renewing,
    /// The lease ran out or the hub never answered
    Expired,
    /// The subscription is gone
    Cancelled,
}

/// A subscription at one hub together with its event stream.
#[derive(Debug)]
pub struct SubscriptionHandle {
    pub info: SubscriptionInfo,
    pub events: mpsc::Receiver<SubscriptionEvent>,
}

impl SubscriptionHandle {
    pub fn callback(&self) -> &str {
        &self.info.callback
    }

    /// Wait for the next event; `None` once the engine drops the subscription.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }
}

/// Result of subscribing to a topic at every advertised hub.
#[derive(Debug)]
pub struct MultiSubscription {
    /// Canonical topic URL
    pub topic: String,
    /// One entry per hub that accepted the request
    pub subscriptions: Vec<SubscriptionHandle>,
    /// Hubs that failed every attempt, with the final error
    pub failed: Vec<(String, SubscriberError)>,
}

impl MultiSubscription {
    pub fn callbacks(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.callback()).collect()
    }
}

/// What `handle_verification` answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResponse {
    /// Echo this challenge verbatim with a 2xx status
    Challenge(String),
    /// Acknowledge with an empty 2xx response
    Acknowledged,
}

/// What happened to a content delivery. The hub is acknowledged in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentOutcome {
    /// Passed to the subscription's event stream
    Delivered,
    /// Authentication failed; discarded
    Rejected(AuthRejection),
    /// The subscription is not accepting content in this state; discarded
    Ignored(SubscriptionState),
}
