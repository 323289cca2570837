//! Core SubscriptionEngine implementation.
//!
//! `SubscriptionEngine` is the public facade. Its state lives in
//! `EngineState`, shared by the callback adapter and the renewal task; the
//! lifecycle operations are implemented on it in the sibling modules.

use std::sync::{Arc, OnceLock};

use callback_server::{
    CallbackRouter, CallbackServer, CallbackServerConfig, ContentDelivery, VerificationQuery,
};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};

use super::builder::SubscriptionEngineBuilder;
use super::callback_adapter::EngineCallbacks;
use super::renewal_manager::{RenewalManager, RenewalReport};
use crate::clock::Clock;
use crate::config::SubscriberConfig;
use crate::discovery::{DiscoverOptions, Discoverer, Discovery};
use crate::error::{ProtocolError, Result, SubscriberError};
use crate::hub::{HubClient, HubMode, HubRequest};
use crate::store::{SubscriptionIter, SubscriptionStore};
use crate::token::TokenGenerator;
use crate::types::{
    ContentOutcome, MultiSubscription, SubscribeOptions, Subscription, SubscriptionEvent,
    SubscriptionHandle, SubscriptionInfo, VerificationResponse,
};

/// State shared between the engine facade, the callback adapter and the
/// renewal task.
pub(crate) struct EngineState {
    pub(super) config: SubscriberConfig,
    pub(super) discoverer: Discoverer,
    pub(super) hub_client: Arc<dyn HubClient>,
    pub(super) tokens: Arc<dyn TokenGenerator>,
    pub(super) store: Arc<dyn SubscriptionStore>,
    pub(super) clock: Arc<dyn Clock>,
    /// Public base URL of the callback routes
    pub(super) base_url: OnceLock<String>,
    /// Route registry of the attached callback server, if any
    pub(super) router: OnceLock<Arc<CallbackRouter>>,
    /// Per-callback write locks
    pub(super) locks: DashMap<String, Arc<Mutex<()>>>,
    /// Per-callback event senders
    pub(super) listeners: DashMap<String, mpsc::Sender<SubscriptionEvent>>,
    /// Callbacks with a renewal dispatch in progress
    pub(super) in_flight: DashSet<String>,
    /// `cancel` calls waiting for the hub's unsubscribe verification
    pub(super) cancel_waiters: DashMap<String, Vec<oneshot::Sender<()>>>,
}

impl EngineState {
    pub(super) fn new(
        config: SubscriberConfig,
        discoverer: Discoverer,
        hub_client: Arc<dyn HubClient>,
        tokens: Arc<dyn TokenGenerator>,
        store: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let base_url = OnceLock::new();
        if let Some(configured) = &config.callback_base_url {
            let _ = base_url.set(configured.trim_end_matches('/').to_string());
        }

        Self {
            config,
            discoverer,
            hub_client,
            tokens,
            store,
            clock,
            base_url,
            router: OnceLock::new(),
            locks: DashMap::new(),
            listeners: DashMap::new(),
            in_flight: DashSet::new(),
            cancel_waiters: DashMap::new(),
        }
    }

    /// The write lock for one callback.
    pub(super) fn lock_for(&self, callback: &str) -> Arc<Mutex<()>> {
        self.locks.entry(callback.to_string()).or_default().clone()
    }

    /// Lock a callback and load its record. A callback with no record
    /// leaves no lock entry behind.
    pub(super) async fn lock_record(&self, callback: &str) -> Result<(OwnedMutexGuard<()>, Subscription)> {
        let guard = self.lock_for(callback).lock_owned().await;
        match self.store.get(callback).await {
            Ok(Some(record)) => Ok((guard, record)),
            Ok(None) => {
                drop(guard);
                self.release_lock(callback);
                Err(ProtocolError::UnknownCallback.into())
            }
            Err(e) => {
                drop(guard);
                self.release_lock(callback);
                Err(e.into())
            }
        }
    }

    /// Drop a callback's lock entry unless some task still holds it.
    pub(super) fn release_lock(&self, callback: &str) {
        self.locks.remove_if(callback, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub(super) fn callback_url(&self, callback: &str) -> Result<String> {
        let base = self.base_url.get().ok_or_else(|| {
            SubscriberError::ConfigurationError(
                "No callback base URL: set callback_base_url or call serve()".to_string(),
            )
        })?;
        Ok(format!("{base}/{callback}"))
    }

    pub(super) fn hub_request(&self, record: &Subscription, mode: HubMode) -> Result<HubRequest> {
        let subscribing = mode == HubMode::Subscribe;
        Ok(HubRequest {
            hub: record.hub.clone(),
            mode,
            callback_url: self.callback_url(&record.callback)?,
            topic: record.topic.clone(),
            lease_seconds: record.lease_seconds.filter(|_| subscribing),
            secret: record.secret().filter(|_| subscribing).map(str::to_string),
            params: record.params.clone(),
            headers: record.headers.clone(),
        })
    }

    /// Send an event to the subscription's listener, if it has one.
    ///
    /// Never blocks: a full channel drops the event.
    pub(super) fn emit(&self, callback: &str, event: SubscriptionEvent) {
        let Some(sender) = self.listeners.get(callback).map(|entry| entry.value().clone()) else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(callback, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.listeners.remove_if(callback, |_, sender| sender.is_closed());
            }
        }
    }

    pub(super) fn listen(&self, callback: &str) -> mpsc::Receiver<SubscriptionEvent> {
        let (sender, receiver) = mpsc::channel(self.config.event_buffer_size);
        self.listeners.insert(callback.to_string(), sender);
        receiver
    }

    pub(super) async fn register_route(&self, callback: &str) {
        if let Some(router) = self.router.get() {
            router.register(callback.to_string()).await;
        }
    }

    pub(super) async fn unregister_route(&self, callback: &str) {
        if let Some(router) = self.router.get() {
            router.unregister(callback).await;
        }
    }

    /// Drop every trace of a callback. The caller holds its lock.
    pub(super) async fn forget(&self, callback: &str) -> Result<()> {
        match self.store.delete(callback).await {
            Ok(()) | Err(crate::error::PersistenceError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.unregister_route(callback).await;
        self.listeners.remove(callback);
        self.locks.remove(callback);
        Ok(())
    }

    /// Record that the subscription is cancelled and wake a waiting `cancel`.
    /// The caller holds its lock.
    pub(super) async fn finish_cancellation(&self, record: &Subscription) -> Result<()> {
        self.emit(&record.callback, SubscriptionEvent::Cancelled);
        self.forget(&record.callback).await?;
        if let Some((_, waiters)) = self.cancel_waiters.remove(&record.callback) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
        tracing::info!(callback = %record.callback, topic = %record.topic, "subscription cancelled");
        Ok(())
    }

    pub(super) async fn require(&self, callback: &str) -> Result<Subscription> {
        self.store
            .get(callback)
            .await?
            .ok_or_else(|| ProtocolError::UnknownCallback.into())
    }
}

/// `now + lease`, saturating at the largest representable instant.
pub(super) fn lease_expiry(now: DateTime<Utc>, lease_seconds: u64) -> DateTime<Utc> {
    i64::try_from(lease_seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// WebSub subscription engine.
///
/// Owns the per-subscription state machine: discovery, subscribe requests,
/// verification handshakes, authenticated content delivery, renewal and
/// cancellation. Inbound hub requests arrive either through a callback server
/// started with [`serve`](Self::serve) or by calling
/// [`handle_verification`](Self::handle_verification) and
/// [`handle_content`](Self::handle_content) from an external router.
///
/// # Example
///
/// ```rust,no_run
/// use websub_subscriber::{
///     CallbackServerConfig, SubscriberConfig, SubscribeOptions, SubscriptionEngine, SubscriptionEvent,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = SubscriptionEngine::builder(SubscriberConfig::default()).build()?;
///     let server = engine.serve(CallbackServerConfig::default()).await?;
///     engine.start_renewal().await;
///
///     let mut result = engine
///         .subscribe("https://example.com/feed", SubscribeOptions::new().with_secret())
///         .await?;
///
///     if let Some(handle) = result.subscriptions.first_mut() {
///         while let Some(event) = handle.next_event().await {
///             if let SubscriptionEvent::Content { body, .. } = event {
///                 println!("{} bytes", body.len());
///             }
///         }
///     }
///
///     engine.shutdown().await?;
///     server.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct SubscriptionEngine {
    state: Arc<EngineState>,
    renewal: Mutex<Option<RenewalManager>>,
}

impl SubscriptionEngine {
    pub fn builder(config: SubscriberConfig) -> SubscriptionEngineBuilder {
        SubscriptionEngineBuilder::new(config)
    }

    pub(super) fn from_state(state: EngineState) -> Self {
        Self {
            state: Arc::new(state),
            renewal: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.state.config
    }

    /// Start a callback server that routes hub requests to this engine.
    ///
    /// Unless `callback_base_url` is configured, the server's base URL is
    /// used in `hub.callback`. Every stored callback is routed immediately.
    pub async fn serve(&self, config: CallbackServerConfig) -> Result<CallbackServer> {
        let handler = Arc::new(EngineCallbacks::new(Arc::downgrade(&self.state)));
        let server = CallbackServer::start(config, handler).await?;

        if self.state.router.set(server.router().clone()).is_err() {
            let _ = server.shutdown().await;
            return Err(SubscriberError::ConfigurationError(
                "A callback server is already attached".to_string(),
            ));
        }
        let _ = self.state.base_url.set(server.base_url().to_string());

        for record in SubscriptionIter::snapshot(self.state.store.as_ref()).await? {
            self.state.register_route(&record.callback).await;
        }

        tracing::info!(base_url = %server.base_url(), "serving callbacks");
        Ok(server)
    }

    /// The absolute callback URL for a token.
    pub fn callback_url(&self, callback: &str) -> Result<String> {
        self.state.callback_url(callback)
    }

    /// Run discovery only.
    pub async fn discover(&self, topic_url: &str, options: DiscoverOptions) -> Result<Discovery> {
        Ok(self.state.discoverer.discover(topic_url, options).await?)
    }

    /// Discover the topic's hubs and subscribe at each of them.
    ///
    /// Returns once every hub has accepted (or definitively refused) the
    /// request. Verification is asynchronous: watch each handle for
    /// [`SubscriptionEvent::Validated`], which may never come.
    pub async fn subscribe(&self, topic_url: &str, options: SubscribeOptions) -> Result<MultiSubscription> {
        self.state.subscribe(topic_url, &options).await
    }

    /// Subscribe at a known hub without discovery.
    pub async fn subscribe_via(
        &self,
        hub: &str,
        topic: &str,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        self.state.subscribe_via(hub, topic, &options).await
    }

    /// Answer a hub's verification of intent.
    pub async fn handle_verification(
        &self,
        callback: &str,
        request: VerificationQuery,
    ) -> Result<VerificationResponse> {
        self.state.handle_verification(callback, request).await
    }

    /// Authenticate and deliver pushed content.
    pub async fn handle_content(&self, callback: &str, delivery: ContentDelivery) -> Result<ContentOutcome> {
        self.state.handle_content(callback, delivery).await
    }

    /// Unsubscribe at the hub.
    ///
    /// Waits up to `cancel_grace` for the hub to verify the unsubscribe. If it
    /// does not, or the request fails, the subscription is cancelled locally
    /// anyway; the hub may keep delivering until its lease runs out, and those
    /// deliveries are answered with 404.
    pub async fn cancel(&self, callback: &str) -> Result<()> {
        self.state.cancel(callback).await
    }

    /// Re-request the subscription under the same callback and secret.
    ///
    /// Returns `false` when a renewal for this callback is already in flight.
    pub async fn renew(&self, callback: &str) -> Result<bool> {
        self.state.renew(callback).await
    }

    /// Forget a subscription locally without contacting the hub.
    pub async fn remove(&self, callback: &str) -> Result<()> {
        self.state.remove(callback).await
    }

    pub async fn get(&self, callback: &str) -> Result<Option<SubscriptionInfo>> {
        Ok(self
            .state
            .store
            .get(callback)
            .await?
            .map(SubscriptionInfo::from))
    }

    /// Every stored subscription, from a point-in-time snapshot.
    pub async fn all_subscriptions(&self) -> Result<impl Iterator<Item = SubscriptionInfo>> {
        Ok(SubscriptionIter::snapshot(self.state.store.as_ref())
            .await?
            .map(SubscriptionInfo::from))
    }

    /// Attach a new event receiver, replacing any previous one.
    pub async fn watch(&self, callback: &str) -> Result<mpsc::Receiver<SubscriptionEvent>> {
        self.state.require(callback).await?;
        Ok(self.state.listen(callback))
    }

    /// Restore routing after a restart and re-send requests that were
    /// pending when the process stopped. Returns the number of records seen.
    pub async fn recover(&self) -> Result<usize> {
        self.state.recover().await
    }

    /// Run one renewal and cleanup scan now.
    pub async fn run_renewal_pass(&self) -> Result<RenewalReport> {
        self.state.run_renewal_pass().await
    }

    /// Start the background renewal scanner. Idempotent.
    pub async fn start_renewal(&self) {
        let mut renewal = self.renewal.lock().await;
        if renewal.is_none() {
            *renewal = Some(RenewalManager::start(self.state.clone()));
        }
    }

    /// Stop the background renewal scanner.
    pub async fn shutdown(&self) -> Result<()> {
        let manager = self.renewal.lock().await.take();
        match manager {
            Some(manager) => manager.shutdown().await,
            None => Ok(()),
        }
    }
}
