//! Subscription lifecycle operations driven by the caller.
//!
//! Records are persisted before any request leaves the process, so a crash
//! mid-dispatch leaves a Pending record that `recover` or the renewal scanner
//! will re-send. No lock is held across an outbound request: some hubs verify
//! before answering the subscribe POST.

use futures::future::join_all;
use std::time::Duration;

use super::core::EngineState;
use crate::discovery::DiscoverOptions;
use crate::error::{Result, SubscriberError, TransportError};
use crate::hub::{HubMode, HubRequest};
use crate::store::SubscriptionIter;
use crate::types::{
    MultiSubscription, SubscribeOptions, Subscription, SubscriptionEvent, SubscriptionHandle,
    SubscriptionInfo, SubscriptionState,
};

/// Marks a callback as having a renewal in flight until dropped.
struct InFlight<'a> {
    set: &'a dashmap::DashSet<String>,
    callback: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a dashmap::DashSet<String>, callback: &str) -> Option<Self> {
        set.insert(callback.to_string()).then(|| Self {
            set,
            callback: callback.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.callback);
    }
}

impl EngineState {
    pub(super) async fn subscribe(
        &self,
        topic_url: &str,
        options: &SubscribeOptions,
    ) -> Result<MultiSubscription> {
        if options.max_hubs == Some(0) {
            return Err(SubscriberError::ConfigurationError(
                "max_hubs must be greater than 0".to_string(),
            ));
        }

        let discovery = self
            .discoverer
            .discover(
                topic_url,
                DiscoverOptions {
                    head_only: options.head_only,
                },
            )
            .await?;
        if discovery.hubs.is_empty() {
            return Err(SubscriberError::NoHubs(discovery.topic));
        }

        let hubs: Vec<String> = discovery
            .hubs
            .into_iter()
            .take(options.max_hubs.unwrap_or(usize::MAX))
            .collect();
        let topic = discovery.topic;

        let results = join_all(
            hubs.iter()
                .map(|hub| self.subscribe_via(hub, &topic, options)),
        )
        .await;

        let mut subscriptions = Vec::new();
        let mut failed = Vec::new();
        for (hub, result) in hubs.into_iter().zip(results) {
            match result {
                Ok(handle) => subscriptions.push(handle),
                Err(e) => failed.push((hub, e)),
            }
        }

        if subscriptions.is_empty() {
            if let Some((_, last)) = failed.pop() {
                return Err(last);
            }
        }

        Ok(MultiSubscription {
            topic,
            subscriptions,
            failed,
        })
    }

    pub(super) async fn subscribe_via(
        &self,
        hub: &str,
        topic: &str,
        options: &SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        let callback = self.tokens.callback_token();
        let secret = options.secret.then(|| self.tokens.secret());
        let mut record = Subscription::new(
            callback.clone(),
            hub.to_string(),
            topic.to_string(),
            secret,
            options,
            self.clock.now(),
        );
        record.dispatch_attempts = 1;
        let request = self.hub_request(&record, HubMode::Subscribe)?;

        let events = self.listen(&callback);
        {
            let lock = self.lock_for(&callback);
            let _guard = lock.lock().await;
            if let Err(e) = self.store.put(record.clone()).await {
                self.listeners.remove(&callback);
                self.locks.remove(&callback);
                return Err(e.into());
            }
        }
        self.register_route(&callback).await;

        tracing::info!(%callback, hub, topic, "requesting subscription");
        if let Err(err) = self.dispatch(&request).await {
            tracing::warn!(%callback, hub, topic, error = %err, "subscription request failed");
            self.abandon(&callback).await;
            return Err(err.into());
        }

        Ok(SubscriptionHandle {
            info: SubscriptionInfo::from(&record),
            events,
        })
    }

    /// Send a hub request with bounded exponential backoff.
    ///
    /// Each attempt is limited by `request_timeout`. Non-retryable statuses
    /// end the loop early.
    pub(super) async fn dispatch(&self, request: &HubRequest) -> std::result::Result<(), TransportError> {
        let attempts = self.config.max_retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(
                self.config.request_timeout,
                self.hub_client.send(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    let delay: Duration = self.config.backoff_delay(attempt);
                    tracing::debug!(
                        hub = %request.hub,
                        mode = %request.mode,
                        attempt,
                        ?delay,
                        error = %err,
                        "hub request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Drop a first-cycle record whose request never reached the hub.
    async fn abandon(&self, callback: &str) {
        let lock = self.lock_for(callback);
        let _guard = lock.lock().await;

        match self.store.get(callback).await {
            Ok(Some(record)) if record.state == SubscriptionState::Pending => {
                if let Err(e) = self.forget(callback).await {
                    tracing::error!(callback, error = %e, "failed to remove abandoned subscription");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(callback, error = %e, "failed to load abandoned subscription");
            }
        }
    }

    pub(super) async fn renew(&self, callback: &str) -> Result<bool> {
        let Some(_in_flight) = InFlight::claim(&self.in_flight, callback) else {
            tracing::debug!(callback, "renewal already in flight");
            return Ok(false);
        };

        let request = {
            let (_guard, mut record) = self.lock_record(callback).await?;
            if record.cancel_requested_at.is_some() {
                return Err(SubscriberError::InvalidState {
                    callback: callback.to_string(),
                    state: SubscriptionState::Cancelled,
                });
            }

            let previous = record.state;
            if previous == SubscriptionState::Pending {
                record.dispatch_attempts += 1;
            } else if record.transition(SubscriptionState::Pending) {
                record.dispatch_attempts = 1;
                if previous.is_terminal() {
                    // The old lease is over; nothing may be delivered until
                    // the hub verifies again.
                    record.expires_at = None;
                }
            } else {
                return Err(SubscriberError::InvalidState {
                    callback: callback.to_string(),
                    state: previous,
                });
            }
            record.requested_at = self.clock.now();

            let request = self.hub_request(&record, HubMode::Subscribe)?;
            self.store.put(record).await?;
            request
        };

        self.emit(callback, SubscriptionEvent::Renewing);
        tracing::info!(callback, hub = %request.hub, topic = %request.topic, "renewing subscription");

        if let Err(err) = self.dispatch(&request).await {
            tracing::warn!(callback, error = %err, "renewal request failed");
            self.restore_after_failed_renewal(callback).await;
            return Err(err.into());
        }

        Ok(true)
    }

    /// A renewal whose request failed keeps its running lease: back to Active
    /// so the next scan retries. Otherwise the record stays Pending for the
    /// scanner's verification timeout and expiry rules.
    async fn restore_after_failed_renewal(&self, callback: &str) {
        let lock = self.lock_for(callback);
        let _guard = lock.lock().await;

        let mut record = match self.store.get(callback).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(callback, error = %e, "failed to load subscription after renewal failure");
                return;
            }
        };

        if record.state == SubscriptionState::Pending
            && record.lease_running(self.clock.now())
            && record.transition(SubscriptionState::Active)
        {
            if let Err(e) = self.store.put(record).await {
                tracing::error!(callback, error = %e, "failed to restore subscription after renewal failure");
            }
        }
    }

    pub(super) async fn cancel(&self, callback: &str) -> Result<()> {
        let request = {
            let (_guard, mut record) = self.lock_record(callback).await?;
            record.cancel_requested_at = Some(self.clock.now());
            let request = self.hub_request(&record, HubMode::Unsubscribe)?;
            self.store.put(record).await?;
            request
        };

        let (waiter, verified) = tokio::sync::oneshot::channel();
        self.cancel_waiters
            .entry(callback.to_string())
            .or_default()
            .push(waiter);

        tracing::info!(callback, hub = %request.hub, "requesting unsubscribe");
        match self.dispatch(&request).await {
            Ok(()) => {
                if let Ok(Ok(())) = tokio::time::timeout(self.config.cancel_grace, verified).await {
                    return Ok(());
                }
                tracing::info!(
                    callback,
                    grace = ?self.config.cancel_grace,
                    "hub did not verify unsubscribe in time, cancelling locally"
                );
            }
            Err(err) => {
                drop(verified);
                tracing::warn!(callback, error = %err, "unsubscribe request failed, cancelling locally");
            }
        }

        // Only this call's waiter is closed; concurrent cancels keep theirs.
        if let Some(mut waiters) = self.cancel_waiters.get_mut(callback) {
            waiters.retain(|waiter| !waiter.is_closed());
        }
        self.cancel_waiters.remove_if(callback, |_, waiters| waiters.is_empty());

        let lock = self.lock_for(callback);
        let _guard = lock.lock().await;
        if let Some(record) = self.store.get(callback).await? {
            self.finish_cancellation(&record).await?;
        }
        Ok(())
    }

    pub(super) async fn remove(&self, callback: &str) -> Result<()> {
        let (_guard, _) = self.lock_record(callback).await?;
        self.forget(callback).await?;
        tracing::info!(callback, "subscription removed locally");
        Ok(())
    }

    pub(super) async fn recover(&self) -> Result<usize> {
        let mut seen = 0;
        let mut pending = Vec::new();

        for record in SubscriptionIter::snapshot(self.store.as_ref()).await? {
            seen += 1;
            self.register_route(&record.callback).await;
            if record.state == SubscriptionState::Pending && record.cancel_requested_at.is_none() {
                pending.push(record.callback);
            }
        }

        let results = join_all(pending.iter().map(|callback| self.renew(callback))).await;
        for (callback, result) in pending.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(%callback, error = %e, "failed to re-send pending subscription");
            }
        }

        tracing::info!(records = seen, resent = pending.len(), "recovered subscriptions");
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_claim_is_exclusive() {
        let set = dashmap::DashSet::new();
        let first = InFlight::claim(&set, "cb");
        assert!(first.is_some());
        assert!(InFlight::claim(&set, "cb").is_none());
        assert!(InFlight::claim(&set, "other").is_some());

        drop(first);
        assert!(InFlight::claim(&set, "cb").is_some());
    }
}
