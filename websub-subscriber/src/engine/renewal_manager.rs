//! Automatic renewal and lease cleanup.
//!
//! This module contains the RenewalManager which handles:
//! - Running a background task that scans the store on a fixed interval
//! - Renewing subscriptions that entered their renew window
//! - Re-sending requests the hub never verified
//! - Expiring subscriptions whose lease ran out

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::core::EngineState;
use crate::error::{Result, SubscriberError};
use crate::store::SubscriptionIter;
use crate::types::{Subscription, SubscriptionEvent, SubscriptionState};

/// What one scan did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Subscriptions moved to Expired
    pub expired: usize,
    /// Active subscriptions renewed inside their window
    pub renewed: usize,
    /// Unverified requests sent again
    pub redispatched: usize,
    /// Renewals or re-sends whose request failed
    pub failed: usize,
}

/// Manager for the background renewal task.
///
/// Every `renewal_check_interval` the task takes a snapshot of the store and
/// applies, per record:
/// 1. Active or Pending with an elapsed lease becomes Expired
/// 2. Active inside its renew window is renewed once
/// 3. Pending for longer than `verification_timeout` is re-sent; a record
///    that was never verified is Expired after `max_retry_attempts` sends
///
/// # Shutdown
///
/// The manager provides graceful shutdown with a 5-second timeout.
pub(crate) struct RenewalManager {
    /// Handle to the background renewal task
    background_task: Option<JoinHandle<()>>,
    /// Channel for signaling shutdown
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl RenewalManager {
    pub fn start(state: Arc<EngineState>) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let background_task = tokio::spawn(Self::renewal_task(state, shutdown_rx));

        Self {
            background_task: Some(background_task),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Signal the task to stop and wait up to 5 seconds for it.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }

        if let Some(task) = self.background_task.take() {
            match timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SubscriberError::ShutdownError(format!(
                    "Renewal task panicked: {e}"
                ))),
                Err(_) => Err(SubscriberError::ShutdownError(
                    "Renewal task shutdown timed out after 5 seconds".to_string(),
                )),
            }
        } else {
            Ok(())
        }
    }

    async fn renewal_task(state: Arc<EngineState>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut check_interval = interval(state.config.renewal_check_interval);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = check_interval.tick() => {
                    match state.run_renewal_pass().await {
                        Ok(report) if report != RenewalReport::default() => {
                            tracing::debug!(?report, "renewal pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "renewal pass failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

fn lease_elapsed(record: &Subscription, now: DateTime<Utc>) -> bool {
    matches!(record.state, SubscriptionState::Active | SubscriptionState::Pending)
        && record.expires_at.map_or(false, |expires_at| expires_at <= now)
}

fn in_renew_window(record: &Subscription, now: DateTime<Utc>) -> bool {
    match (record.state, record.renew_window(), record.expires_at) {
        (SubscriptionState::Active, Some(window), Some(expires_at)) => expires_at - now <= window,
        _ => false,
    }
}

fn verification_overdue(record: &Subscription, now: DateTime<Utc>, verification_timeout: chrono::Duration) -> bool {
    record.state == SubscriptionState::Pending
        && record.cancel_requested_at.is_none()
        && now - record.requested_at >= verification_timeout
}

impl EngineState {
    pub(super) async fn run_renewal_pass(&self) -> Result<RenewalReport> {
        let now = self.clock.now();
        let verification_timeout = to_chrono(self.config.verification_timeout);
        let max_attempts = self.config.max_retry_attempts;
        let never_verified = move |record: &Subscription| {
            verification_overdue(record, now, verification_timeout)
                && record.expires_at.is_none()
                && record.dispatch_attempts >= max_attempts
        };

        let mut report = RenewalReport::default();
        let mut renewals = Vec::new();

        for record in SubscriptionIter::snapshot(self.store.as_ref()).await? {
            if lease_elapsed(&record, now) {
                if self.expire_if(&record.callback, |r| lease_elapsed(r, now)).await? {
                    report.expired += 1;
                }
            } else if in_renew_window(&record, now) {
                renewals.push((record.callback, false));
            } else if never_verified(&record) {
                if self.expire_if(&record.callback, never_verified).await? {
                    report.expired += 1;
                }
            } else if verification_overdue(&record, now, verification_timeout) {
                renewals.push((record.callback, true));
            }
        }

        let results = join_all(renewals.iter().map(|(callback, _)| self.renew(callback))).await;
        for ((callback, redispatch), result) in renewals.iter().zip(results) {
            match result {
                Ok(true) if *redispatch => report.redispatched += 1,
                Ok(true) => report.renewed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(%callback, error = %e, "scheduled renewal failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Expire a record if `condition` still holds under its lock.
    async fn expire_if(&self, callback: &str, condition: impl Fn(&Subscription) -> bool) -> Result<bool> {
        let lock = self.lock_for(callback);
        let _guard = lock.lock().await;

        let Some(mut record) = self.store.get(callback).await? else {
            return Ok(false);
        };
        if !condition(&record) || !record.transition(SubscriptionState::Expired) {
            return Ok(false);
        }
        self.store.put(record).await?;

        tracing::info!(callback, "subscription expired");
        self.emit(callback, SubscriptionEvent::Expired);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscribeOptions;

    fn record(state: SubscriptionState, now: DateTime<Utc>) -> Subscription {
        let mut record = Subscription::new(
            "cb".to_string(),
            "https://hub.example/".to_string(),
            "https://example.com/feed".to_string(),
            None,
            &SubscribeOptions::new().with_renew_window(Duration::from_secs(60)),
            now,
        );
        record.state = state;
        record
    }

    #[test]
    fn test_lease_elapsed() {
        let now = Utc::now();
        let mut active = record(SubscriptionState::Active, now);
        active.expires_at = Some(now);
        assert!(lease_elapsed(&active, now));
        assert!(!lease_elapsed(&active, now - chrono::Duration::seconds(1)));

        let mut denied = record(SubscriptionState::Denied, now);
        denied.expires_at = Some(now - chrono::Duration::seconds(10));
        assert!(!lease_elapsed(&denied, now));
    }

    #[test]
    fn test_renew_window() {
        let now = Utc::now();
        let mut active = record(SubscriptionState::Active, now);
        active.expires_at = Some(now + chrono::Duration::seconds(61));
        assert!(!in_renew_window(&active, now));
        active.expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(in_renew_window(&active, now));

        active.renew_window_secs = None;
        assert!(!in_renew_window(&active, now));
    }

    #[test]
    fn test_verification_overdue() {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(300);
        let pending = record(SubscriptionState::Pending, now - chrono::Duration::seconds(299));
        assert!(!verification_overdue(&pending, now, timeout));
        assert!(verification_overdue(&pending, now + chrono::Duration::seconds(1), timeout));

        let mut cancelling = pending.clone();
        cancelling.cancel_requested_at = Some(now);
        assert!(!verification_overdue(&cancelling, now + chrono::Duration::seconds(10), timeout));
    }
}
