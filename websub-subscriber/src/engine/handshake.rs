//! Inbound hub requests: verification of intent and content distribution.

use callback_server::{ContentDelivery, VerificationMode, VerificationQuery};

use super::core::{lease_expiry, EngineState};
use crate::auth::ContentAuthenticator;
use crate::error::{ProtocolError, Result};
use crate::types::{ContentOutcome, SubscriptionEvent, SubscriptionState, VerificationResponse};

impl EngineState {
    /// Any verification whose callback and topic match the stored record is
    /// honoured, whichever request cycle triggered it.
    pub(super) async fn handle_verification(
        &self,
        callback: &str,
        request: VerificationQuery,
    ) -> Result<VerificationResponse> {
        let (guard, mut record) = self.lock_record(callback).await.map_err(|e| {
            tracing::debug!(callback, mode = %request.mode, error = %e, "verification not matched to a subscription");
            e
        })?;

        // A hub must not be able to move a subscription to another topic.
        // Report it exactly like an unknown callback.
        if record.topic != request.topic {
            tracing::warn!(
                callback,
                expected = %record.topic,
                received = %request.topic,
                "rejecting verification: {}",
                ProtocolError::TopicMismatch
            );
            drop(guard);
            self.release_lock(callback);
            return Err(ProtocolError::UnknownCallback.into());
        }

        let now = self.clock.now();
        match request.mode {
            VerificationMode::Subscribe => {
                let challenge = request.challenge.ok_or(ProtocolError::MissingChallenge)?;
                if record.cancel_requested_at.is_some()
                    || !record.transition(SubscriptionState::Active)
                {
                    tracing::warn!(callback, state = %record.state, "rejecting subscribe verification");
                    return Err(ProtocolError::UnknownCallback.into());
                }

                let lease = request
                    .lease_seconds
                    .or(record.lease_seconds)
                    .unwrap_or_else(|| self.config.default_lease.as_secs());
                let expires_at = lease_expiry(now, lease);
                record.expires_at = Some(expires_at);
                record.dispatch_attempts = 0;
                self.store.put(record).await?;

                tracing::info!(callback, lease_seconds = lease, %expires_at, "subscription verified");
                self.emit(callback, SubscriptionEvent::Validated { expires_at });
                Ok(VerificationResponse::Challenge(challenge))
            }
            VerificationMode::Unsubscribe => {
                let challenge = request.challenge.ok_or(ProtocolError::MissingChallenge)?;
                if record.cancel_requested_at.is_none() {
                    tracing::info!(callback, "hub-initiated unsubscribe");
                }
                self.finish_cancellation(&record).await?;
                Ok(VerificationResponse::Challenge(challenge))
            }
            VerificationMode::Denied => {
                if record.transition(SubscriptionState::Denied) {
                    record.denied_reason = request.reason.clone();
                    self.store.put(record).await?;
                    tracing::warn!(callback, reason = ?request.reason, "subscription denied");
                    self.emit(
                        callback,
                        SubscriptionEvent::Denied {
                            reason: request.reason,
                        },
                    );
                } else {
                    tracing::debug!(callback, state = %record.state, "ignoring denial");
                }
                Ok(VerificationResponse::Acknowledged)
            }
        }
    }

    /// Deliveries are acknowledged whether or not they authenticate; only
    /// authenticated ones reach the event stream.
    pub(super) async fn handle_content(
        &self,
        callback: &str,
        delivery: ContentDelivery,
    ) -> Result<ContentOutcome> {
        let record = self.require(callback).await?;

        if !record.accepts_content(self.clock.now()) {
            tracing::debug!(callback, state = %record.state, "discarding content for inactive subscription");
            return Ok(ContentOutcome::Ignored(record.state));
        }

        match ContentAuthenticator::check(record.secret(), delivery.signature.as_deref(), &delivery.body) {
            Ok(authentication) => {
                tracing::debug!(callback, ?authentication, bytes = delivery.body.len(), "content delivered");
                self.emit(
                    callback,
                    SubscriptionEvent::Content {
                        content_type: delivery.content_type,
                        body: delivery.body,
                    },
                );
                Ok(ContentOutcome::Delivered)
            }
            Err(reason) => {
                tracing::warn!(callback, %reason, "discarding unauthenticated content");
                self.emit(
                    callback,
                    SubscriptionEvent::ContentRejected {
                        reason: reason.clone(),
                    },
                );
                Ok(ContentOutcome::Rejected(reason))
            }
        }
    }
}
