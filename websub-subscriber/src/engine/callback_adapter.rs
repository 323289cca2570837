//! Adapter between the generic callback server and the engine.
//!
//! The server only speaks HTTP: it asks a `CallbackHandler` what to answer.
//! This adapter answers by running the engine's handshake and content
//! handling and mapping the outcome onto a reply. It holds a weak reference
//! so the router inside the engine state does not keep the state alive.

use std::sync::Weak;

use async_trait::async_trait;
use callback_server::{CallbackHandler, CallbackReply, ContentDelivery, VerificationQuery};

use super::core::EngineState;
use crate::error::SubscriberError;
use crate::types::VerificationResponse;

pub(crate) struct EngineCallbacks {
    state: Weak<EngineState>,
}

impl EngineCallbacks {
    pub fn new(state: Weak<EngineState>) -> Self {
        Self { state }
    }
}

fn failure_reply(callback: &str, error: SubscriberError) -> CallbackReply {
    match error {
        SubscriberError::Protocol(e) => {
            tracing::debug!(callback, error = %e, "answering 404");
            CallbackReply::NotFound
        }
        other => {
            tracing::error!(callback, error = %other, "failed to handle hub request");
            CallbackReply::Failed
        }
    }
}

#[async_trait]
impl CallbackHandler for EngineCallbacks {
    async fn verify(&self, callback: &str, query: VerificationQuery) -> CallbackReply {
        let Some(state) = self.state.upgrade() else {
            return CallbackReply::NotFound;
        };

        match state.handle_verification(callback, query).await {
            Ok(VerificationResponse::Challenge(challenge)) => CallbackReply::Challenge(challenge),
            Ok(VerificationResponse::Acknowledged) => CallbackReply::Accepted,
            Err(e) => failure_reply(callback, e),
        }
    }

    async fn deliver(&self, callback: &str, delivery: ContentDelivery) -> CallbackReply {
        let Some(state) = self.state.upgrade() else {
            return CallbackReply::NotFound;
        };

        match state.handle_content(callback, delivery).await {
            Ok(_) => CallbackReply::Accepted,
            Err(e) => failure_reply(callback, e),
        }
    }
}
