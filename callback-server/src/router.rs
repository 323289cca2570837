//! Callback routing for inbound hub requests.
//!
//! This module provides the `CallbackRouter` which maintains the set of live
//! callback tokens and forwards verification and content requests for those
//! tokens to a [`CallbackHandler`].

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::handler::{CallbackHandler, CallbackReply, ContentDelivery, VerificationQuery};

/// Routes hub requests to a handler by callback token.
///
/// A callback must be registered before any request addressed to it reaches
/// the handler; requests for unknown tokens are answered with
/// [`CallbackReply::NotFound`] without touching the handler.
#[derive(Clone)]
pub struct CallbackRouter {
    /// Set of registered callback tokens
    callbacks: Arc<RwLock<HashSet<String>>>,
    handler: Arc<dyn CallbackHandler>,
}

impl CallbackRouter {
    /// Create a new router that forwards to `handler`.
    pub fn new(handler: Arc<dyn CallbackHandler>) -> Self {
        Self {
            callbacks: Arc::new(RwLock::new(HashSet::new())),
            handler,
        }
    }

    /// Register a callback token so requests for it are routed.
    ///
    /// Registering an already registered token is a no-op.
    pub async fn register(&self, callback: String) {
        let mut callbacks = self.callbacks.write().await;
        callbacks.insert(callback);
    }

    /// Unregister a callback token.
    ///
    /// Subsequent requests for the token are answered with 404.
    pub async fn unregister(&self, callback: &str) {
        let mut callbacks = self.callbacks.write().await;
        callbacks.remove(callback);
    }

    /// Whether a callback token is currently registered.
    pub async fn is_registered(&self, callback: &str) -> bool {
        self.callbacks.read().await.contains(callback)
    }

    /// Number of registered callbacks.
    pub async fn len(&self) -> usize {
        self.callbacks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.callbacks.read().await.is_empty()
    }

    /// Route a verification request.
    pub async fn route_verification(&self, callback: &str, query: VerificationQuery) -> CallbackReply {
        if !self.is_registered(callback).await {
            tracing::debug!(callback, mode = %query.mode, "verification for unregistered callback");
            return CallbackReply::NotFound;
        }
        self.handler.verify(callback, query).await
    }

    /// Route a content delivery.
    pub async fn route_content(&self, callback: &str, delivery: ContentDelivery) -> CallbackReply {
        if !self.is_registered(callback).await {
            tracing::debug!(callback, "content for unregistered callback");
            return CallbackReply::NotFound;
        }
        self.handler.deliver(callback, delivery).await
    }
}
