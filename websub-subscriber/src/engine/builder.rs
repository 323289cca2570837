//! Builder for SubscriptionEngine.

use std::sync::Arc;

use super::core::{EngineState, SubscriptionEngine};
use crate::clock::{Clock, SystemClock};
use crate::config::SubscriberConfig;
use crate::discovery::{Discoverer, HttpLinkSource, LinkSource};
use crate::error::Result;
use crate::hub::{HttpHubClient, HubClient};
use crate::store::{MemoryStore, SubscriptionStore};
use crate::token::{OsTokenGenerator, TokenGenerator};

/// Assembles a [`SubscriptionEngine`] from its collaborators.
///
/// Anything not provided falls back to the production default: an in-memory
/// store, reqwest-based discovery and hub clients built from the config's
/// timeout and user agent, OS randomness, and the system clock.
pub struct SubscriptionEngineBuilder {
    config: SubscriberConfig,
    store: Option<Arc<dyn SubscriptionStore>>,
    hub_client: Option<Arc<dyn HubClient>>,
    link_source: Option<Arc<dyn LinkSource>>,
    tokens: Option<Arc<dyn TokenGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SubscriptionEngineBuilder {
    pub fn new(config: SubscriberConfig) -> Self {
        Self {
            config,
            store: None,
            hub_client: None,
            link_source: None,
            tokens: None,
            clock: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SubscriptionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_hub_client(mut self, client: Arc<dyn HubClient>) -> Self {
        self.hub_client = Some(client);
        self
    }

    pub fn with_link_source(mut self, source: Arc<dyn LinkSource>) -> Self {
        self.link_source = Some(source);
        self
    }

    pub fn with_token_generator(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<SubscriptionEngine> {
        self.config.validate()?;

        let hub_client: Arc<dyn HubClient> = match self.hub_client {
            Some(client) => client,
            None => Arc::new(HttpHubClient::new(
                self.config.request_timeout,
                &self.config.user_agent,
            )?),
        };
        let link_source: Arc<dyn LinkSource> = match self.link_source {
            Some(source) => source,
            None => Arc::new(HttpLinkSource::new(
                self.config.request_timeout,
                &self.config.user_agent,
            )?),
        };

        let state = EngineState::new(
            self.config,
            Discoverer::new(link_source),
            hub_client,
            self.tokens.unwrap_or_else(|| Arc::new(OsTokenGenerator)),
            self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        );

        Ok(SubscriptionEngine::from_state(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_defaults() {
        let engine = SubscriptionEngineBuilder::new(
            SubscriberConfig::new().with_callback_base_url("https://subscriber.example/cb/"),
        )
        .build()
        .unwrap();

        assert_eq!(
            engine.callback_url("abc").unwrap(),
            "https://subscriber.example/cb/abc"
        );
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = SubscriptionEngineBuilder::new(SubscriberConfig::new().with_buffer_size(0)).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_callback_url_requires_base() {
        let engine = SubscriptionEngineBuilder::new(SubscriberConfig::new()).build().unwrap();
        assert!(engine.callback_url("abc").is_err());
    }
}
