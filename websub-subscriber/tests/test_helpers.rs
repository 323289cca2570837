//! Test doubles for driving the engine without a network.
//!
//! - `RecordingHub`: a hub client that records every request and can be
//!   scripted to fail or to hold a request until released
//! - `StaticTopics`: a link source serving canned topic documents
//! - `SequentialTokens`: predictable callback tokens and secrets
//! - `TestEngine`: an engine wired to all of the above and a manual clock

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use websub_subscriber::clock::ManualClock;
use websub_subscriber::discovery::{
    extract_document_links, parse_link_header, ContentKind, Link, LinkSource, TopicDocument,
};
use websub_subscriber::hub::{HubClient, HubMode, HubRequest};
use websub_subscriber::store::{MemoryStore, SubscriptionStore};
use websub_subscriber::token::TokenGenerator;
use websub_subscriber::{
    ContentDelivery, DiscoveryError, SubscriberConfig, SubscriptionEngine, TransportError,
    VerificationMode, VerificationQuery,
};

pub const TOPIC: &str = "https://example.com/feed";
pub const HUB: &str = "https://hub.example/";
pub const BASE_URL: &str = "https://subscriber.example/websub";

/// Hub client that records requests instead of sending them.
#[derive(Default)]
pub struct RecordingHub {
    requests: Mutex<Vec<HubRequest>>,
    scripted: Mutex<HashMap<String, VecDeque<TransportError>>>,
    broken: Mutex<HashMap<String, TransportError>>,
    held: Mutex<HashSet<HubMode>>,
    release: Notify,
}

impl RecordingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next requests to `hub` with these errors, in order.
    pub fn fail_next(&self, hub: &str, errors: Vec<TransportError>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(hub.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail every request to `hub`.
    pub fn fail_always(&self, hub: &str, error: TransportError) {
        self.broken.lock().unwrap().insert(hub.to_string(), error);
    }

    /// Park requests of this mode until `release` is called.
    pub fn hold(&self, mode: HubMode) {
        self.held.lock().unwrap().insert(mode);
    }

    pub fn release(&self) {
        self.held.lock().unwrap().clear();
        self.release.notify_waiters();
    }

    pub fn requests(&self) -> Vec<HubRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_with(&self, mode: HubMode) -> Vec<HubRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.mode == mode)
            .collect()
    }

    /// Wait until at least `count` requests of `mode` have been recorded.
    pub async fn wait_for(&self, mode: HubMode, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests_with(mode).len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("hub request never arrived");
    }
}

#[async_trait]
impl HubClient for RecordingHub {
    async fn send(&self, request: &HubRequest) -> Result<(), TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let released = self.release.notified();
        if self.held.lock().unwrap().contains(&request.mode) {
            released.await;
        }

        if let Some(error) = self.broken.lock().unwrap().get(&request.hub) {
            return Err(error.clone());
        }
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&request.hub)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Topic documents keyed by URL.
#[derive(Default)]
pub struct StaticTopics {
    documents: HashMap<String, (String, ContentKind, String)>,
}

impl StaticTopics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(
        mut self,
        url: &str,
        link_header: &str,
        kind: ContentKind,
        body: &str,
    ) -> Self {
        self.documents.insert(
            url.to_string(),
            (link_header.to_string(), kind, body.to_string()),
        );
        self
    }

    /// A feed advertising `hubs` in its Link header.
    pub fn feed(url: &str, hubs: &[&str]) -> Self {
        let mut header: Vec<String> = hubs.iter().map(|hub| format!("<{hub}>; rel=\"hub\"")).collect();
        header.push(format!("<{url}>; rel=\"self\""));
        Self::new().with_document(url, &header.join(", "), ContentKind::Xml, "<rss/>")
    }
}

struct StaticDocument {
    links: Vec<Link>,
    kind: ContentKind,
    body: String,
}

#[async_trait]
impl TopicDocument for StaticDocument {
    fn header_links(&self) -> &[Link] {
        &self.links
    }

    fn content_kind(&self) -> ContentKind {
        self.kind
    }

    async fn body_links(self: Box<Self>, head_only: bool) -> Result<Vec<Link>, DiscoveryError> {
        Ok(extract_document_links(&self.body, head_only))
    }
}

#[async_trait]
impl LinkSource for StaticTopics {
    async fn fetch(&self, url: &str) -> Result<Box<dyn TopicDocument>, DiscoveryError> {
        let (header, kind, body) = self.documents.get(url).ok_or_else(|| {
            TransportError::UnexpectedStatus {
                status: 404,
                body: String::new(),
            }
        })?;
        Ok(Box::new(StaticDocument {
            links: parse_link_header(header),
            kind: *kind,
            body: body.clone(),
        }))
    }
}

/// Hands out `cb-1`, `cb-2`, ... and `secret-1`, `secret-2`, ...
#[derive(Default)]
pub struct SequentialTokens {
    callbacks: AtomicUsize,
    secrets: AtomicUsize,
}

impl TokenGenerator for SequentialTokens {
    fn callback_token(&self) -> String {
        format!("cb-{}", self.callbacks.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn secret(&self) -> String {
        format!("secret-{}", self.secrets.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Fast retries, a fixed base URL and a short cancel grace.
pub fn test_config() -> SubscriberConfig {
    SubscriberConfig::new()
        .with_callback_base_url(BASE_URL)
        .with_retry(3, Duration::from_millis(1), Duration::from_millis(5))
        .with_verification_timeout(Duration::from_secs(300))
        .with_cancel_grace(Duration::from_millis(100))
}

pub struct TestEngine {
    pub engine: Arc<SubscriptionEngine>,
    pub hub: Arc<RecordingHub>,
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    pub fn new(topics: StaticTopics) -> Self {
        Self::with_store(test_config(), topics, Arc::new(MemoryStore::new()))
    }

    pub fn with_config(config: SubscriberConfig, topics: StaticTopics) -> Self {
        Self::with_store(config, topics, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(
        config: SubscriberConfig,
        topics: StaticTopics,
        store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        let hub = RecordingHub::new();
        let clock = Arc::new(ManualClock::new(start_time()));
        let engine = SubscriptionEngine::builder(config)
            .with_store(store)
            .with_hub_client(hub.clone())
            .with_link_source(Arc::new(topics))
            .with_token_generator(Arc::new(SequentialTokens::default()))
            .with_clock(clock.clone())
            .build()
            .expect("Failed to build engine");

        Self {
            engine: Arc::new(engine),
            hub,
            clock,
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }
}

pub fn verification(mode: VerificationMode, topic: &str, challenge: Option<&str>) -> VerificationQuery {
    VerificationQuery {
        mode,
        topic: topic.to_string(),
        challenge: challenge.map(str::to_string),
        lease_seconds: None,
        reason: None,
    }
}

pub fn subscribe_verification(topic: &str, challenge: &str, lease_seconds: u64) -> VerificationQuery {
    VerificationQuery {
        lease_seconds: Some(lease_seconds),
        ..verification(VerificationMode::Subscribe, topic, Some(challenge))
    }
}

pub fn delivery(body: &'static str, signature: Option<String>) -> ContentDelivery {
    ContentDelivery {
        signature,
        content_type: Some("application/atom+xml".to_string()),
        links: Vec::new(),
        body: bytes::Bytes::from_static(body.as_bytes()),
    }
}
