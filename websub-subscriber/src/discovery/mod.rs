//! Hub and canonical topic discovery.
//!
//! A topic advertises its hubs with `rel="hub"` links and its canonical URL
//! with a `rel="self"` link, either in `Link` response headers or in `<link>`
//! elements of an HTML or XML body. Headers are consulted first; the body is
//! only read when headers leave the hub list or the canonical URL missing.
//!
//! - `link`: header and markup link parsing
//! - `source`: the fetch abstraction and its reqwest implementation

mod link;
mod source;

use std::sync::Arc;

pub use link::{extract_document_links, parse_link_header, Link};
pub use source::{ContentKind, HttpLinkSource, LinkSource, TopicDocument};

use crate::error::DiscoveryError;

/// Options for a single discovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverOptions {
    /// Ignore `<link>` elements outside `<head>`.
    ///
    /// Use this for pages that render third-party markup in their body.
    pub head_only: bool,
}

/// The outcome of a successful discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Canonical topic URL from the first `rel="self"` link
    pub topic: String,
    /// Hub URLs, de-duplicated in order of first appearance
    pub hubs: Vec<String>,
}

/// Resolves topic URLs into hubs and a canonical topic.
#[derive(Clone)]
pub struct Discoverer {
    source: Arc<dyn LinkSource>,
}

impl Discoverer {
    pub fn new(source: Arc<dyn LinkSource>) -> Self {
        Self { source }
    }

    pub async fn discover(
        &self,
        topic_url: &str,
        options: DiscoverOptions,
    ) -> Result<Discovery, DiscoveryError> {
        let document = self.source.fetch(topic_url).await?;

        let mut found = Found::default();
        found.classify(document.header_links());

        if found.topic.is_none() || found.hubs.is_empty() {
            if !document.content_kind().is_markup() {
                tracing::debug!(topic_url, "headers incomplete and body is not markup");
                return Err(DiscoveryError::NoSuitableContent);
            }
            let body_links = document.body_links(options.head_only).await?;
            found.classify(&body_links);
        }

        let topic = found.topic.ok_or(DiscoveryError::NoCanonicalLink)?;
        tracing::debug!(topic_url, %topic, hubs = found.hubs.len(), "discovered topic");

        Ok(Discovery {
            topic,
            hubs: found.hubs,
        })
    }
}

#[derive(Default)]
struct Found {
    topic: Option<String>,
    hubs: Vec<String>,
}

impl Found {
    fn classify(&mut self, links: &[Link]) {
        for link in links {
            if link.has_rel("hub") && !self.hubs.contains(&link.target) {
                self.hubs.push(link.target.clone());
            }
            if link.has_rel("self") && self.topic.is_none() {
                self.topic = Some(link.target.clone());
            }
        }
    }
}
