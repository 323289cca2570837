//! Fetching topic documents and reading their links.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LINK};
use url::Url;

use super::link::{extract_document_links, parse_link_header, Link};
use crate::error::{truncate_body, DiscoveryError, TransportError};

/// What a topic response's `Content-Type` says about its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Xml,
    Other,
}

impl ContentKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(value) = content_type else {
            return Self::Other;
        };
        let essence = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/html" | "application/xhtml+xml" => Self::Html,
            "text/xml" | "application/xml" => Self::Xml,
            other if other.ends_with("+xml") => Self::Xml,
            _ => Self::Other,
        }
    }

    /// Whether the body can be scanned for `<link>` elements.
    pub fn is_markup(&self) -> bool {
        matches!(self, Self::Html | Self::Xml)
    }
}

/// A fetched topic response whose body has not been read yet.
#[async_trait]
pub trait TopicDocument: Send {
    /// Links from the response's `Link` headers, in header order.
    fn header_links(&self) -> &[Link];

    fn content_kind(&self) -> ContentKind;

    /// Read the body and return its `<link>` elements.
    async fn body_links(self: Box<Self>, head_only: bool) -> Result<Vec<Link>, DiscoveryError>;
}

/// Fetches topic URLs for discovery.
#[async_trait]
pub trait LinkSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Box<dyn TopicDocument>, DiscoveryError>;
}

/// [`LinkSource`] over HTTP.
///
/// Relative link targets are resolved against the final response URL, after
/// redirects. Absolute targets are returned exactly as written.
#[derive(Debug, Clone)]
pub struct HttpLinkSource {
    client: reqwest::Client,
}

impl HttpLinkSource {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Use an existing client; its timeout and user agent apply.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LinkSource for HttpLinkSource {
    async fn fetch(&self, url: &str) -> Result<Box<dyn TopicDocument>, DiscoveryError> {
        let parsed = Url::parse(url).map_err(|e| DiscoveryError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DiscoveryError::InvalidUrl(format!("{url}: unsupported scheme")));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::UnexpectedStatus {
                status: status.as_u16(),
                body: truncate_body(body),
            }
            .into());
        }

        let base = response.url().clone();
        let links = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(parse_link_header)
            .map(|link| resolve(&base, link))
            .collect();
        let kind = ContentKind::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );

        tracing::debug!(url = %base, ?kind, "fetched topic document");

        Ok(Box::new(HttpTopicDocument {
            response,
            base,
            links,
            kind,
        }))
    }
}

struct HttpTopicDocument {
    response: reqwest::Response,
    base: Url,
    links: Vec<Link>,
    kind: ContentKind,
}

#[async_trait]
impl TopicDocument for HttpTopicDocument {
    fn header_links(&self) -> &[Link] {
        &self.links
    }

    fn content_kind(&self) -> ContentKind {
        self.kind
    }

    async fn body_links(self: Box<Self>, head_only: bool) -> Result<Vec<Link>, DiscoveryError> {
        let Self { response, base, .. } = *self;
        let body = response.text().await.map_err(TransportError::from)?;
        Ok(extract_document_links(&body, head_only)
            .into_iter()
            .map(|link| resolve(&base, link))
            .collect())
    }
}

fn resolve(base: &Url, mut link: Link) -> Link {
    if Url::parse(&link.target).is_err() {
        if let Ok(joined) = base.join(&link.target) {
            link.target = joined.to_string();
        }
    }
    link
}
