//! Outbound subscribe and unsubscribe requests to a hub.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{truncate_body, TransportError};

/// The `hub.mode` of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
}

impl HubMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for HubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One form-encoded POST to a hub.
#[derive(Clone, PartialEq, Eq)]
pub struct HubRequest {
    pub hub: String,
    pub mode: HubMode,
    /// Absolute callback URL the hub will verify and deliver to
    pub callback_url: String,
    pub topic: String,
    pub lease_seconds: Option<u64>,
    pub secret: Option<String>,
    /// Extra form parameters
    pub params: BTreeMap<String, String>,
    /// Extra request headers, attached verbatim
    pub headers: BTreeMap<String, String>,
}

impl HubRequest {
    /// The form body, in send order.
    ///
    /// Extra parameters come first; any that collide with a `hub.*` protocol
    /// field are dropped so callers cannot override the handshake.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(name, _)| !is_protocol_field(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        fields.push(("hub.callback".to_string(), self.callback_url.clone()));
        fields.push(("hub.mode".to_string(), self.mode.as_str().to_string()));
        fields.push(("hub.topic".to_string(), self.topic.clone()));
        if let Some(lease) = self.lease_seconds {
            fields.push(("hub.lease_seconds".to_string(), lease.to_string()));
        }
        if let Some(secret) = &self.secret {
            fields.push(("hub.secret".to_string(), secret.clone()));
        }

        fields
    }
}

fn is_protocol_field(name: &str) -> bool {
    matches!(
        name,
        "hub.callback" | "hub.mode" | "hub.topic" | "hub.lease_seconds" | "hub.secret"
    )
}

impl fmt::Debug for HubRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubRequest")
            .field("hub", &self.hub)
            .field("mode", &self.mode)
            .field("callback_url", &self.callback_url)
            .field("topic", &self.topic)
            .field("lease_seconds", &self.lease_seconds)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Sends hub requests. One attempt per call; retries belong to the caller.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn send(&self, request: &HubRequest) -> Result<(), TransportError>;
}

/// [`HubClient`] over HTTP. Any 2xx answer (hubs use 202) is success.
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    client: reqwest::Client,
}

impl HttpHubClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn send(&self, request: &HubRequest) -> Result<(), TransportError> {
        let mut builder = self.client.post(&request.hub).form(&request.form_fields());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(hub = %request.hub, mode = %request.mode, status = status.as_u16(), "hub accepted request");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::UnexpectedStatus {
            status: status.as_u16(),
            body: truncate_body(body),
        })
    }
}
