//! Error types for the websub-subscriber crate.

/// Errors raised while resolving a topic URL into hubs and a canonical topic.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Headers were insufficient and the body is neither HTML nor XML
    #[error("Topic response has no suitable content for link discovery")]
    NoSuitableContent,

    /// Neither headers nor markup declared a `rel="self"` link
    #[error("Topic response declares no canonical (rel=\"self\") link")]
    NoCanonicalLink,

    /// The topic URL could not be parsed
    #[error("Invalid topic URL: {0}")]
    InvalidUrl(String),

    /// Fetching the topic failed
    #[error("Topic fetch failed: {0}")]
    Transport(#[from] TransportError),
}

/// Outbound HTTP failures, for discovery fetches and hub requests alike.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// The connection could not be established or broke mid-request
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote answered with a non-success status
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors (4xx) other than 408 and 429 are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailed(_) => true,
            Self::UnexpectedStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::ConnectionFailed(err.to_string())
        }
    }
}

/// Violations of the WebSub exchange by a hub or an inbound request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// No subscription is stored under the callback
    #[error("Unknown callback")]
    UnknownCallback,

    /// The verification names a different topic than the stored one
    #[error("Topic mismatch")]
    TopicMismatch,

    /// The signature header names an algorithm outside sha1/sha256/sha384/sha512
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedSignatureAlgorithm(String),

    /// A subscribe or unsubscribe verification without `hub.challenge`
    #[error("Verification is missing hub.challenge")]
    MissingChallenge,
}

/// Failures of a [`SubscriptionStore`](crate::store::SubscriptionStore).
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading or writing the backing storage failed
    #[error("Storage I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// A record could not be encoded or decoded
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record is stored under the callback
    #[error("Subscription not found: {0}")]
    NotFound(String),
}

/// Errors surfaced by the subscription engine.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Callback server error: {0}")]
    CallbackServer(#[from] callback_server::CallbackServerError),

    /// Discovery succeeded but the topic advertises no hub
    #[error("No hubs advertised for topic: {0}")]
    NoHubs(String),

    /// The operation is not allowed in the subscription's current state
    #[error("Subscription {callback} is {state}")]
    InvalidState {
        callback: String,
        state: crate::types::SubscriptionState,
    },

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An error occurred during shutdown
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

const MAX_ERROR_BODY: usize = 512;

/// Cap a response body kept for an error message.
pub(crate) fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Convenience type alias for Results using SubscriberError.
pub type Result<T> = std::result::Result<T, SubscriberError>;
