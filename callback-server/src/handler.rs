//! Request types and the handler seam between the HTTP layer and the engine.
//!
//! The server only knows the WebSub wire format: it turns a hub's `GET` into a
//! [`VerificationQuery`] and a hub's `POST` into a [`ContentDelivery`], hands them
//! to a [`CallbackHandler`], and maps the returned [`CallbackReply`] onto a status
//! code and body. Whatever decides the reply lives behind the trait.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

/// The `hub.mode` value of a verification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationMode {
    Subscribe,
    Unsubscribe,
    Denied,
}

impl VerificationMode {
    /// Parse the `hub.mode` query value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Denied => "denied",
        }
    }
}

impl std::fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hub-initiated verification of intent, decoded from the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationQuery {
    pub mode: VerificationMode,
    pub topic: String,
    /// Present for `subscribe` and `unsubscribe`; absent for `denied`.
    pub challenge: Option<String>,
    pub lease_seconds: Option<u64>,
    pub reason: Option<String>,
}

/// Why a verification query could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("missing hub.mode")]
    MissingMode,
    #[error("unknown hub.mode: {0}")]
    UnknownMode(String),
    #[error("missing hub.topic")]
    MissingTopic,
    #[error("missing hub.challenge")]
    MissingChallenge,
    #[error("invalid hub.lease_seconds: {0}")]
    InvalidLease(String),
}

impl VerificationQuery {
    /// Decode the `hub.*` parameters of a verification request.
    ///
    /// `subscribe` and `unsubscribe` must carry a challenge, since the
    /// handshake only succeeds by echoing it. A malformed lease is an error
    /// rather than being silently dropped.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, QueryError> {
        let mode_value = params.get("hub.mode").ok_or(QueryError::MissingMode)?;
        let mode = VerificationMode::parse(mode_value)
            .ok_or_else(|| QueryError::UnknownMode(mode_value.clone()))?;

        let topic = params
            .get("hub.topic")
            .cloned()
            .ok_or(QueryError::MissingTopic)?;

        let challenge = params.get("hub.challenge").cloned();
        if mode != VerificationMode::Denied && challenge.is_none() {
            return Err(QueryError::MissingChallenge);
        }

        let lease_seconds = match params.get("hub.lease_seconds") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| QueryError::InvalidLease(raw.clone()))?,
            ),
            None => None,
        };

        Ok(Self {
            mode,
            topic,
            challenge,
            lease_seconds,
            reason: params.get("hub.reason").cloned(),
        })
    }
}

/// A content distribution request pushed by a hub.
#[derive(Debug, Clone)]
pub struct ContentDelivery {
    /// Value of `X-Hub-Signature`, if the hub sent one.
    pub signature: Option<String>,
    pub content_type: Option<String>,
    /// Raw `Link` header values, in arrival order.
    pub links: Vec<String>,
    /// The body exactly as received; signatures are computed over these bytes.
    pub body: Bytes,
}

/// What the server should answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackReply {
    /// 200 with the challenge as the verbatim body.
    Challenge(String),
    /// 2xx with an empty body.
    Accepted,
    /// 404.
    NotFound,
    /// 500; the hub is expected to retry later.
    Failed,
}

/// Decides the outcome of inbound hub requests for a callback token.
///
/// The router only calls the handler for callbacks that are registered.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn verify(&self, callback: &str, query: VerificationQuery) -> CallbackReply;

    async fn deliver(&self, callback: &str, delivery: ContentDelivery) -> CallbackReply;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_subscribe_query() {
        let query = VerificationQuery::from_params(&params(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "https://example.com/feed"),
            ("hub.challenge", "abc123"),
            ("hub.lease_seconds", "600"),
        ]))
        .unwrap();

        assert_eq!(query.mode, VerificationMode::Subscribe);
        assert_eq!(query.topic, "https://example.com/feed");
        assert_eq!(query.challenge.as_deref(), Some("abc123"));
        assert_eq!(query.lease_seconds, Some(600));
        assert!(query.reason.is_none());
    }

    #[test]
    fn test_denied_query_needs_no_challenge() {
        let query = VerificationQuery::from_params(&params(&[
            ("hub.mode", "denied"),
            ("hub.topic", "https://example.com/feed"),
            ("hub.reason", "not allowed"),
        ]))
        .unwrap();

        assert_eq!(query.mode, VerificationMode::Denied);
        assert!(query.challenge.is_none());
        assert_eq!(query.reason.as_deref(), Some("not allowed"));
    }

    #[test]
    fn test_query_errors() {
        assert_eq!(
            VerificationQuery::from_params(&params(&[("hub.topic", "t")])),
            Err(QueryError::MissingMode)
        );
        assert_eq!(
            VerificationQuery::from_params(&params(&[("hub.mode", "publish"), ("hub.topic", "t")])),
            Err(QueryError::UnknownMode("publish".to_string()))
        );
        assert_eq!(
            VerificationQuery::from_params(&params(&[("hub.mode", "subscribe"), ("hub.challenge", "c")])),
            Err(QueryError::MissingTopic)
        );
        assert_eq!(
            VerificationQuery::from_params(&params(&[("hub.mode", "unsubscribe"), ("hub.topic", "t")])),
            Err(QueryError::MissingChallenge)
        );
        assert_eq!(
            VerificationQuery::from_params(&params(&[
                ("hub.mode", "subscribe"),
                ("hub.topic", "t"),
                ("hub.challenge", "c"),
                ("hub.lease_seconds", "soon"),
            ])),
            Err(QueryError::InvalidLease("soon".to_string()))
        );
    }

    #[test]
    fn test_mode_round_trip_names() {
        for mode in [
            VerificationMode::Subscribe,
            VerificationMode::Unsubscribe,
            VerificationMode::Denied,
        ] {
            assert_eq!(VerificationMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(VerificationMode::parse("Subscribe"), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_challenge_kept_verbatim(challenge in ".*", topic in "[ -~]{1,64}") {
            let query = VerificationQuery::from_params(&params(&[
                ("hub.mode", "subscribe"),
                ("hub.topic", &topic),
                ("hub.challenge", &challenge),
            ]))
            .unwrap();
            proptest::prop_assert_eq!(query.challenge.as_deref(), Some(challenge.as_str()));
            proptest::prop_assert_eq!(query.topic, topic);
        }
    }
}
