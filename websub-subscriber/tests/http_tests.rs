//! End-to-end tests over real HTTP.
//!
//! The topic and the hub are mockito servers; the engine serves its callback
//! routes on a local port and the tests play the hub's side of the
//! verification and distribution requests with reqwest.

mod test_helpers;

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use mockito::Matcher;
use test_helpers::RecordingHub;
use tokio::time::timeout;
use websub_subscriber::{
    CallbackServerConfig, ContentAuthenticator, SignatureAlgorithm, SubscribeOptions,
    SubscriberConfig, SubscriptionEngine, SubscriptionEvent, SubscriptionState,
};

fn local_server_config() -> CallbackServerConfig {
    CallbackServerConfig::default()
        .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_port_range(0, 0)
}

#[tokio::test]
async fn test_subscription_over_http() {
    let mut topic_server = mockito::Server::new_async().await;
    let mut hub_server = mockito::Server::new_async().await;
    let topic_url = format!("{}/feed", topic_server.url());
    let hub_url = format!("{}/", hub_server.url());

    let topic_mock = topic_server
        .mock("GET", "/feed")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_header(
            "link",
            &format!("<{hub_url}>; rel=\"hub\", <{topic_url}>; rel=\"self\""),
        )
        .with_body("<rss version=\"2.0\"><channel/></rss>")
        .create_async()
        .await;
    let hub_mock = hub_server
        .mock("POST", "/")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("hub.mode".into(), "subscribe".into()),
            Matcher::UrlEncoded("hub.topic".into(), topic_url.clone()),
            Matcher::UrlEncoded("hub.lease_seconds".into(), "600".into()),
        ]))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let engine = SubscriptionEngine::builder(
        SubscriberConfig::new().with_retry(1, Duration::from_millis(1), Duration::from_millis(1)),
    )
    .build()
    .unwrap();
    let server = engine.serve(local_server_config()).await.unwrap();

    let mut result = engine
        .subscribe(
            &topic_url,
            SubscribeOptions::new().with_secret().with_lease_seconds(600),
        )
        .await
        .unwrap();
    topic_mock.assert_async().await;
    hub_mock.assert_async().await;

    let handle = &mut result.subscriptions[0];
    let callback_url = engine.callback_url(handle.callback()).unwrap();
    assert!(callback_url.starts_with(server.base_url()));

    let client = reqwest::Client::new();

    // Verification for a different topic looks like an unknown callback.
    let response = client
        .get(&callback_url)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "https://elsewhere.example/feed"),
            ("hub.challenge", "nope"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client
        .get(&callback_url)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", topic_url.as_str()),
            ("hub.challenge", "d5f8 c0ffee"),
            ("hub.lease_seconds", "600"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "d5f8 c0ffee");

    let event = timeout(Duration::from_secs(5), handle.next_event()).await.unwrap();
    assert!(matches!(event, Some(SubscriptionEvent::Validated { .. })));
    let info = engine.get(handle.callback()).await.unwrap().unwrap();
    assert_eq!(info.state, SubscriptionState::Active);

    // Content without a valid signature is acknowledged but not delivered.
    let response = client
        .post(&callback_url)
        .header("content-type", "application/rss+xml")
        .header("x-hub-signature", "sha256=00")
        .body("<rss>forged</rss>")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let event = timeout(Duration::from_secs(5), handle.next_event()).await.unwrap();
    assert!(matches!(event, Some(SubscriptionEvent::ContentRejected { .. })));

    let unknown = format!("{}/not-a-callback", server.base_url());
    let response = client.post(&unknown).body("x").send().await.unwrap();
    assert_eq!(response.status(), 404);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_signed_delivery_over_http() {
    let topic = "https://example.com/feed";
    let hub = RecordingHub::new();
    let engine = SubscriptionEngine::builder(SubscriberConfig::new())
        .with_hub_client(hub.clone())
        .build()
        .unwrap();
    let server = engine.serve(local_server_config()).await.unwrap();

    let mut handle = engine
        .subscribe_via("https://hub.example/", topic, SubscribeOptions::new().with_secret())
        .await
        .unwrap();
    let request = hub.requests().remove(0);
    let secret = request.secret.expect("subscribe request carries the secret");
    assert_eq!(secret.len(), 128);
    assert_eq!(request.callback_url, format!("{}/{}", server.base_url(), handle.callback()));

    let callback_url = engine.callback_url(handle.callback()).unwrap();
    let client = reqwest::Client::new();
    let response = client
        .get(&callback_url)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", topic),
            ("hub.challenge", "ok"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");
    assert!(matches!(
        handle.next_event().await,
        Some(SubscriptionEvent::Validated { .. })
    ));

    let body = "<feed><entry>signed</entry></feed>";
    let signature = ContentAuthenticator::sign(SignatureAlgorithm::Sha384, &secret, body.as_bytes());
    let response = client
        .post(&callback_url)
        .header("content-type", "application/atom+xml")
        .header("x-hub-signature", signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    match timeout(Duration::from_secs(5), handle.next_event()).await.unwrap() {
        Some(SubscriptionEvent::Content { content_type, body: received }) => {
            assert_eq!(content_type.as_deref(), Some("application/atom+xml"));
            assert_eq!(&received[..], body.as_bytes());
        }
        other => panic!("Expected content event, got {other:?}"),
    }

    server.shutdown().await.unwrap();
}
