//! # websub-subscriber
//!
//! The subscriber side of WebSub: given a topic URL, discover its hubs and
//! canonical URL, request subscriptions, answer the hubs' verification
//! challenges, authenticate pushed content, and keep leases renewed until the
//! subscription is cancelled.
//!
//! ```rust,no_run
//! use websub_subscriber::{
//!     CallbackServerConfig, SubscribeOptions, SubscriberConfig, SubscriptionEngine,
//! };
//!
//! # async fn run() -> websub_subscriber::Result<()> {
//! let engine = SubscriptionEngine::builder(
//!     SubscriberConfig::new().with_callback_base_url("https://subscriber.example/websub"),
//! )
//! .build()?;
//! let _server = engine.serve(CallbackServerConfig::default()).await?;
//! engine.start_renewal().await;
//!
//! let subscribed = engine
//!     .subscribe(
//!         "https://example.com/feed",
//!         SubscribeOptions::new()
//!             .with_secret()
//!             .with_lease_seconds(86_400)
//!             .with_renew_window(std::time::Duration::from_secs(3_600)),
//!     )
//!     .await?;
//! for callback in subscribed.callbacks() {
//!     println!("pending: {callback}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clock;
pub mod config;
pub mod discovery;
mod engine;
mod error;
pub mod hub;
pub mod logging;
pub mod store;
pub mod token;
mod types;

pub use auth::{AuthRejection, ContentAuthenticator, SignatureAlgorithm};
pub use config::SubscriberConfig;
pub use discovery::{DiscoverOptions, Discoverer, Discovery};
pub use engine::{RenewalReport, SubscriptionEngine, SubscriptionEngineBuilder};
pub use error::*;
pub use store::{JsonFileStore, MemoryStore, SubscriptionStore};
pub use types::*;

pub use callback_server::{
    CallbackServer, CallbackServerConfig, ContentDelivery, VerificationMode, VerificationQuery,
};
