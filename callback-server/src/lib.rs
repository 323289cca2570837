//! HTTP callback server for WebSub subscribers.
//!
//! A subscriber has to be reachable by the hubs it subscribes to: hubs call
//! back with `GET` to verify intent and with `POST` to distribute content.
//! This crate owns that HTTP surface and nothing else. It has no notion of
//! subscription state; it decodes the wire format and asks a
//! [`CallbackHandler`] what to answer.
//!
//! # Overview
//!
//! - [`CallbackServer`]: warp server bound to a port in a range, exposing
//!   `GET /{callback}` and `POST /{callback}`.
//! - [`CallbackRouter`]: the set of live callback tokens. Requests for tokens
//!   that are not registered are answered with 404 before reaching the handler.
//! - [`CallbackHandler`]: the seam implemented by the subscription engine.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use callback_server::{
//!     CallbackHandler, CallbackReply, CallbackServer, CallbackServerConfig,
//!     ContentDelivery, VerificationQuery,
//! };
//!
//! struct PrintingHandler;
//!
//! #[async_trait]
//! impl CallbackHandler for PrintingHandler {
//!     async fn verify(&self, callback: &str, query: VerificationQuery) -> CallbackReply {
//!         println!("{callback}: {} {}", query.mode, query.topic);
//!         match query.challenge {
//!             Some(challenge) => CallbackReply::Challenge(challenge),
//!             None => CallbackReply::Accepted,
//!         }
//!     }
//!
//!     async fn deliver(&self, callback: &str, delivery: ContentDelivery) -> CallbackReply {
//!         println!("{callback}: {} bytes", delivery.body.len());
//!         CallbackReply::Accepted
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CallbackServerConfig::default()
//!         .with_public_base_url("https://subscriber.example/websub");
//!     let server = CallbackServer::start(config, Arc::new(PrintingHandler)).await?;
//!
//!     server.router().register("3f9a...".to_string()).await;
//!     println!("hub.callback = {}", server.callback_url("3f9a..."));
//!
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod error;
pub mod handler;
pub mod router;
mod server;

pub use error::CallbackServerError;
pub use handler::{
    CallbackHandler, CallbackReply, ContentDelivery, QueryError, VerificationMode, VerificationQuery,
};
pub use router::CallbackRouter;
pub use server::{CallbackServer, CallbackServerConfig};
