//! Subscription engine module.
//!
//! The engine is split into focused submodules:
//!
//! - `core`: the `SubscriptionEngine` facade and its shared state
//! - `builder`: wiring of store, hub client, link source, tokens and clock
//! - `subscription_manager`: subscribe, renew, cancel and crash recovery
//! - `handshake`: verification of intent and content delivery
//! - `renewal_manager`: the background renewal and expiry scanner
//! - `callback_adapter`: bridges the callback server to the engine
//!
//! Every read-modify-write of a record happens under that callback's own
//! async mutex; different callbacks never contend.

mod builder;
mod callback_adapter;
mod core;
mod handshake;
mod renewal_manager;
mod subscription_manager;

pub use self::builder::SubscriptionEngineBuilder;
pub use self::core::SubscriptionEngine;
pub use self::renewal_manager::RenewalReport;
