//! Bounded topic consumption over a [`buslane_common::BrokerGateway`]: pull
//! messages from a subscription, dispatch each to a handler under a
//! concurrency cap, keep leases renewed while handlers run, and settle every
//! message exactly once.

// Engine internals stay private; the public surface is the client facade,
// the configuration types and the handler trait.
mod consumer;
mod renewal;
mod settle;
mod slots;

// Config
mod config;
pub use config::ConsumerSettings;
pub use config::CoreConfig;
pub use config::Provider;

// Handler boundary
mod dispatch;
pub use dispatch::Handler;

// Client facade
mod client;
pub use client::Subscription;
pub use client::TopicClient;
