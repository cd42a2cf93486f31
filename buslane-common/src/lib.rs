//! Shared types for the buslane workspace: the wire envelope, the
//! status-tagged error taxonomy, the broker gateway boundary and the
//! in-memory local broker.

pub mod envelope;
pub mod error;
pub mod gateway;
pub mod local;

pub use envelope::{Payload, QueueEnvelope};
pub use error::BusError;
pub use gateway::{BrokerGateway, Message};
pub use local::LocalBroker;
