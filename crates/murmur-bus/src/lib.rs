//! Publish/subscribe/request-reply messaging backbone for Murmur.
//!
//! Components register handlers against subjects before any broker
//! connection exists; the bus buffers every registration and re-arms it on
//! each (re)connect. Dispatch is at-most-once: a handler failure drops that
//! one message with an error log and never affects the bus or sibling
//! dispatches.

mod bus;
mod envelope;
mod memory;
mod nats;
mod transport;


pub use bus::{responder_fn, subscriber_fn, MessageBus, Responder, Subscriber};
pub use envelope::{decode_envelope, encode_envelope, error_envelope, Envelope};
pub use memory::{MemoryBroker, MemoryTransport};
pub use nats::{NatsConfig, NatsTransport};
pub use transport::{BusConnection, BusTransport, InboundMessage, MessageStream};

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the bus and its transports.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected a JSON object payload")]
    NotAnObject,
}
