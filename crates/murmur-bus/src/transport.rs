use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::BusError;

/// A single message delivered by the broker for a subscribed subject.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Reply inbox for request-style messages, absent for plain publishes.
    pub reply: Option<String>,
}

/// Stream of inbound messages for one subscription. Ends when the
/// underlying connection goes away.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Factory for broker connections. The bus owns one transport and calls it
/// on every (re)connect attempt.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BusConnection>, BusError>;
}

/// One live broker connection.
#[async_trait]
pub trait BusConnection: Send + Sync {
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError>;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError>;

    async fn close(&self) -> Result<(), BusError>;
}
