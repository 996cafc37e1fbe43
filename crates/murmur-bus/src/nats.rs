use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::transport::{BusConnection, BusTransport, InboundMessage, MessageStream};
use crate::BusError;

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    /// Connection name shown in broker monitoring.
    pub name: String,
}

/// NATS-backed transport used in production.
pub struct NatsTransport {
    config: NatsConfig,
}

impl NatsTransport {
    pub fn new(config: NatsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BusTransport for NatsTransport {
    async fn connect(&self) -> Result<Arc<dyn BusConnection>, BusError> {
        let client = async_nats::ConnectOptions::new()
            .name(&self.config.name)
            .connect(&self.config.url)
            .await
            .map_err(|error| BusError::Connect(error.to_string()))?;
        Ok(Arc::new(NatsConnection { client }))
    }
}

struct NatsConnection {
    client: async_nats::Client,
}

#[async_trait]
impl BusConnection for NatsConnection {
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|error| BusError::Transport(error.to_string()))?;
        Ok(Box::pin(subscriber.map(|message| InboundMessage {
            subject: message.subject.to_string(),
            payload: message.payload,
            reply: message.reply.map(|reply| reply.to_string()),
        })))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|error| BusError::Transport(error.to_string()))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        let message = tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload))
            .await
            .map_err(|_| BusError::RequestTimeout(timeout))?
            .map_err(|error| BusError::Transport(error.to_string()))?;
        Ok(message.payload)
    }

    async fn close(&self) -> Result<(), BusError> {
        // Drain ends every subscription stream before the connection goes
        // away, so dispatch tasks wind down instead of lingering.
        self.client
            .drain()
            .await
            .map_err(|error| BusError::Transport(error.to_string()))
    }
}
