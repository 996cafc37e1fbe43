use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;

use murmur_core::{current_unix_timestamp_ms, subjects};

use crate::envelope::{decode_envelope, encode_envelope, error_envelope, Envelope};
use crate::transport::{BusConnection, BusTransport, MessageStream};
use crate::BusError;

/// Fire-and-forget handler for a subject. Errors are logged at the dispatch
/// boundary and never propagate.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()>;
}

/// Request handler for a subject. The returned envelope is delivered as the
/// reply; an error is converted into an error envelope so the requester
/// never hangs until its timeout.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, envelope: Envelope) -> anyhow::Result<Envelope>;
}

struct FnSubscriber<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        (self.f)(envelope).await
    }
}

/// Wraps an async closure as a [`Subscriber`].
pub fn subscriber_fn<F, Fut>(f: F) -> Arc<dyn Subscriber>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnSubscriber { f })
}

struct FnResponder<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Responder for FnResponder<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Envelope>> + Send + 'static,
{
    async fn respond(&self, envelope: Envelope) -> anyhow::Result<Envelope> {
        (self.f)(envelope).await
    }
}

/// Wraps an async closure as a [`Responder`].
pub fn responder_fn<F, Fut>(f: F) -> Arc<dyn Responder>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Envelope>> + Send + 'static,
{
    Arc::new(FnResponder { f })
}

#[derive(Clone)]
enum Registration {
    Subscribe {
        subject: String,
        handler: Arc<dyn Subscriber>,
    },
    Respond {
        subject: String,
        responder: Arc<dyn Responder>,
    },
}

/// Publish/subscribe/request-reply client over a broker transport.
///
/// Registrations may be added at any time: before `connect()` they are
/// buffered, and every successful (re)connect replays the full set against
/// the fresh connection. Registering while connected arms the handler
/// immediately without a restart.
pub struct MessageBus {
    transport: Box<dyn BusTransport>,
    registrations: Mutex<Vec<Registration>>,
    // `None` is Disconnected, `Some` is Connected. The lock serializes
    // state transitions so concurrent connect attempts cannot interleave.
    connection: Mutex<Option<Arc<dyn BusConnection>>>,
}

impl MessageBus {
    pub fn new(transport: Box<dyn BusTransport>) -> Self {
        Self {
            transport,
            registrations: Mutex::new(Vec::new()),
            connection: Mutex::new(None),
        }
    }

    /// Registers a fire-and-forget handler for `subject`.
    pub async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn Subscriber>,
    ) -> Result<(), BusError> {
        self.register(Registration::Subscribe {
            subject: subject.to_string(),
            handler,
        })
        .await
    }

    /// Registers a responder for `subject`.
    pub async fn register_responder(
        &self,
        subject: &str,
        responder: Arc<dyn Responder>,
    ) -> Result<(), BusError> {
        self.register(Registration::Respond {
            subject: subject.to_string(),
            responder,
        })
        .await
    }

    async fn register(&self, registration: Registration) -> Result<(), BusError> {
        let connection = self.connection.lock().await;
        self.registrations.lock().await.push(registration.clone());
        if let Some(connection) = connection.as_ref() {
            apply_registration(connection, registration).await?;
        }
        Ok(())
    }

    /// Connects to the broker and arms every buffered registration.
    ///
    /// Idempotent: a no-op when already connected. On failure the bus stays
    /// disconnected and the error is returned to the caller.
    pub async fn connect(&self) -> Result<(), BusError> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let connection = match self.transport.connect().await {
            Ok(connection) => connection,
            Err(error) => {
                tracing::error!(%error, "failed to connect to broker");
                return Err(error);
            }
        };
        let registrations = self.registrations.lock().await.clone();
        for registration in registrations {
            if let Err(error) = apply_registration(&connection, registration).await {
                tracing::error!(%error, "failed to arm registration, abandoning connection");
                let _ = connection.close().await;
                return Err(error);
            }
        }
        tracing::info!("connected to broker");
        *slot = Some(connection);
        Ok(())
    }

    /// Serializes `envelope` and sends it on `subject`.
    ///
    /// Fails loudly when the bus is disconnected; nothing is dropped
    /// silently.
    pub async fn publish(&self, subject: &str, envelope: &Envelope) -> Result<(), BusError> {
        let connection = self.current_connection().await?;
        connection.publish(subject, encode_envelope(envelope)).await
    }

    /// Sends a request on `subject` and waits for the reply envelope.
    ///
    /// Only the calling task blocks; a missing responder surfaces as
    /// [`BusError::RequestTimeout`] once `timeout` elapses.
    pub async fn request(
        &self,
        subject: &str,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        let connection = self.current_connection().await?;
        let reply = connection
            .request(subject, encode_envelope(envelope), timeout)
            .await?;
        decode_envelope(&reply)
    }

    /// Graceful disconnect. Safe to call repeatedly and when never
    /// connected.
    pub async fn close(&self) -> Result<(), BusError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.take() {
            connection.close().await?;
            tracing::info!("bus connection closed");
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Long-lived serve loop: connect, announce, park on `shutdown`, close.
    pub async fn serve<F>(&self, shutdown: F) -> Result<(), BusError>
    where
        F: Future<Output = ()>,
    {
        self.connect().await?;
        let mut started = Envelope::new();
        started.insert(
            "timestamp".to_string(),
            Value::from(current_unix_timestamp_ms()),
        );
        if let Err(error) = self.publish(subjects::BUS_STARTED, &started).await {
            tracing::warn!(%error, "failed to announce bus start");
        }
        shutdown.await;
        self.close().await
    }

    async fn current_connection(&self) -> Result<Arc<dyn BusConnection>, BusError> {
        let guard = self.connection.lock().await;
        guard.as_ref().cloned().ok_or(BusError::NotConnected)
    }
}

async fn apply_registration(
    connection: &Arc<dyn BusConnection>,
    registration: Registration,
) -> Result<(), BusError> {
    match registration {
        Registration::Subscribe { subject, handler } => {
            let stream = connection.subscribe(&subject).await?;
            tracing::info!(%subject, "registered subscription");
            tokio::spawn(dispatch_subscriber(subject, handler, stream));
        }
        Registration::Respond { subject, responder } => {
            let stream = connection.subscribe(&subject).await?;
            tracing::info!(%subject, "registered responder");
            tokio::spawn(dispatch_responder(
                subject,
                responder,
                Arc::clone(connection),
                stream,
            ));
        }
    }
    Ok(())
}

// Each inbound message becomes its own task: same-subject and cross-subject
// dispatches interleave freely, and one failure never stalls another.
async fn dispatch_subscriber(
    subject: String,
    handler: Arc<dyn Subscriber>,
    mut stream: MessageStream,
) {
    while let Some(message) = stream.next().await {
        let handler = Arc::clone(&handler);
        let subject = subject.clone();
        tokio::spawn(async move {
            let envelope = match decode_envelope(&message.payload) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::error!(%subject, %error, "dropping undecodable message");
                    return;
                }
            };
            if let Err(error) = handler.handle(envelope).await {
                tracing::error!(%subject, %error, "handler failed, message dropped");
            }
        });
    }
    tracing::debug!(%subject, "subscription stream ended");
}

async fn dispatch_responder(
    subject: String,
    responder: Arc<dyn Responder>,
    connection: Arc<dyn BusConnection>,
    mut stream: MessageStream,
) {
    while let Some(message) = stream.next().await {
        let responder = Arc::clone(&responder);
        let connection = Arc::clone(&connection);
        let subject = subject.clone();
        tokio::spawn(async move {
            let Some(reply) = message.reply.clone() else {
                tracing::warn!(%subject, "request without reply inbox, ignoring");
                return;
            };
            let outcome = match decode_envelope(&message.payload) {
                Ok(envelope) => responder.respond(envelope).await,
                Err(error) => Err(error.into()),
            };
            let body = match outcome {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::error!(%subject, %error, "responder failed, replying with error envelope");
                    error_envelope(&error.to_string())
                }
            };
            if let Err(error) = connection.publish(&reply, encode_envelope(&body)).await {
                tracing::error!(%subject, %error, "failed to deliver reply");
            }
        });
    }
    tracing::debug!(%subject, "responder stream ended");
}
