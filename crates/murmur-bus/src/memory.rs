use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::transport::{BusConnection, BusTransport, InboundMessage, MessageStream};
use crate::BusError;

/// In-process broker backing [`MemoryTransport`].
///
/// Routes published messages to every live subscription for the subject.
/// Subscriptions die with their connection, which is what gives reconnect
/// tests their exactly-once re-arm behavior.
pub struct MemoryBroker {
    next_id: AtomicU64,
    connect_failures: AtomicU32,
    topics: Mutex<HashMap<String, Vec<TopicSubscription>>>,
}

struct TopicSubscription {
    connection_id: u64,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            connect_failures: AtomicU32::new(0),
            topics: Mutex::new(HashMap::new()),
        })
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    fn take_connect_failure(&self) -> bool {
        self.connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                value.checked_sub(1)
            })
            .is_ok()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn add_subscription(
        &self,
        subject: &str,
        connection_id: u64,
        sender: mpsc::UnboundedSender<InboundMessage>,
    ) {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(subject.to_string())
            .or_default()
            .push(TopicSubscription {
                connection_id,
                sender,
            });
    }

    fn deliver(&self, subject: &str, payload: Bytes, reply: Option<String>) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(subscriptions) = topics.get_mut(subject) {
            // Dead receivers are pruned as a side effect of delivery.
            subscriptions.retain(|subscription| {
                subscription
                    .sender
                    .send(InboundMessage {
                        subject: subject.to_string(),
                        payload: payload.clone(),
                        reply: reply.clone(),
                    })
                    .is_ok()
            });
        }
    }

    fn remove_subject_for(&self, subject: &str, connection_id: u64) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(subscriptions) = topics.get_mut(subject) {
            subscriptions.retain(|subscription| subscription.connection_id != connection_id);
        }
    }

    fn drop_connection(&self, connection_id: u64) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for subscriptions in topics.values_mut() {
            subscriptions.retain(|subscription| subscription.connection_id != connection_id);
        }
    }
}

/// Broker-less transport for tests and local runs. All connections built
/// from the same [`MemoryBroker`] see each other's traffic.
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
}

impl MemoryTransport {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn connect(&self) -> Result<Arc<dyn BusConnection>, BusError> {
        if self.broker.take_connect_failure() {
            return Err(BusError::Connect("simulated connect failure".to_string()));
        }
        Ok(Arc::new(MemoryConnection {
            id: self.broker.next_id(),
            broker: Arc::clone(&self.broker),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl BusConnection for MemoryConnection {
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.broker.add_subscription(subject, self.id, sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.broker.deliver(subject, payload, None);
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        let inbox = format!("_inbox.{}", self.broker.next_id());
        let (sender, receiver) = mpsc::unbounded_channel();
        self.broker.add_subscription(&inbox, self.id, sender);
        let mut replies = UnboundedReceiverStream::new(receiver);

        self.broker.deliver(subject, payload, Some(inbox.clone()));
        let reply = tokio::time::timeout(timeout, replies.next()).await;
        self.broker.remove_subject_for(&inbox, self.id);
        match reply {
            Ok(Some(message)) => Ok(message.payload),
            Ok(None) => Err(BusError::Transport("reply inbox closed".to_string())),
            Err(_) => Err(BusError::RequestTimeout(timeout)),
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        self.broker.drop_connection(self.id);
        Ok(())
    }
}
