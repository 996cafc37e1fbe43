use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use murmur_bus::{Envelope, MemoryBroker, MemoryTransport, MessageBus};
use murmur_core::subjects;
use murmur_media::AudioConverter;
use murmur_openai::{AffirmationSource, SpeechToText};
use murmur_telegram::ChatApi;

use crate::register_all;

struct FakeConverter {
    fail: bool,
    removed: Mutex<Vec<PathBuf>>,
}

impl FakeConverter {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            removed: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AudioConverter for FakeConverter {
    async fn convert_to_wav(&self, input: &Path) -> Result<PathBuf> {
        if self.fail {
            return Err(anyhow!("conversion failed"));
        }
        Ok(input.with_extension("wav"))
    }

    async fn remove(&self, path: &Path) {
        self.removed.lock().await.push(path.to_path_buf());
    }
}

struct FakeTranscriber {
    text: Option<String>,
}

#[async_trait]
impl SpeechToText for FakeTranscriber {
    async fn transcribe(&self, _input: &Path) -> Option<String> {
        self.text.clone()
    }
}

struct FakeAffirmations;

#[async_trait]
impl AffirmationSource for FakeAffirmations {
    async fn affirmation(&self) -> String {
        "You got this, kid!".to_string()
    }
}

type SentMessage = (i64, String, Option<i64>);

struct RecordingChat {
    sent: mpsc::UnboundedSender<SentMessage>,
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Option<Value> {
        let _ = self.sent.send((chat_id, text.to_string(), reply_to));
        Some(json!({"message_id": 1000}))
    }

    async fn get_file(&self, _file_id: &str) -> Option<String> {
        None
    }
}

struct Chain {
    bus: Arc<MessageBus>,
    converter: Arc<FakeConverter>,
    sent: mpsc::UnboundedReceiver<SentMessage>,
}

async fn chain_with(converter: Arc<FakeConverter>, transcription: Option<&str>) -> Chain {
    let broker = MemoryBroker::new();
    let bus = Arc::new(MessageBus::new(Box::new(MemoryTransport::new(broker))));
    let (tx, rx) = mpsc::unbounded_channel();
    register_all(
        &bus,
        Arc::clone(&converter) as Arc<dyn AudioConverter>,
        Arc::new(FakeTranscriber {
            text: transcription.map(str::to_string),
        }),
        Arc::new(FakeAffirmations),
        Arc::new(RecordingChat { sent: tx }),
    )
    .await
    .expect("register handlers");
    bus.connect().await.expect("connect");
    Chain {
        bus,
        converter,
        sent: rx,
    }
}

async fn recv_sent(rx: &mut mpsc::UnboundedReceiver<SentMessage>) -> SentMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("send channel closed")
}

fn file_received_envelope() -> Envelope {
    let mut envelope = Envelope::new();
    envelope.insert("message_id".to_string(), json!(7));
    envelope.insert("from_id".to_string(), json!(42));
    envelope.insert("file_path".to_string(), json!("/mnt/voice/file_9.oga"));
    envelope
}

#[tokio::test]
async fn received_file_is_transcribed_and_delivered_as_reply() {
    let mut chain = chain_with(FakeConverter::new(false), Some("hello world")).await;

    chain
        .bus
        .publish(subjects::FILE_RECEIVED, &file_received_envelope())
        .await
        .expect("publish");

    let (chat_id, text, reply_to) = recv_sent(&mut chain.sent).await;
    assert_eq!(chat_id, 42);
    assert_eq!(text, "hello world");
    assert_eq!(reply_to, Some(7));
}

#[tokio::test]
async fn converted_file_is_removed_after_success() {
    let mut chain = chain_with(FakeConverter::new(false), Some("hello world")).await;

    chain
        .bus
        .publish(subjects::FILE_RECEIVED, &file_received_envelope())
        .await
        .expect("publish");
    recv_sent(&mut chain.sent).await;

    let removed = chain.converter.removed.lock().await;
    assert_eq!(removed.as_slice(), [PathBuf::from("/mnt/voice/file_9.wav")]);
}

#[tokio::test]
async fn failed_transcription_degrades_to_affirmation_only() {
    let mut chain = chain_with(FakeConverter::new(false), None).await;

    chain
        .bus
        .publish(subjects::FILE_RECEIVED, &file_received_envelope())
        .await
        .expect("publish");

    // The only outward send is the affirmation reply; the transcription
    // path stays silent.
    let (chat_id, text, reply_to) = recv_sent(&mut chain.sent).await;
    assert_eq!(chat_id, 42);
    assert_eq!(text, "You got this, kid!");
    assert_eq!(reply_to, Some(7));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(chain.sent.try_recv().is_err(), "expected exactly one send");
}

#[tokio::test]
async fn failed_conversion_degrades_to_affirmation_without_cleanup() {
    let mut chain = chain_with(FakeConverter::new(true), Some("unused")).await;

    chain
        .bus
        .publish(subjects::FILE_RECEIVED, &file_received_envelope())
        .await
        .expect("publish");

    let (chat_id, text, _) = recv_sent(&mut chain.sent).await;
    assert_eq!(chat_id, 42);
    assert_eq!(text, "You got this, kid!");

    let removed = chain.converter.removed.lock().await;
    assert!(removed.is_empty(), "nothing was converted, nothing to remove");
}

#[tokio::test]
async fn affirmation_event_sends_reply_to_source_message() {
    let mut chain = chain_with(FakeConverter::new(false), None).await;

    let mut envelope = Envelope::new();
    envelope.insert("message_id".to_string(), json!(1));
    envelope.insert("from_id".to_string(), json!(42));
    chain
        .bus
        .publish(subjects::SEND_AFFIRMATION, &envelope)
        .await
        .expect("publish");

    let (chat_id, text, reply_to) = recv_sent(&mut chain.sent).await;
    assert_eq!(chat_id, 42);
    assert!(!text.is_empty());
    assert_eq!(reply_to, Some(1));
}

#[tokio::test]
async fn malformed_event_is_dropped_without_breaking_the_chain() {
    let mut chain = chain_with(FakeConverter::new(false), Some("still alive")).await;

    // Missing every required field; the dispatch logs and drops it.
    chain
        .bus
        .publish(subjects::FILE_RECEIVED, &Envelope::new())
        .await
        .expect("publish");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(chain.sent.try_recv().is_err());

    // A well-formed event afterwards still flows end to end.
    chain
        .bus
        .publish(subjects::FILE_RECEIVED, &file_received_envelope())
        .await
        .expect("publish");
    let (_, text, _) = recv_sent(&mut chain.sent).await;
    assert_eq!(text, "still alive");
}
