//! The transcription event chain.
//!
//! Three subscribers form the pipeline: `file.received` converts and
//! transcribes, `send.transcription` delivers the text, and
//! `send.affirmation` delivers an encouraging fallback. Every inbound
//! event terminates in exactly one outward send or one logged terminal
//! failure; a failed transcription hands off to the affirmation path and
//! never continues down its own.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use murmur_bus::{Envelope, MessageBus, Subscriber};
use murmur_core::subjects;
use murmur_media::AudioConverter;
use murmur_openai::{AffirmationSource, SpeechToText};
use murmur_telegram::ChatApi;

#[cfg(test)]
mod tests;

/// Reply text attached when conversion or transcription fails.
const TRANSCRIPTION_FAILED_ERROR: &str = "Oops! Couldn't get that one.";

fn require_str<'a>(envelope: &'a Envelope, key: &str) -> Result<&'a str> {
    envelope
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("envelope missing string field '{key}'"))
}

fn require_i64(envelope: &Envelope, key: &str) -> Result<i64> {
    envelope
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("envelope missing numeric field '{key}'"))
}

/// Handles `file.received`: convert to wav, transcribe, then hand off to
/// exactly one of `send.transcription` or `send.affirmation`.
pub struct FileReceivedHandler {
    bus: Arc<MessageBus>,
    converter: Arc<dyn AudioConverter>,
    transcriber: Arc<dyn SpeechToText>,
}

impl FileReceivedHandler {
    pub fn new(
        bus: Arc<MessageBus>,
        converter: Arc<dyn AudioConverter>,
        transcriber: Arc<dyn SpeechToText>,
    ) -> Self {
        Self {
            bus,
            converter,
            transcriber,
        }
    }

    async fn degrade(&self, mut envelope: Envelope) -> Result<()> {
        envelope.insert("error".to_string(), json!(TRANSCRIPTION_FAILED_ERROR));
        self.bus
            .publish(subjects::SEND_AFFIRMATION, &envelope)
            .await
            .context("failed to publish affirmation request")
    }
}

#[async_trait]
impl Subscriber for FileReceivedHandler {
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let file_path = require_str(&envelope, "file_path")?.to_string();

        let wav_path = match self.converter.convert_to_wav(Path::new(&file_path)).await {
            Ok(path) => path,
            Err(error) => {
                tracing::error!(%file_path, %error, "audio conversion failed, degrading");
                return self.degrade(envelope).await;
            }
        };

        let transcription = self.transcriber.transcribe(&wav_path).await;
        self.converter.remove(&wav_path).await;

        match transcription {
            Some(text) => {
                let mut envelope = envelope;
                envelope.insert("transcription".to_string(), json!(text));
                self.bus
                    .publish(subjects::SEND_TRANSCRIPTION, &envelope)
                    .await
                    .context("failed to publish transcription")
            }
            None => {
                tracing::warn!(%file_path, "transcription unavailable, degrading");
                self.degrade(envelope).await
            }
        }
    }
}

/// Handles `send.transcription`: deliver the text as a reply to the source
/// message.
pub struct TranscriptionHandler {
    chat: Arc<dyn ChatApi>,
}

impl TranscriptionHandler {
    pub fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Subscriber for TranscriptionHandler {
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let from_id = require_i64(&envelope, "from_id")?;
        let message_id = require_i64(&envelope, "message_id")?;
        let text = require_str(&envelope, "transcription")?;

        self.chat
            .send_message(from_id, text, Some(message_id))
            .await
            .ok_or_else(|| anyhow!("failed to deliver transcription to chat {from_id}"))?;
        Ok(())
    }
}

/// Handles `send.affirmation`: generate an encouraging line and deliver it
/// as a reply.
pub struct AffirmationHandler {
    affirmations: Arc<dyn AffirmationSource>,
    chat: Arc<dyn ChatApi>,
}

impl AffirmationHandler {
    pub fn new(affirmations: Arc<dyn AffirmationSource>, chat: Arc<dyn ChatApi>) -> Self {
        Self { affirmations, chat }
    }
}

#[async_trait]
impl Subscriber for AffirmationHandler {
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let from_id = require_i64(&envelope, "from_id")?;
        let message_id = require_i64(&envelope, "message_id")?;
        if let Some(error) = envelope.get("error").and_then(Value::as_str) {
            tracing::info!(from_id, error, "affirmation requested after failure");
        }

        let text = self.affirmations.affirmation().await;
        self.chat
            .send_message(from_id, &text, Some(message_id))
            .await
            .ok_or_else(|| anyhow!("failed to deliver affirmation to chat {from_id}"))?;
        Ok(())
    }
}

/// Registers the full chain on the bus. Safe to call before `connect()`;
/// the bus arms everything on connection.
pub async fn register_all(
    bus: &Arc<MessageBus>,
    converter: Arc<dyn AudioConverter>,
    transcriber: Arc<dyn SpeechToText>,
    affirmations: Arc<dyn AffirmationSource>,
    chat: Arc<dyn ChatApi>,
) -> Result<()> {
    bus.subscribe(
        subjects::FILE_RECEIVED,
        Arc::new(FileReceivedHandler::new(
            Arc::clone(bus),
            converter,
            transcriber,
        )),
    )
    .await
    .context("failed to register file.received handler")?;
    bus.subscribe(
        subjects::SEND_TRANSCRIPTION,
        Arc::new(TranscriptionHandler::new(Arc::clone(&chat))),
    )
    .await
    .context("failed to register send.transcription handler")?;
    bus.subscribe(
        subjects::SEND_AFFIRMATION,
        Arc::new(AffirmationHandler::new(affirmations, chat)),
    )
    .await
    .context("failed to register send.affirmation handler")?;
    Ok(())
}
