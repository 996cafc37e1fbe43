use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::executor::{CallFailure, CallOutcome, RateLimitedExecutor, RetryPolicy};
use crate::limiter::StrictLimiter;

/// Sent when affirmation generation is unavailable.
pub const DEFAULT_AFFIRMATION: &str = "You're amazing! Keep shining! ✨💕";

const AFFIRMATION_PERSONA: &str = "You are Transcriptron, a scrappy, street-smart \
transcription bot with working-class hero energy. You're fast-talking, optimistic, \
and genuinely caring. Use phrases like \"Hey!\", \"Listen up!\", \"No sweat\", \
\"You got this, kid!\". Keep it short (10-15 words), punchy, and use emojis \
sparingly but effectively.";

const AFFIRMATION_PROMPT: &str =
    "Give me an encouraging affirmation for someone who just failed at something.";

/// Transcribes an audio file. `None` means the provider was unavailable
/// after retries, or rejected the audio outright.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, input: &Path) -> Option<String>;
}

/// Produces a short encouraging line. Never fails; degrades to
/// [`DEFAULT_AFFIRMATION`].
#[async_trait]
pub trait AffirmationSource: Send + Sync {
    async fn affirmation(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub transcription_model: String,
    pub chat_model: String,
    pub request_timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            transcription_model: "whisper-1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
    executor: RateLimitedExecutor,
    limiter: Arc<StrictLimiter>,
}

impl OpenAiClient {
    pub fn new(
        config: OpenAiConfig,
        limiter: Arc<StrictLimiter>,
        policy: RetryPolicy,
    ) -> anyhow::Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("missing OpenAI API key");
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            config,
            executor: RateLimitedExecutor::new(Arc::clone(&limiter), policy),
            limiter,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_base.trim_end_matches('/'))
    }

    async fn request_affirmation(&self) -> anyhow::Result<String> {
        let body = json!({
            "model": self.config.chat_model,
            "messages": [
                {"role": "system", "content": AFFIRMATION_PERSONA},
                {"role": "user", "content": AFFIRMATION_PROMPT},
            ],
            "max_tokens": 40,
            "temperature": 1.4,
        });
        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("affirmation request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("affirmation request returned status {status}");
        }
        let value: Value = response
            .json()
            .await
            .context("invalid affirmation response")?;
        let text = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl SpeechToText for OpenAiClient {
    async fn transcribe(&self, input: &Path) -> Option<String> {
        // Read through the async fs layer so a slow disk cannot skew the
        // limiter's admission timing.
        let audio = match tokio::fs::read(input).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(error) => {
                tracing::error!(path = %input.display(), %error, "failed to read audio file");
                return None;
            }
        };
        let url = self.endpoint("audio/transcriptions");
        let path_label = input.display().to_string();

        let outcome = self
            .executor
            .execute("transcription", |attempt| {
                let client = self.client.clone();
                let url = url.clone();
                let api_key = self.config.api_key.clone();
                let model = self.config.transcription_model.clone();
                let audio = audio.clone();
                let path_label = path_label.clone();
                async move {
                    tracing::info!(attempt, path = %path_label, "transcription attempt");
                    let part = Part::bytes(audio.to_vec())
                        .file_name("audio.wav")
                        .mime_str("audio/wav")
                        .map_err(|error| CallFailure::Unexpected(error.into()))?;
                    let form = Form::new()
                        .text("model", model)
                        .text("language", "en")
                        .text("temperature", "0.1")
                        .part("file", part);
                    let response = client
                        .post(&url)
                        .bearer_auth(&api_key)
                        .multipart(form)
                        .send()
                        .await
                        .map_err(classify_transport_error)?;
                    let status = response.status();
                    if !status.is_success() {
                        let retry_after = retry_after_header(&response);
                        return Err(classify_status(status, retry_after));
                    }
                    let body: TranscriptionResponse = response
                        .json()
                        .await
                        .map_err(|error| CallFailure::Unexpected(error.into()))?;
                    Ok(body.text)
                }
            })
            .await;

        match outcome {
            CallOutcome::Success(text) => {
                tracing::info!(path = %input.display(), "transcription successful");
                Some(text)
            }
            CallOutcome::Unavailable => {
                tracing::error!(path = %input.display(), "transcription unavailable after retries");
                None
            }
            CallOutcome::Rejected { status } => {
                tracing::error!(path = %input.display(), status, "transcription rejected");
                None
            }
        }
    }
}

#[async_trait]
impl AffirmationSource for OpenAiClient {
    async fn affirmation(&self) -> String {
        // One attempt behind the limiter; this path never retries.
        self.limiter.acquire().await;
        match self.request_affirmation().await {
            Ok(text) if !text.is_empty() => {
                tracing::info!(affirmation = %text, "affirmation generated");
                text
            }
            Ok(_) => {
                tracing::warn!("empty affirmation from provider, using default");
                DEFAULT_AFFIRMATION.to_string()
            }
            Err(error) => {
                tracing::warn!(%error, "affirmation generation failed, using default");
                DEFAULT_AFFIRMATION.to_string()
            }
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> CallFailure {
    if error.is_timeout() {
        CallFailure::Timeout
    } else if error.is_connect() || error.is_request() || error.is_body() {
        CallFailure::Connection(error.to_string())
    } else {
        CallFailure::Unexpected(error.into())
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> CallFailure {
    match status.as_u16() {
        429 => CallFailure::RateLimited { retry_after },
        status if status >= 500 => CallFailure::Server { status },
        status if status >= 400 => CallFailure::Client { status },
        status => CallFailure::Unexpected(anyhow!("unexpected status {status}")),
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
