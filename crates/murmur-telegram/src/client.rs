use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::split::split_message;
use crate::StrictLimiter;

/// Outbound chat operations the rest of the system depends on. Both return
/// `None` on failure; callers degrade rather than propagate.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Sends `text` to `chat_id`, splitting oversized bodies. Returns the
    /// API result of the last chunk sent.
    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>)
        -> Option<Value>;

    /// Resolves a file id to its server-side path.
    async fn get_file(&self, file_id: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub token: String,
    /// Floor between any two API calls. Telegram allows about 30 per second.
    pub call_interval: Duration,
    /// Floor between messages. One per second keeps per-chat limits safe.
    pub message_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            token: String::new(),
            call_interval: Duration::from_secs(1) / 30,
            message_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TelegramClient {
    client: reqwest::Client,
    api_url: String,
    call_limiter: StrictLimiter,
    message_limiter: StrictLimiter,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            bail!("missing Telegram bot token");
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            api_url: format!(
                "{}/bot{}/",
                config.api_base.trim_end_matches('/'),
                config.token
            ),
            call_limiter: StrictLimiter::new(config.call_interval),
            message_limiter: StrictLimiter::new(config.message_interval),
        })
    }

    /// POSTs one Bot API method and unwraps the `ok`/`result` envelope.
    async fn call_method(&self, method: &str, params: &Value) -> Result<Value> {
        self.call_limiter.acquire().await;
        let response = self
            .client
            .post(format!("{}{method}", self.api_url))
            .json(params)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("{method} returned invalid json"))?;
        if !status.is_success() || body.get("ok").and_then(Value::as_bool) != Some(true) {
            bail!("{method} failed with status {status}: {body}");
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn send_chunk(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<Value> {
        self.message_limiter.acquire().await;
        let mut params = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let (Some(message_id), Some(object)) = (reply_to, params.as_object_mut()) {
            object.insert(
                "reply_parameters".to_string(),
                json!({"message_id": message_id}),
            );
        }
        self.call_method("sendMessage", &params).await
    }
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Option<Value> {
        let chunks = split_message(text);
        let total = chunks.len();
        let mut last = None;
        for (index, chunk) in chunks.iter().enumerate() {
            // Only the first chunk replies to the source message.
            let reply = if index == 0 { reply_to } else { None };
            match self.send_chunk(chat_id, chunk, reply).await {
                Ok(result) => last = Some(result),
                Err(error) => {
                    tracing::error!(
                        chat_id,
                        chunk = index + 1,
                        total,
                        %error,
                        "failed to send message chunk"
                    );
                    return None;
                }
            }
        }
        tracing::info!(chat_id, chunks = total, "message sent");
        last
    }

    async fn get_file(&self, file_id: &str) -> Option<String> {
        match self.call_method("getFile", &json!({"file_id": file_id})).await {
            Ok(result) => match result.get("file_path").and_then(Value::as_str) {
                Some(path) => Some(path.to_string()),
                None => {
                    tracing::error!(file_id, "getFile result missing file_path");
                    None
                }
            },
            Err(error) => {
                tracing::error!(file_id, %error, "failed to resolve file");
                None
            }
        }
    }
}
