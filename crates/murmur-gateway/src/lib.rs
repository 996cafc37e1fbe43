//! Webhook gateway: the HTTP edge that turns chat platform updates into bus
//! events.
//!
//! The gateway never talks to the transcription pipeline directly. It
//! validates the update, resolves media to a locally mounted path, and
//! publishes either `file.received` or `send.affirmation`. Everything
//! downstream happens on the bus.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use murmur_bus::{Envelope, MessageBus};
use murmur_core::subjects;
use murmur_runtime::ShutdownSignal;
use murmur_telegram::ChatApi;


const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Reply text attached when a media file cannot be resolved.
const FILE_UNAVAILABLE_ERROR: &str = "Oops! Couldn't get that one.";

/// Local directories where the Bot API server mounts downloaded media, one
/// per media kind.
#[derive(Debug, Clone)]
pub struct MediaMounts {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub video_note: PathBuf,
    pub voice: PathBuf,
}

impl MediaMounts {
    /// Standard layout of a local Bot API data directory.
    pub fn under_bot_api_root(root: &Path, token: &str) -> Self {
        let base = root.join(token);
        Self {
            video: base.join("videos"),
            audio: base.join("music"),
            video_note: base.join("video_notes"),
            voice: base.join("voice"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Expected value of the Telegram secret-token header. `None` disables
    /// the check.
    pub secret_token: Option<String>,
    /// Sender ids allowed to use the bot. Everyone else is acknowledged and
    /// ignored.
    pub whitelist: Vec<i64>,
    pub mounts: MediaMounts,
}

pub struct GatewayState {
    config: GatewayConfig,
    bus: Arc<MessageBus>,
    chat: Arc<dyn ChatApi>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, bus: Arc<MessageBus>, chat: Arc<dyn ChatApi>) -> Self {
        Self { config, bus, chat }
    }
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/webhook/telegram", post(handle_telegram_webhook))
        .route("/webhook/telegram/", post(handle_telegram_webhook))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

/// Serves the gateway until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to read gateway listener address")?;
    tracing::info!(%local_addr, "webhook gateway listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("webhook gateway server exited unexpectedly")
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

async fn handle_telegram_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    if let Some(expected) = state.config.secret_token.as_deref() {
        let observed = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or("");
        if observed != expected.trim() {
            tracing::warn!("webhook secret mismatch");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error":"invalid secret token"})),
            );
        }
    }

    let update: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(%error, "failed to decode webhook body");
            return (StatusCode::BAD_REQUEST, Json(json!({"error":"invalid json"})));
        }
    };

    match process_update(&state, &update).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok"}))),
        Err(error) => {
            tracing::error!(%error, "failed to process webhook update");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"internal server error"})),
            )
        }
    }
}

async fn process_update(state: &GatewayState, update: &Value) -> Result<()> {
    let message = match update.get("message") {
        Some(message) => message,
        None => {
            tracing::debug!("update without message, ignoring");
            return Ok(());
        }
    };
    let from_id = match message.pointer("/from/id").and_then(Value::as_i64) {
        Some(id) => id,
        None => {
            tracing::debug!("message without sender id, ignoring");
            return Ok(());
        }
    };
    if !state.config.whitelist.contains(&from_id) {
        tracing::info!(from_id, "sender not whitelisted, ignoring");
        return Ok(());
    }

    let mut envelope = Envelope::new();
    envelope.insert("message_id".to_string(), message["message_id"].clone());
    envelope.insert("from_id".to_string(), json!(from_id));

    let media = media_attachment(message, &state.config.mounts);
    let (kind, file_id, mount) = match media {
        Some(found) => found,
        None => {
            tracing::info!(from_id, "non-media message, requesting affirmation");
            return state
                .bus
                .publish(subjects::SEND_AFFIRMATION, &envelope)
                .await
                .context("failed to publish affirmation request");
        }
    };

    match state.chat.get_file(file_id).await {
        Some(remote_path) => {
            let local_path = local_media_path(mount, &remote_path);
            tracing::info!(from_id, kind, path = %local_path.display(), "media file received");
            envelope.insert(
                "file_path".to_string(),
                json!(local_path.to_string_lossy()),
            );
            state
                .bus
                .publish(subjects::FILE_RECEIVED, &envelope)
                .await
                .context("failed to publish received file")
        }
        None => {
            tracing::warn!(from_id, kind, file_id, "media file unavailable, degrading");
            envelope.insert("error".to_string(), json!(FILE_UNAVAILABLE_ERROR));
            state
                .bus
                .publish(subjects::SEND_AFFIRMATION, &envelope)
                .await
                .context("failed to publish affirmation request")
        }
    }
}

/// Picks the first media attachment on a message, in fixed precedence
/// order, and pairs it with its mount directory.
fn media_attachment<'a>(
    message: &'a Value,
    mounts: &'a MediaMounts,
) -> Option<(&'static str, &'a str, &'a Path)> {
    let kinds: [(&'static str, &Path); 4] = [
        ("video", &mounts.video),
        ("voice", &mounts.voice),
        ("audio", &mounts.audio),
        ("video_note", &mounts.video_note),
    ];
    for (kind, mount) in kinds {
        if let Some(file_id) = message
            .get(kind)
            .and_then(|media| media.get("file_id"))
            .and_then(Value::as_str)
        {
            return Some((kind, file_id, mount));
        }
    }
    None
}

/// Maps a Bot API server file path onto the local mount by basename.
fn local_media_path(mount: &Path, remote_path: &str) -> PathBuf {
    match Path::new(remote_path).file_name() {
        Some(name) => mount.join(name),
        None => mount.join(remote_path),
    }
}
