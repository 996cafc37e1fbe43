use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use crate::client::{ChatApi, TelegramClient, TelegramConfig};
use crate::split::{split_message, split_with_limit, MAX_MESSAGE_LENGTH};

fn client_against(server: &MockServer) -> TelegramClient {
    TelegramClient::new(TelegramConfig {
        api_base: server.base_url(),
        token: "bot-token".to_string(),
        call_interval: Duration::ZERO,
        message_interval: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    })
    .expect("client should build")
}

#[test]
fn short_message_is_a_single_chunk() {
    assert_eq!(split_message("hello"), vec!["hello".to_string()]);
}

#[test]
fn empty_message_yields_one_empty_chunk() {
    assert_eq!(split_message(""), vec![String::new()]);
}

#[test]
fn exact_limit_is_not_split() {
    let text = "a".repeat(MAX_MESSAGE_LENGTH);
    assert_eq!(split_message(&text), vec![text]);
}

#[test]
fn oversized_message_without_whitespace_is_hard_cut() {
    let text = "a".repeat(MAX_MESSAGE_LENGTH + 10);
    let chunks = split_message(&text);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chars().count(), MAX_MESSAGE_LENGTH);
    assert_eq!(chunks[1].chars().count(), 10);
}

#[test]
fn split_prefers_late_newline() {
    // Newline at position 90 of a 100-char window, past the 80% floor.
    let text = format!("{}\n{}", "a".repeat(90), "b".repeat(60));
    let chunks = split_with_limit(&text, 100);
    assert_eq!(chunks, vec!["a".repeat(90), "b".repeat(60)]);
}

#[test]
fn split_ignores_early_newline_and_uses_space() {
    // Newline at 10 is before the floor; the last space wins instead.
    let text = format!("{}\n{} {}", "a".repeat(10), "b".repeat(59), "c".repeat(80));
    let chunks = split_with_limit(&text, 100);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chars().count(), 70);
    assert!(chunks[0].ends_with(&"b".repeat(59)));
    assert_eq!(chunks[1], "c".repeat(80));
}

#[test]
fn continuation_chunks_are_left_trimmed() {
    let text = format!("{} {}", "a".repeat(99), "b".repeat(50));
    let chunks = split_with_limit(&text, 100);
    assert_eq!(chunks, vec!["a".repeat(99), "b".repeat(50)]);
}

#[test]
fn multibyte_text_splits_on_character_count() {
    let text = "é".repeat(150);
    let chunks = split_with_limit(&text, 100);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chars().count(), 100);
    assert_eq!(chunks[1].chars().count(), 50);
}

#[tokio::test]
async fn send_message_posts_with_reply_parameters() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/botbot-token/sendMessage")
            .body_includes("\"chat_id\":42")
            .body_includes("\"text\":\"hello\"")
            .body_includes("\"reply_parameters\":{\"message_id\":7}");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "result": {"message_id": 101}}));
    });

    let client = client_against(&server);
    let result = client.send_message(42, "hello", Some(7)).await;

    assert_eq!(
        result.and_then(|value| value.get("message_id").cloned()),
        Some(json!(101))
    );
    mock.assert_calls(1);
}

#[tokio::test]
async fn send_message_without_reply_omits_reply_parameters() {
    let server = MockServer::start();
    let with_reply = server.mock(|when, then| {
        when.method(POST)
            .path("/botbot-token/sendMessage")
            .body_includes("reply_parameters");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "result": {"message_id": 101}}));
    });
    let plain = server.mock(|when, then| {
        when.method(POST).path("/botbot-token/sendMessage");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "result": {"message_id": 102}}));
    });

    let client = client_against(&server);
    let result = client.send_message(42, "hello", None).await;

    assert!(result.is_some());
    with_reply.assert_calls(0);
    plain.assert_calls(1);
}

#[tokio::test]
async fn oversized_message_sends_multiple_chunks_replying_only_once() {
    let server = MockServer::start();
    let with_reply = server.mock(|when, then| {
        when.method(POST)
            .path("/botbot-token/sendMessage")
            .body_includes("reply_parameters");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "result": {"message_id": 1}}));
    });
    let plain = server.mock(|when, then| {
        when.method(POST).path("/botbot-token/sendMessage");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "result": {"message_id": 2}}));
    });

    let client = client_against(&server);
    let text = "a".repeat(MAX_MESSAGE_LENGTH + 10);
    let result = client.send_message(42, &text, Some(7)).await;

    assert!(result.is_some());
    with_reply.assert_calls(1);
    plain.assert_calls(1);
}

#[tokio::test]
async fn send_message_returns_none_when_api_reports_failure() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/botbot-token/sendMessage");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": false, "description": "Bad Request"}));
    });

    let client = client_against(&server);
    assert!(client.send_message(42, "hello", None).await.is_none());
}

#[tokio::test]
async fn get_file_returns_server_side_path() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/botbot-token/getFile")
            .body_includes("\"file_id\":\"abc123\"");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "ok": true,
                "result": {"file_id": "abc123", "file_path": "voice/file_7.oga"}
            }));
    });

    let client = client_against(&server);
    assert_eq!(
        client.get_file("abc123").await.as_deref(),
        Some("voice/file_7.oga")
    );
    mock.assert_calls(1);
}

#[tokio::test]
async fn get_file_failure_degrades_to_none() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/botbot-token/getFile");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({"ok": false, "description": "file not found"}));
    });

    let client = client_against(&server);
    assert!(client.get_file("missing").await.is_none());
}

#[test]
fn rejecting_config_without_token() {
    assert!(TelegramClient::new(TelegramConfig::default()).is_err());
}
