use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use httpmock::prelude::*;
use tokio::time::Instant;

use crate::client::{AffirmationSource, OpenAiClient, OpenAiConfig, SpeechToText};
use crate::executor::{CallFailure, CallOutcome, RateLimitedExecutor, RetryPolicy};
use crate::limiter::StrictLimiter;
use crate::DEFAULT_AFFIRMATION;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        rate_limit_fallback: Duration::from_millis(40),
        timeout_base: Duration::from_millis(10),
        connection_base: Duration::from_millis(10),
        server_base: Duration::from_millis(10),
    }
}

fn instant_executor() -> RateLimitedExecutor {
    RateLimitedExecutor::new(Arc::new(StrictLimiter::new(Duration::ZERO)), fast_policy())
}

fn client_against(server: &MockServer) -> OpenAiClient {
    let config = OpenAiConfig {
        api_base: server.url("/v1"),
        api_key: "test-key".to_string(),
        request_timeout: Duration::from_secs(5),
        ..OpenAiConfig::default()
    };
    let limiter = Arc::new(StrictLimiter::new(Duration::ZERO));
    OpenAiClient::new(config, limiter, fast_policy()).expect("client should build")
}

#[tokio::test(start_paused = true)]
async fn limiter_spaces_concurrent_callers_by_interval() {
    let limiter = Arc::new(StrictLimiter::new(Duration::from_millis(100)));
    let start = Instant::now();

    let mut admissions = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter.acquire().await;
            Instant::now()
        }));
    }
    for handle in handles {
        admissions.push(handle.await.expect("acquire task should finish"));
    }
    admissions.sort();

    assert_eq!(admissions[0] - start, Duration::ZERO);
    assert_eq!(admissions[1] - start, Duration::from_millis(100));
    assert_eq!(admissions[2] - start, Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn limiter_does_not_accumulate_burst_credit() {
    let limiter = StrictLimiter::new(Duration::from_millis(100));
    limiter.acquire().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Long idle earns nothing: after the idle period, consecutive calls are
    // still one interval apart.
    let start = Instant::now();
    limiter.acquire().await;
    assert_eq!(start.elapsed(), Duration::ZERO);
    limiter.acquire().await;
    assert_eq!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test]
async fn client_error_fails_fast_with_single_attempt() {
    let attempts = AtomicU32::new(0);
    let outcome: CallOutcome<()> = instant_executor()
        .execute("test", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CallFailure::Client { status: 404 }) }
        })
        .await;

    assert!(matches!(outcome, CallOutcome::Rejected { status: 404 }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_with_increasing_delay() {
    let executor = RateLimitedExecutor::new(
        Arc::new(StrictLimiter::new(Duration::ZERO)),
        RetryPolicy {
            max_attempts: 3,
            timeout_base: Duration::from_secs(5),
            ..RetryPolicy::default()
        },
    );
    let start = Instant::now();
    let mut attempt_times = Vec::new();

    let outcome: CallOutcome<()> = executor
        .execute("test", |_| {
            attempt_times.push(start.elapsed());
            async { Err(CallFailure::Timeout) }
        })
        .await;

    assert!(matches!(outcome, CallOutcome::Unavailable));
    // Delays grow with the attempt number: 5s after the first failure, 10s
    // after the second, none after the last.
    assert_eq!(
        attempt_times,
        vec![
            Duration::ZERO,
            Duration::from_secs(5),
            Duration::from_secs(15),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limited_failure_honors_advised_delay() {
    let executor = instant_executor();
    let start = Instant::now();
    let mut attempt_times = Vec::new();

    let _: CallOutcome<()> = executor
        .execute("test", |_| {
            attempt_times.push(start.elapsed());
            async {
                Err(CallFailure::RateLimited {
                    retry_after: Some(Duration::from_secs(7)),
                })
            }
        })
        .await;

    assert_eq!(attempt_times[1], Duration::from_secs(7));
    assert_eq!(attempt_times[2], Duration::from_secs(14));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_failure_without_advice_uses_fallback() {
    let executor = instant_executor();
    let start = Instant::now();
    let mut attempt_times = Vec::new();

    let _: CallOutcome<()> = executor
        .execute("test", |_| {
            attempt_times.push(start.elapsed());
            async { Err(CallFailure::RateLimited { retry_after: None }) }
        })
        .await;

    assert_eq!(attempt_times[1], Duration::from_millis(40));
}

#[tokio::test]
async fn success_after_transient_failure_recovers() {
    let attempts = AtomicU32::new(0);
    let outcome = instant_executor()
        .execute("test", |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err(CallFailure::Connection("reset by peer".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert!(matches!(outcome, CallOutcome::Success(2)));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unexpected_failure_is_retried_then_degrades() {
    let attempts = AtomicU32::new(0);
    let outcome: CallOutcome<()> = instant_executor()
        .execute("test", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CallFailure::Unexpected(anyhow!("parse failure"))) }
        })
        .await;

    assert!(matches!(outcome, CallOutcome::Unavailable));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(CallOutcome::<()>::Unavailable.into_option().is_none());
}

#[tokio::test]
async fn rejecting_config_without_api_key() {
    let limiter = Arc::new(StrictLimiter::new(Duration::ZERO));
    let result = OpenAiClient::new(OpenAiConfig::default(), limiter, RetryPolicy::default());
    assert!(result.is_err());
}

#[tokio::test]
async fn transcribe_unreadable_file_returns_none_without_calling_api() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/audio/transcriptions");
        then.status(200);
    });

    let client = client_against(&server);
    let result = client
        .transcribe(std::path::Path::new("/nonexistent/audio.wav"))
        .await;

    assert_eq!(result, None);
    mock.assert_calls(0);
}

#[tokio::test]
async fn transcribe_returns_text_on_success() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/audio/transcriptions");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({"text": "hello there"}));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let audio = dir.path().join("sample.wav");
    std::fs::write(&audio, b"RIFF....WAVE").expect("write audio");

    let client = client_against(&server);
    let result = client.transcribe(&audio).await;

    assert_eq!(result.as_deref(), Some("hello there"));
    mock.assert_calls(1);
}

#[tokio::test]
async fn transcribe_bad_request_is_not_retried() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/audio/transcriptions");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({"error": {"message": "bad audio"}}));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let audio = dir.path().join("sample.wav");
    std::fs::write(&audio, b"not audio").expect("write audio");

    let client = client_against(&server);
    let result = client.transcribe(&audio).await;

    assert_eq!(result, None);
    mock.assert_calls(1);
}

#[tokio::test]
async fn transcribe_server_errors_exhaust_retries() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/audio/transcriptions");
        then.status(503);
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let audio = dir.path().join("sample.wav");
    std::fs::write(&audio, b"RIFF....WAVE").expect("write audio");

    let client = client_against(&server);
    let result = client.transcribe(&audio).await;

    assert_eq!(result, None);
    mock.assert_calls(3);
}

#[tokio::test]
async fn affirmation_returns_generated_text() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({
                "choices": [{"message": {"content": "Hey! You got this, kid! 💪"}}]
            }));
    });

    let client = client_against(&server);
    assert_eq!(client.affirmation().await, "Hey! You got this, kid! 💪");
}

#[tokio::test]
async fn affirmation_degrades_to_default_on_server_error() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(500);
    });

    let client = client_against(&server);
    assert_eq!(client.affirmation().await, DEFAULT_AFFIRMATION);
    // The affirmation path never retries.
    mock.assert_calls(1);
}

#[tokio::test]
async fn affirmation_degrades_to_default_on_empty_content() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({"choices": [{"message": {"content": "  "}}]}));
    });

    let client = client_against(&server);
    assert_eq!(client.affirmation().await, DEFAULT_AFFIRMATION);
}
