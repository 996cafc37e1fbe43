//! Binary entry point: assembles the bus, clients, handlers, gateway, and
//! scheduler under one supervisor.

mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use murmur_bus::{MessageBus, NatsConfig, NatsTransport};
use murmur_core::init_tracing;
use murmur_gateway::{GatewayConfig, GatewayState, MediaMounts};
use murmur_media::FfmpegConverter;
use murmur_openai::{
    AffirmationSource, OpenAiClient, OpenAiConfig, RetryPolicy, SpeechToText, StrictLimiter,
};
use murmur_runtime::{JobScheduler, ServiceSupervisor};
use murmur_telegram::{ChatApi, TelegramClient, TelegramConfig};

use crate::args::MurmurArgs;

const OPENAI_CALLS_PER_SECOND: u32 = 60;
const SCHEDULER_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    init_tracing();
    let args = MurmurArgs::parse();
    if let Err(error) = run(args).await {
        tracing::error!(?error, "murmur exited with a fatal error");
        std::process::exit(1);
    }
}

async fn run(args: MurmurArgs) -> Result<()> {
    if args.whitelist.is_empty() {
        tracing::warn!("whitelist is empty, every sender will be ignored");
    }

    let bus = Arc::new(MessageBus::new(Box::new(NatsTransport::new(NatsConfig {
        url: args.nats_url.clone(),
        name: args.nats_name.clone(),
    }))));

    let telegram = Arc::new(
        TelegramClient::new(TelegramConfig {
            api_base: args.telegram_api_base.clone(),
            token: args.telegram_token.clone(),
            ..TelegramConfig::default()
        })
        .context("failed to build Telegram client")?,
    );

    let openai = Arc::new(
        OpenAiClient::new(
            OpenAiConfig {
                api_base: args.openai_api_base.clone(),
                api_key: args.openai_token.clone(),
                ..OpenAiConfig::default()
            },
            Arc::new(StrictLimiter::per_second(OPENAI_CALLS_PER_SECOND)),
            RetryPolicy::default(),
        )
        .context("failed to build OpenAI client")?,
    );

    tokio::fs::create_dir_all(&args.audio_dir)
        .await
        .with_context(|| format!("failed to create audio dir {}", args.audio_dir.display()))?;
    let converter = Arc::new(FfmpegConverter::new(args.audio_dir.clone()));

    murmur_handlers::register_all(
        &bus,
        converter,
        Arc::clone(&openai) as Arc<dyn SpeechToText>,
        Arc::clone(&openai) as Arc<dyn AffirmationSource>,
        Arc::clone(&telegram) as Arc<dyn ChatApi>,
    )
    .await
    .context("failed to register event handlers")?;

    let gateway_state = Arc::new(GatewayState::new(
        GatewayConfig {
            secret_token: args.telegram_secret.clone(),
            whitelist: args.whitelist.clone(),
            mounts: MediaMounts::under_bot_api_root(&args.bot_api_root, &args.telegram_token),
        },
        Arc::clone(&bus),
        Arc::clone(&telegram) as Arc<dyn ChatApi>,
    ));
    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind gateway to {}", args.bind))?;

    // No periodic jobs ship today; the scheduler still runs so maintenance
    // jobs can be added without re-plumbing the supervisor.
    let scheduler = JobScheduler::new(SCHEDULER_POLL_INTERVAL);
    scheduler.start();

    let mut supervisor = ServiceSupervisor::new();
    supervisor.attach_scheduler(Arc::clone(&scheduler));

    let bus_shutdown = supervisor.shutdown_signal();
    let serve_bus = Arc::clone(&bus);
    supervisor.spawn("message-bus", async move {
        serve_bus
            .serve(async move { bus_shutdown.wait().await })
            .await?;
        Ok(())
    });

    let gateway_shutdown = supervisor.shutdown_signal();
    supervisor.spawn(
        "webhook-gateway",
        murmur_gateway::serve(listener, gateway_state, gateway_shutdown),
    );

    supervisor.run().await
}
