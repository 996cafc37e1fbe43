use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "murmur",
    about = "Event-driven voice transcription bot backend",
    version
)]
pub struct MurmurArgs {
    #[arg(
        long,
        env = "NATS_URL",
        default_value = "nats://127.0.0.1:4222",
        help = "NATS server URL"
    )]
    pub nats_url: String,

    #[arg(
        long,
        env = "NATS_NAME",
        default_value = "murmur",
        help = "Connection name reported to the broker"
    )]
    pub nats_name: String,

    #[arg(long, env = "TELEGRAM_TOKEN", help = "Telegram bot token")]
    pub telegram_token: String,

    #[arg(
        long,
        env = "TELEGRAM_API_BASE",
        default_value = "http://127.0.0.1:8081",
        help = "Base URL of the local Bot API server"
    )]
    pub telegram_api_base: String,

    #[arg(
        long,
        env = "TELEGRAM_SECRET",
        help = "Expected webhook secret token; omit to disable the check"
    )]
    pub telegram_secret: Option<String>,

    #[arg(
        long,
        env = "TELEGRAM_WHITELIST",
        value_delimiter = ',',
        help = "Sender ids allowed to use the bot"
    )]
    pub whitelist: Vec<i64>,

    #[arg(long, env = "OPENAI_TOKEN", help = "OpenAI API key")]
    pub openai_token: String,

    #[arg(
        long,
        env = "OPENAI_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL for the OpenAI API"
    )]
    pub openai_api_base: String,

    #[arg(
        long,
        env = "MURMUR_BIND",
        default_value = "127.0.0.1:8000",
        help = "Webhook gateway bind address"
    )]
    pub bind: SocketAddr,

    #[arg(
        long,
        env = "BOT_API_ROOT",
        default_value = "/var/lib/telegram-bot-api",
        help = "Root of the Bot API server's local data directory"
    )]
    pub bot_api_root: PathBuf,

    #[arg(
        long,
        env = "MURMUR_AUDIO_DIR",
        default_value = "audios",
        help = "Working directory for converted audio"
    )]
    pub audio_dir: PathBuf,
}
