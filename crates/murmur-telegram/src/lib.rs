//! Telegram Bot API client with strict outbound rate limits.
//!
//! Telegram enforces roughly 30 API calls per second overall and one
//! message per second per chat. Both ceilings are modelled as
//! [`StrictLimiter`]s so concurrent handlers serialize cleanly instead of
//! tripping remote 429s.

mod client;
mod split;

#[cfg(test)]
mod tests;

pub use client::{ChatApi, TelegramClient, TelegramConfig};
pub use split::{split_message, MAX_MESSAGE_LENGTH};

pub(crate) use murmur_openai::StrictLimiter;
