//! Rate-limited, failure-classified access to the OpenAI API.
//!
//! All outbound calls pass through a shared [`StrictLimiter`] and, for the
//! transcription path, a [`RateLimitedExecutor`] that retries per failure
//! class and degrades to an explicit unavailable outcome instead of
//! erroring. Callers never need failure-specific handling.

mod client;
mod executor;
mod limiter;

#[cfg(test)]
mod tests;

pub use client::{
    AffirmationSource, OpenAiClient, OpenAiConfig, SpeechToText, DEFAULT_AFFIRMATION,
};
pub use executor::{CallFailure, CallOutcome, RateLimitedExecutor, RetryPolicy};
pub use limiter::StrictLimiter;
