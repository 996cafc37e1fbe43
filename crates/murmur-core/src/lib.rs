//! Foundational utilities shared across Murmur crates.
//!
//! Provides time helpers, the tracing bootstrap, and the bus subject names
//! the event chain is built around.

pub mod subjects;
pub mod time_utils;

pub use time_utils::current_unix_timestamp_ms;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Initialises the global tracing subscriber.
///
/// Reads `RUST_LOG` for per-target filtering and defaults to `info`.
/// Safe to call once per process; the binary is the only caller.
pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_monotonic_enough() {
        let a = current_unix_timestamp_ms();
        let b = current_unix_timestamp_ms();
        assert!(b >= a);
    }

    #[test]
    fn subjects_are_distinct() {
        let all = [
            subjects::BUS_STARTED,
            subjects::FILE_RECEIVED,
            subjects::SEND_TRANSCRIPTION,
            subjects::SEND_AFFIRMATION,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
