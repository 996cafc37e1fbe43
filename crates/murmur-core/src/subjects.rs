//! Subject names used on the message bus.
//!
//! Subjects are compared by exact string equality; there is no wildcard
//! matching anywhere in the system.

/// Announced once by the bus serve loop after a successful connect.
pub const BUS_STARTED: &str = "bus.started";

/// An inbound media message has been resolved to a local file path.
pub const FILE_RECEIVED: &str = "file.received";

/// A transcription is ready to be delivered as a chat reply.
pub const SEND_TRANSCRIPTION: &str = "send.transcription";

/// Terminal fallback: deliver an affirmation instead of a transcription.
pub const SEND_AFFIRMATION: &str = "send.affirmation";
