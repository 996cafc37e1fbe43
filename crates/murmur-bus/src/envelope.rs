use bytes::Bytes;
use serde_json::{Map, Value};

use crate::BusError;

/// Structured payload carried on a subject: a JSON object.
///
/// The bus enforces no schema; each handler owns the interpretation of the
/// envelopes it receives.
pub type Envelope = Map<String, Value>;

/// Decodes a wire payload into an [`Envelope`].
///
/// An empty body decodes to an empty envelope. Anything that is valid JSON
/// but not an object is rejected.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, BusError> {
    if payload.is_empty() {
        return Ok(Envelope::new());
    }
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        _ => Err(BusError::NotAnObject),
    }
}

/// Serializes an [`Envelope`] for the wire.
pub fn encode_envelope(envelope: &Envelope) -> Bytes {
    // A map of JSON values cannot fail to serialize.
    Bytes::from(serde_json::to_vec(envelope).unwrap_or_default())
}

/// Builds the reply envelope sent when a responder fails.
pub fn error_envelope(message: &str) -> Envelope {
    let mut envelope = Envelope::new();
    envelope.insert("error".to_string(), Value::String(message.to_string()));
    envelope
}
