//! Wire formats of bus messages.
//!
//! Facts carry the event id as a one-element MessagePack array so payloads
//! stay compatible with instances that index struct fields by position.
//! Beats are the publishing host's identity as raw UTF-8.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{BusError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct FactMessage {
    id: String,
}

/// Encode a delivered/purchased fact for `event_id`.
pub fn encode_fact(channel: &str, event_id: &str) -> Result<Bytes> {
    let msg = FactMessage {
        id: event_id.to_owned(),
    };
    rmp_serde::to_vec(&msg)
        .map(Bytes::from)
        .map_err(|e| BusError::codec(channel, e))
}

/// Decode a fact payload into its event id.
pub fn decode_fact(channel: &str, payload: &[u8]) -> Result<String> {
    let msg: FactMessage = rmp_serde::from_slice(payload).map_err(|e| BusError::codec(channel, e))?;
    if msg.id.is_empty() {
        return Err(BusError::codec(channel, "fact has an empty event id"));
    }
    Ok(msg.id)
}

/// Encode a liveness beat.
pub fn encode_beat(host: &str) -> Bytes {
    Bytes::copy_from_slice(host.as_bytes())
}

/// Decode a liveness beat into the publishing host's identity.
pub fn decode_beat(channel: &str, payload: &[u8]) -> Result<String> {
    std::str::from_utf8(payload)
        .map(str::to_owned)
        .map_err(|e| BusError::codec(channel, e))
}
