//! Flip event error types.

use thiserror::Error;

/// Errors raised while decoding, repairing, or validating a flip event.
#[derive(Debug, Error)]
pub enum FlipError {
    /// The event breaks an invariant required for distribution.
    #[error("invalid flip event {event_id:?}: {reason}")]
    InvalidEvent {
        /// Identifier of the offending event (may be empty).
        event_id: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A legacy metadata shape could not be rewritten into canonical form.
    #[error("cannot repair metadata of {event_id}: {reason}")]
    MetadataRepair {
        /// Identifier of the offending event.
        event_id: String,
        /// Which part of the structure was missing or malformed.
        reason: String,
    },
    /// The binary payload was not a valid MessagePack flip event.
    #[error("failed to decode flip event: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    /// The event could not be serialized.
    #[error("failed to encode flip event: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl FlipError {
    /// Shorthand for an [`FlipError::InvalidEvent`].
    pub fn invalid(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            event_id: event_id.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`FlipError::MetadataRepair`].
    pub fn repair(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetadataRepair {
            event_id: event_id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for flip event operations.
pub type Result<T> = std::result::Result<T, FlipError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
