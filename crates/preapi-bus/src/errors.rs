//! Bus error types.

use thiserror::Error;

/// Errors raised by bus transports and codecs.
#[derive(Debug, Error)]
pub enum BusError {
    /// The endpoint could not be reached.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },
    /// A channel subscription could not be established.
    #[error("failed to subscribe to {channel} on {endpoint}: {reason}")]
    Subscribe {
        /// Endpoint holding the subscription.
        endpoint: String,
        /// Channel name.
        channel: String,
        /// Underlying failure.
        reason: String,
    },
    /// A message could not be published.
    #[error("failed to publish to {channel}: {reason}")]
    Publish {
        /// Channel name.
        channel: String,
        /// Underlying failure.
        reason: String,
    },
    /// A payload did not match the channel's wire format.
    #[error("malformed message on {channel}: {reason}")]
    Codec {
        /// Channel the payload arrived on.
        channel: String,
        /// What failed to decode.
        reason: String,
    },
}

impl BusError {
    /// Shorthand for [`BusError::Connect`].
    pub fn connect(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`BusError::Publish`].
    pub fn publish(channel: impl Into<String>, reason: impl ToString) -> Self {
        Self::Publish {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`BusError::Codec`].
    pub fn codec(channel: impl Into<String>, reason: impl ToString) -> Self {
        Self::Codec {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;
