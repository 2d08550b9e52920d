//! Error types for the CoAP core.
//!
//! Only construction-time validation produces these. Everything that happens
//! on timers or queues is resolved inside the stack and shows up, if at all,
//! as an [`ExchangeOutcome`](crate::stack::ExchangeOutcome).

use thiserror::Error;

use crate::message::MessageType;

/// Errors raised while building messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoapError {
    /// ETag value has an illegal length.
    #[error("ETags must be between {min} and {max} bytes long but is {actual}")]
    InvalidEtagLength {
        /// Shortest allowed length.
        min: usize,
        /// Longest allowed length.
        max: usize,
        /// Length that was passed.
        actual: usize,
    },

    /// Notifications can only be sent as CON or NON.
    #[error("only CON and NON notifications are allowed, got {0:?}")]
    InvalidNotificationType(MessageType),

    /// Empty messages are only ever ACK or RST in this core.
    #[error("empty message must be ACK or RST, got {0:?}")]
    InvalidEmptyMessageType(MessageType),
}

/// Errors raised while loading or validating a [`NetworkConfig`](crate::config::NetworkConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of its legal range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The configuration file could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[cfg(feature = "config")]
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
