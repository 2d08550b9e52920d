//! Transmission parameter defaults.
//!
//! These are the values of RFC 7252 section 4.8 plus the limits the
//! congestion control layer applies. Every one of them can be overridden
//! through [`NetworkConfig`](crate::config::NetworkConfig).

use std::time::Duration;

// =============================================================================
// RFC 7252 TRANSMISSION PARAMETERS
// =============================================================================

/// Initial retransmission timeout before any RTT sample exists.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Upper bound multiplier for dithering the initial timeout.
pub const ACK_RANDOM_FACTOR: f64 = 1.5;

/// Default backoff factor applied to the timeout on each retransmission.
pub const ACK_TIMEOUT_SCALE: f64 = 2.0;

/// Retransmission attempts before an exchange is declared failed.
pub const MAX_RETRANSMIT: u32 = 4;

/// Outstanding confirmable exchanges allowed per peer.
pub const NSTART: u32 = 1;

// =============================================================================
// CONGESTION CONTROL LIMITS
// =============================================================================

/// Floor for any estimated or backed-off RTO.
pub const MIN_RTO: Duration = Duration::from_millis(100);

/// Hard ceiling for any retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_millis(60000);

/// Capacity of each per-peer queue (confirmable and non-confirmable).
pub const EXCHANGE_LIMIT: usize = 50;

/// Non-confirmables sent in a row before one is promoted to confirmable.
pub const MAX_SUCCESSIVE_NONS: u32 = 7;

/// Lifetime of per-exchange bookkeeping before it is swept.
pub const MAX_TRANSACTION_DURATION: Duration = Duration::from_secs(255);

// =============================================================================
// MESSAGE LIMITS
// =============================================================================

/// Longest ETag option value in bytes.
pub const MAX_ETAG_LENGTH: usize = 8;

/// Shortest ETag option value in bytes.
pub const MIN_ETAG_LENGTH: usize = 1;
