//! # coap-cocoa
//!
//! Reliability and congestion control core of a CoAP stack.
//!
//! - **Reliability**: confirmable messages are retransmitted with exponential
//!   backoff until answered or `MAX_RETRANSMIT` is reached
//! - **Admission**: at most `NSTART` confirmable exchanges in flight per peer,
//!   the rest wait in a bounded FIFO queue
//! - **Pacing**: non-confirmable traffic leaves at one message per RTO
//! - **Estimation**: RTT samples feed a pluggable RTO estimator (CoCoA by
//!   default, plus Linux, Peakhopper and basic variants)
//!
//! Serialization and sockets live elsewhere: messages leave through an
//! [`Outbox`](core::Outbox) and replies are fed back through
//! [`MessageLayer`](core::MessageLayer).
//!
//! ## Feature Flags
//!
//! - `config` (default): load [`NetworkConfig`](config::NetworkConfig) from TOML
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types and collaborator traits
//! - [`config`]: Network configuration
//! - [`message`]: Minimal typed message model
//! - [`stack`]: Layers, exchanges, per-peer state, estimators and scheduler
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use coap_cocoa::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NetworkConfig::builder()
//!     .congestion_control(true)
//!     .algorithm(CongestionControlAlgorithm::Cocoa)
//!     .build()?;
//!
//! let (outbox, mut wire) = ChannelOutbox::new();
//! let scheduler = Scheduler::new(tokio::runtime::Handle::current());
//! let stack = build_stack(config, scheduler, Arc::new(outbox));
//!
//! let exchange = Arc::new(Exchange::local("192.0.2.1:5683".parse()?));
//! stack.send_request(&exchange, Request::new(Method::Get));
//!
//! let sent = wire.recv().await.expect("transmission");
//! assert_eq!(sent.exchange, exchange.id());
//!
//! let response = Response::new(ResponseCode::CONTENT).with_type(MessageType::Ack);
//! stack.receive_response(&exchange, response);
//! assert!(exchange.is_complete());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod config;
pub mod message;
pub mod stack;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::config::{CongestionControlAlgorithm, NetworkConfig, NetworkConfigBuilder};
    pub use crate::message::{
        EmptyMessage, Etag, MessageType, Method, OutboundMessage, Request, Response, ResponseCode,
    };
    pub use crate::stack::{
        ChannelOutbox, CongestionControlLayer, EstimatorKind, Exchange, ExchangeId,
        ExchangeOutcome, Origin, ReliabilityLayer, RemoteEndpointSnapshot, RtoEstimator,
        Scheduler, Transmission, build_stack,
    };
}

// Re-export commonly used items at crate root
pub use config::NetworkConfig;
pub use core::{CoapError, ConfigError, ExchangeObserver, MessageLayer, Outbox};
pub use stack::{Exchange, ExchangeOutcome, build_stack};
