//! Message layers, per-peer state and the timers that drive them.
//!
//! ```text
//! application
//!     │ send_request / send_response
//!     ▼
//! CongestionControlLayer<E>   NSTART admission, CON/NON queues, pacing, RTT samples
//!     │
//!     ▼
//! ReliabilityLayer            retransmission timers
//!     │
//!     ▼
//! Outbox                      transport
//! ```
//!
//! [`build_stack`] assembles either the bare reliability layer or a
//! congestion layer specialised for the configured estimator.

mod congestion;
pub mod estimator;
mod exchange;
mod outbox;
mod reliability;
mod remote;
mod scheduler;
pub mod timing;

use std::sync::Arc;

pub use congestion::CongestionControlLayer;
pub use estimator::RtoEstimator;
pub use exchange::{Exchange, ExchangeId, ExchangeOutcome, Origin};
pub use outbox::{ChannelOutbox, Transmission};
pub use reliability::{BinaryBackoff, ReliabilityLayer, RetransmissionTimeout};
pub use remote::{
    EstimatorKind, ExchangeInfo, RemoteEndpoint, RemoteEndpointManager, RemoteEndpointSnapshot,
    SharedRemoteEndpoint,
};
pub use scheduler::{Scheduler, TaskKey};

use crate::config::{CongestionControlAlgorithm, NetworkConfig};
use crate::core::{MessageLayer, Outbox};
use estimator::{BasicRto, Cocoa, FixedTimeout, LinuxRto, PeakhopperRto};

/// Message layer for `config`.
///
/// Without `USE_CONGESTION_CONTROL` this is a [`ReliabilityLayer`];
/// otherwise a [`CongestionControlLayer`] running the configured algorithm.
pub fn build_stack(
    config: NetworkConfig,
    scheduler: Scheduler,
    outbox: Arc<dyn Outbox>,
) -> Arc<dyn MessageLayer> {
    let config = Arc::new(config);
    if !config.use_congestion_control {
        tracing::debug!("congestion control disabled");
        return Arc::new(ReliabilityLayer::new(config, scheduler, outbox));
    }

    match config.congestion_control_algorithm {
        CongestionControlAlgorithm::None => Arc::new(CongestionControlLayer::new(
            Arc::clone(&config),
            FixedTimeout::new(&config),
            scheduler,
            outbox,
        )),
        CongestionControlAlgorithm::Cocoa => Arc::new(CongestionControlLayer::new(
            Arc::clone(&config),
            Cocoa::new(&config),
            scheduler,
            outbox,
        )),
        CongestionControlAlgorithm::CocoaStrong => Arc::new(CongestionControlLayer::new(
            Arc::clone(&config),
            Cocoa::strong_only(&config),
            scheduler,
            outbox,
        )),
        CongestionControlAlgorithm::BasicRto => Arc::new(CongestionControlLayer::new(
            Arc::clone(&config),
            BasicRto::new(&config),
            scheduler,
            outbox,
        )),
        CongestionControlAlgorithm::LinuxRto => Arc::new(CongestionControlLayer::new(
            Arc::clone(&config),
            LinuxRto::new(&config),
            scheduler,
            outbox,
        )),
        CongestionControlAlgorithm::PeakhopperRto => Arc::new(CongestionControlLayer::new(
            Arc::clone(&config),
            PeakhopperRto::new(&config),
            scheduler,
            outbox,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Method, MessageType, Request};
    use tokio::runtime::Handle;

    fn peer() -> std::net::SocketAddr {
        "10.0.0.3:5683".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_stack_does_not_pace() {
        let (outbox, mut rx) = ChannelOutbox::new();
        let stack = build_stack(
            NetworkConfig::default(),
            Scheduler::new(Handle::current()),
            Arc::new(outbox),
        );

        for _ in 0..3 {
            let exchange = Arc::new(Exchange::local(peer()));
            stack.send_request(&exchange, Request::new(Method::Get).with_type(MessageType::Non));
        }
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_algorithm_builds_a_pacing_stack() {
        for algorithm in CongestionControlAlgorithm::ALL {
            let (outbox, mut rx) = ChannelOutbox::new();
            let config = NetworkConfig::builder()
                .congestion_control(true)
                .algorithm(algorithm)
                .build()
                .unwrap();
            let stack = build_stack(config, Scheduler::new(Handle::current()), Arc::new(outbox));

            for _ in 0..3 {
                let exchange = Arc::new(Exchange::local(peer()));
                stack.send_request(&exchange, Request::new(Method::Get).with_type(MessageType::Non));
            }
            // Queued for pacing, nothing on the wire before the first tick
            assert!(rx.try_recv().is_err(), "{algorithm}");

            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            assert!(rx.try_recv().is_ok(), "{algorithm}");
        }
    }
}
