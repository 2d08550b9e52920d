//! RTO estimators.
//!
//! An [`RtoEstimator`] turns RTT samples into per-peer RTO values. The
//! congestion layer is generic over it and never looks inside the
//! estimator's per-peer memory ([`RtoEstimator::State`]).
//!
//! | Algorithm | Type | Dithering |
//! |---|---|---|
//! | `None` | [`FixedTimeout`] | no |
//! | `Cocoa` | [`Cocoa`] | yes |
//! | `CocoaStrong` | [`Cocoa::strong_only`] | yes |
//! | `BasicRto` | [`BasicRto`] | no |
//! | `LinuxRto` | [`LinuxRto`] | no |
//! | `PeakhopperRto` | [`PeakhopperRto`] | no |

mod basic;
mod cocoa;
mod fixed;
mod linux;
mod peakhopper;

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::remote::{EstimatorKind, RemoteEndpoint};

pub use basic::BasicRto;
pub use cocoa::{Cocoa, CocoaState};
pub use fixed::FixedTimeout;
pub use linux::{LinuxRto, LinuxState};
pub use peakhopper::{PeakhopperRto, PeakhopperState};

/// RTT → RTO strategy.
pub trait RtoEstimator: Send + Sync + 'static {
    /// Per-peer private memory.
    type State: Default + fmt::Debug + Send + 'static;

    /// Algorithm name as used in configuration.
    fn name(&self) -> &'static str;

    /// First sample of `kind` for this peer.
    fn initialize(&self, rtt: Duration, kind: EstimatorKind, remote: &mut RemoteEndpoint<Self::State>);

    /// Later sample of `kind` for this peer.
    fn update(&self, rtt: Duration, kind: EstimatorKind, remote: &mut RemoteEndpoint<Self::State>);

    /// Backoff factor for an exchange admitted while the RTO is `rto`.
    fn calculate_vbf(&self, rto: Duration) -> f64;

    /// Let an idle peer's RTO drift back toward the default.
    fn check_aging(&self, remote: &mut RemoteEndpoint<Self::State>, now: Instant) {
        let _ = (remote, now);
    }

    /// Whether first-attempt timeouts are randomized.
    fn applies_dithering(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::RemoteEndpoint;

    pub(crate) fn remote<S: Default>() -> RemoteEndpoint<S> {
        let peer: SocketAddr = "10.1.1.1:5683".parse().unwrap();
        RemoteEndpoint::new(peer, Duration::from_secs(2), Duration::from_secs(60), 50)
    }

    pub(crate) fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}
