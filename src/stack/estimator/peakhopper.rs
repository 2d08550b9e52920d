//! Peakhopper RTO.
//!
//! The RTO jumps to cover RTT peaks at once and then decays slowly. A
//! booster B in `[0.125, 1]` grows with the relative size of an RTT jump and
//! shrinks by a quarter on every sample; the RTO is the larger of the
//! decayed previous RTO and `(1 + B) × RTT`.

use std::time::Duration;

use super::RtoEstimator;
use crate::config::NetworkConfig;
use crate::stack::remote::{EstimatorKind, RemoteEndpoint};
use crate::stack::timing::{as_millis_f64, from_millis_f64};

const BOOSTER_MIN: f64 = 0.125;
const BOOSTER_MAX: f64 = 1.0;
const BOOSTER_DECAY: f64 = 0.75;
const RTO_DECAY: f64 = 0.875;

/// Per-peer estimator memory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PeakhopperState {
    last_rtt_ms: f64,
    booster: f64,
}

impl PeakhopperState {
    /// Current booster.
    pub fn booster(&self) -> f64 {
        self.booster
    }
}

/// Peakhopper RTO estimator.
#[derive(Debug, Clone)]
pub struct PeakhopperRto {
    scale: f64,
}

impl PeakhopperRto {
    /// Backoff factor from `config`.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            scale: config.ack_timeout_scale,
        }
    }
}

impl RtoEstimator for PeakhopperRto {
    type State = PeakhopperState;

    fn name(&self) -> &'static str {
        "PeakhopperRto"
    }

    fn initialize(&self, rtt: Duration, _kind: EstimatorKind, remote: &mut RemoteEndpoint<PeakhopperState>) {
        let rtt = as_millis_f64(rtt);
        let state = remote.memory_mut();
        state.last_rtt_ms = rtt;
        state.booster = BOOSTER_MAX;

        remote.update_rto(from_millis_f64((1.0 + BOOSTER_MAX) * rtt));
    }

    fn update(&self, rtt: Duration, _kind: EstimatorKind, remote: &mut RemoteEndpoint<PeakhopperState>) {
        let rtt = as_millis_f64(rtt);
        let previous_rto = as_millis_f64(remote.estimated_rto());
        let state = remote.memory_mut();

        let jump = if state.last_rtt_ms > 0.0 {
            (rtt - state.last_rtt_ms) / state.last_rtt_ms
        } else {
            0.0
        };
        state.booster = (state.booster * BOOSTER_DECAY)
            .max(jump)
            .clamp(BOOSTER_MIN, BOOSTER_MAX);
        state.last_rtt_ms = rtt;

        let rto = (previous_rto * RTO_DECAY).max((1.0 + state.booster) * rtt);
        remote.update_rto(from_millis_f64(rto));
    }

    fn calculate_vbf(&self, _rto: Duration) -> f64 {
        self.scale
    }
}
