//! Linux TCP style RTO.
//!
//! Tracks SRTT and the mean deviation (mdev) like `tcp_rtt_estimator`, keeps
//! the largest recent deviation in `mdev_max`, and lets RTTVAR follow it up
//! immediately and down slowly. RTO = SRTT + 4 × RTTVAR, with `mdev_max`
//! never below 50 ms so the RTO stays at least 200 ms above SRTT.

use std::time::Duration;

use super::RtoEstimator;
use crate::config::NetworkConfig;
use crate::stack::remote::{EstimatorKind, RemoteEndpoint};
use crate::stack::timing::{as_millis_f64, from_millis_f64};

const MDEV_FLOOR_MS: f64 = 50.0;

/// Per-peer estimator memory, all in milliseconds.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LinuxState {
    srtt: f64,
    mdev: f64,
    mdev_max: f64,
    rttvar: f64,
}

impl LinuxState {
    /// Smoothed RTT in milliseconds.
    pub fn srtt_ms(&self) -> f64 {
        self.srtt
    }

    /// RTT variance in milliseconds.
    pub fn rttvar_ms(&self) -> f64 {
        self.rttvar
    }

    fn rto(&self) -> Duration {
        from_millis_f64(self.srtt + 4.0 * self.rttvar)
    }
}

/// Linux-style RTO estimator.
#[derive(Debug, Clone)]
pub struct LinuxRto {
    scale: f64,
}

impl LinuxRto {
    /// Backoff factor from `config`.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            scale: config.ack_timeout_scale,
        }
    }
}

impl RtoEstimator for LinuxRto {
    type State = LinuxState;

    fn name(&self) -> &'static str {
        "LinuxRto"
    }

    fn initialize(&self, rtt: Duration, _kind: EstimatorKind, remote: &mut RemoteEndpoint<LinuxState>) {
        let rtt = as_millis_f64(rtt);
        let state = remote.memory_mut();
        state.srtt = rtt;
        state.mdev = rtt / 2.0;
        state.mdev_max = state.mdev.max(MDEV_FLOOR_MS);
        state.rttvar = state.mdev_max;

        let rto = state.rto();
        remote.update_rto(rto);
    }

    fn update(&self, rtt: Duration, _kind: EstimatorKind, remote: &mut RemoteEndpoint<LinuxState>) {
        let rtt = as_millis_f64(rtt);
        let state = remote.memory_mut();

        let err = rtt - state.srtt;
        state.srtt += err / 8.0;

        let deviation = err.abs();
        if err < 0.0 && deviation > state.mdev {
            // RTT dropped sharply: do not let that inflate the variance.
            state.mdev += (deviation - state.mdev) / 32.0;
        } else {
            state.mdev += (deviation - state.mdev) / 4.0;
        }

        if state.mdev > state.mdev_max {
            state.mdev_max = state.mdev;
            if state.mdev_max > state.rttvar {
                state.rttvar = state.mdev_max;
            }
        } else {
            state.rttvar -= (state.rttvar - state.mdev_max) / 4.0;
            state.mdev_max = state.mdev.max(MDEV_FLOOR_MS);
        }

        let rto = state.rto();
        remote.update_rto(rto);
    }

    fn calculate_vbf(&self, _rto: Duration) -> f64 {
        self.scale
    }
}
