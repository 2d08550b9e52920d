use std::time::Duration;

use super::RtoEstimator;
use crate::config::NetworkConfig;
use crate::stack::remote::{EstimatorKind, RemoteEndpoint};

/// Plain CoAP: RTT samples are ignored and every peer keeps `ACK_TIMEOUT`.
#[derive(Debug, Clone)]
pub struct FixedTimeout {
    ack_timeout: Duration,
    scale: f64,
}

impl FixedTimeout {
    /// Timeout and backoff factor from `config`.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout,
            scale: config.ack_timeout_scale,
        }
    }
}

impl RtoEstimator for FixedTimeout {
    type State = ();

    fn name(&self) -> &'static str {
        "None"
    }

    fn initialize(&self, _rtt: Duration, _kind: EstimatorKind, remote: &mut RemoteEndpoint<()>) {
        remote.update_rto(self.ack_timeout);
    }

    fn update(&self, _rtt: Duration, _kind: EstimatorKind, remote: &mut RemoteEndpoint<()>) {
        remote.update_rto(self.ack_timeout);
    }

    fn calculate_vbf(&self, _rto: Duration) -> f64 {
        self.scale
    }
}
