use std::time::Duration;

use super::RtoEstimator;
use crate::config::NetworkConfig;
use crate::stack::remote::{EstimatorKind, RemoteEndpoint};
use crate::stack::timing::{as_millis_f64, from_millis_f64};

const RTT_MULTIPLIER: f64 = 1.5;

/// RTO = 1.5 × the latest RTT sample.
#[derive(Debug, Clone)]
pub struct BasicRto {
    scale: f64,
}

impl BasicRto {
    /// Backoff factor from `config`.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            scale: config.ack_timeout_scale,
        }
    }
}

impl RtoEstimator for BasicRto {
    type State = ();

    fn name(&self) -> &'static str {
        "BasicRto"
    }

    fn initialize(&self, rtt: Duration, kind: EstimatorKind, remote: &mut RemoteEndpoint<()>) {
        self.update(rtt, kind, remote);
    }

    fn update(&self, rtt: Duration, _kind: EstimatorKind, remote: &mut RemoteEndpoint<()>) {
        remote.update_rto(from_millis_f64(as_millis_f64(rtt) * RTT_MULTIPLIER));
    }

    fn calculate_vbf(&self, _rto: Duration) -> f64 {
        self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::estimator::test_support::{ms, remote};

    #[test]
    fn test_follows_last_sample() {
        let estimator = BasicRto::new(&NetworkConfig::default());
        let mut remote = remote::<()>();

        estimator.initialize(ms(400), EstimatorKind::Strong, &mut remote);
        assert_eq!(remote.rto(), ms(600));

        estimator.update(ms(1000), EstimatorKind::Weak, &mut remote);
        assert_eq!(remote.rto(), ms(1500));
    }

    #[test]
    fn test_capped() {
        let estimator = BasicRto::new(&NetworkConfig::default());
        let mut remote = remote::<()>();
        estimator.update(ms(50_000), EstimatorKind::Strong, &mut remote);
        assert_eq!(remote.rto(), ms(60_000));
    }
}
