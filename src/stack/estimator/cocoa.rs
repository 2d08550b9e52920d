//! CoCoA (draft-bormann-core-cocoa-02).
//!
//! Two RFC 6298 estimators per peer: a strong one fed by samples from
//! first transmissions (K = 4) and a weak one fed by samples taken after one
//! or two retransmissions (K = 1). Each new estimate is blended into the
//! overall RTO, the weak one with less weight.

use std::time::Duration;

use tokio::time::Instant;

use super::RtoEstimator;
use crate::config::NetworkConfig;
use crate::stack::remote::{EstimatorKind, RemoteEndpoint};
use crate::stack::timing::{RttStats, as_millis_f64, from_millis_f64};

const STRONG_K: f64 = 4.0;
const WEAK_K: f64 = 1.0;

const STRONG_WEIGHT: f64 = 0.5;
const WEAK_WEIGHT: f64 = 0.25;

const LOW_RTO: Duration = Duration::from_secs(1);
const HIGH_RTO: Duration = Duration::from_secs(3);

const LOW_RTO_VBF: f64 = 3.0;
const HIGH_RTO_VBF: f64 = 1.5;
const DEFAULT_VBF: f64 = 2.0;

/// Idle multiples of the RTO after which aging kicks in.
const LOW_RTO_AGING: u32 = 16;
const HIGH_RTO_AGING: u32 = 4;

/// Per-peer estimator memory.
#[derive(Debug, Default, Clone)]
pub struct CocoaState {
    strong: Option<RttStats>,
    weak: Option<RttStats>,
}

impl CocoaState {
    /// Strong estimator, once it has a sample.
    pub fn strong(&self) -> Option<&RttStats> {
        self.strong.as_ref()
    }

    /// Weak estimator, once it has a sample.
    pub fn weak(&self) -> Option<&RttStats> {
        self.weak.as_ref()
    }
}

/// CoCoA RTO estimator.
#[derive(Debug, Clone)]
pub struct Cocoa {
    default_rto: Duration,
    strong_only: bool,
}

impl Cocoa {
    /// Full CoCoA with strong and weak estimators.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            default_rto: config.ack_timeout,
            strong_only: false,
        }
    }

    /// CoCoA-S: weak samples are discarded.
    pub fn strong_only(config: &NetworkConfig) -> Self {
        Self {
            default_rto: config.ack_timeout,
            strong_only: true,
        }
    }

    fn sample(&self, rtt: Duration, kind: EstimatorKind, remote: &mut RemoteEndpoint<CocoaState>) {
        let (slot, k, weight) = match kind {
            EstimatorKind::Strong => (&mut remote.memory_mut().strong, STRONG_K, STRONG_WEIGHT),
            EstimatorKind::Weak if !self.strong_only => {
                (&mut remote.memory_mut().weak, WEAK_K, WEAK_WEIGHT)
            }
            _ => {
                tracing::trace!(peer = %remote.peer(), ?kind, "sample discarded");
                return;
            }
        };

        let estimate = if let Some(stats) = slot.as_mut() {
            stats.update(rtt);
            stats.rto()
        } else {
            let stats = RttStats::first(rtt, k);
            let rto = stats.rto();
            *slot = Some(stats);
            rto
        };

        let overall = weight * as_millis_f64(estimate)
            + (1.0 - weight) * as_millis_f64(remote.estimated_rto());
        remote.update_rto(from_millis_f64(overall));
    }
}

impl RtoEstimator for Cocoa {
    type State = CocoaState;

    fn name(&self) -> &'static str {
        if self.strong_only {
            "CocoaStrong"
        } else {
            "Cocoa"
        }
    }

    fn initialize(&self, rtt: Duration, kind: EstimatorKind, remote: &mut RemoteEndpoint<CocoaState>) {
        self.sample(rtt, kind, remote);
    }

    fn update(&self, rtt: Duration, kind: EstimatorKind, remote: &mut RemoteEndpoint<CocoaState>) {
        self.sample(rtt, kind, remote);
    }

    fn calculate_vbf(&self, rto: Duration) -> f64 {
        if rto < LOW_RTO {
            LOW_RTO_VBF
        } else if rto > HIGH_RTO {
            HIGH_RTO_VBF
        } else {
            DEFAULT_VBF
        }
    }

    fn check_aging(&self, remote: &mut RemoteEndpoint<CocoaState>, now: Instant) {
        let rto = remote.estimated_rto();
        let idle = now.saturating_duration_since(remote.last_rto_update());

        if rto < LOW_RTO && idle > rto * LOW_RTO_AGING {
            tracing::debug!(peer = %remote.peer(), rto_ms = rto.as_millis() as u64, "aging small rto");
            remote.update_rto(rto * 2);
        } else if rto > HIGH_RTO && idle > rto * HIGH_RTO_AGING {
            tracing::debug!(peer = %remote.peer(), rto_ms = rto.as_millis() as u64, "aging large rto");
            remote.update_rto((self.default_rto + rto) / 2);
        }
    }

    fn applies_dithering(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::estimator::test_support::{ms, remote};

    fn cocoa() -> Cocoa {
        Cocoa::new(&NetworkConfig::default())
    }

    #[test]
    fn test_first_strong_sample_blends_with_default() {
        let estimator = cocoa();
        let mut remote = remote::<CocoaState>();

        // E_strong = 100 + 4 * 50 = 300, overall = 0.5 * 300 + 0.5 * 2000
        estimator.initialize(ms(100), EstimatorKind::Strong, &mut remote);
        assert_eq!(remote.rto(), ms(1150));
        assert!(remote.memory().strong().is_some());
        assert!(remote.memory().weak().is_none());
    }

    #[test]
    fn test_weak_sample_has_less_weight() {
        let estimator = cocoa();
        let mut remote = remote::<CocoaState>();

        // E_weak = 1000 + 1 * 500, overall = 0.25 * 1500 + 0.75 * 2000
        estimator.initialize(ms(1000), EstimatorKind::Weak, &mut remote);
        assert_eq!(remote.rto(), ms(1875));
    }

    #[test]
    fn test_converges_toward_stable_rtt() {
        let estimator = cocoa();
        let mut remote = remote::<CocoaState>();

        estimator.initialize(ms(200), EstimatorKind::Strong, &mut remote);
        for _ in 0..40 {
            estimator.update(ms(200), EstimatorKind::Strong, &mut remote);
        }
        assert!(remote.rto() < ms(400), "rto = {:?}", remote.rto());
        assert!(remote.rto() >= ms(200));
    }

    #[test]
    fn test_strong_only_discards_weak() {
        let estimator = Cocoa::strong_only(&NetworkConfig::default());
        assert_eq!(estimator.name(), "CocoaStrong");
        let mut remote = remote::<CocoaState>();

        estimator.initialize(ms(1000), EstimatorKind::Weak, &mut remote);
        assert_eq!(remote.rto(), ms(2000));
        assert!(remote.memory().weak().is_none());
    }

    #[test]
    fn test_no_estimator_discarded() {
        let estimator = cocoa();
        let mut remote = remote::<CocoaState>();
        estimator.update(ms(10), EstimatorKind::NoEstimator, &mut remote);
        assert_eq!(remote.rto(), ms(2000));
    }

    #[test]
    fn test_vbf_bands() {
        let estimator = cocoa();
        assert_eq!(estimator.calculate_vbf(ms(500)), 3.0);
        assert_eq!(estimator.calculate_vbf(ms(1000)), 2.0);
        assert_eq!(estimator.calculate_vbf(ms(3000)), 2.0);
        assert_eq!(estimator.calculate_vbf(ms(3500)), 1.5);
        assert!(estimator.applies_dithering());
    }

    #[test]
    fn test_aging_small_rto_doubles() {
        let estimator = cocoa();
        let mut remote = remote::<CocoaState>();
        remote.update_rto(ms(500));
        let updated = remote.last_rto_update();

        // 16 * 500 ms is not exceeded yet
        estimator.check_aging(&mut remote, updated + ms(8000));
        assert_eq!(remote.rto(), ms(500));

        estimator.check_aging(&mut remote, updated + ms(8001));
        assert_eq!(remote.rto(), ms(1000));
    }

    #[test]
    fn test_aging_large_rto_moves_toward_default() {
        let estimator = cocoa();
        let mut remote = remote::<CocoaState>();
        remote.update_rto(ms(6000));
        let updated = remote.last_rto_update();

        estimator.check_aging(&mut remote, updated + ms(24_001));
        assert_eq!(remote.rto(), ms(4000));
    }

    #[test]
    fn test_aging_leaves_mid_band_alone() {
        let estimator = cocoa();
        let mut remote = remote::<CocoaState>();
        let later = remote.last_rto_update() + ms(600_000);
        estimator.check_aging(&mut remote, later);
        assert_eq!(remote.rto(), ms(2000));
    }
}
