//! RTT statistics and timeout arithmetic.
//!
//! [`RttStats`] implements the RFC 6298 smoothing used by the strong and weak
//! CoCoA estimators; the helpers below are shared by every timeout policy.

use std::time::Duration;

use rand::Rng;

/// RFC 6298 smoothing constants.
pub mod constants {
    /// Alpha for SRTT smoothing (0.125 = 1/8).
    pub const SRTT_ALPHA: f64 = 0.125;

    /// Beta for RTTVAR smoothing (0.25 = 1/4).
    pub const RTTVAR_BETA: f64 = 0.25;
}

/// Smoothed RTT and RTT variance for one estimator.
///
/// - First measurement: SRTT = sample, RTTVAR = sample / 2
/// - Subsequent: RTTVAR = 0.75 * RTTVAR + 0.25 * |SRTT - sample|,
///   SRTT = 0.875 * SRTT + 0.125 * sample
/// - RTO = SRTT + max(G, K * RTTVAR)
#[derive(Debug, Clone, PartialEq)]
pub struct RttStats {
    /// Smoothed RTT in milliseconds.
    srtt: f64,
    /// RTT variance in milliseconds.
    rttvar: f64,
    /// Variance multiplier.
    k: f64,
    /// Clock granularity floor in milliseconds.
    granularity_ms: f64,
}

impl RttStats {
    /// Start from a first RTT sample.
    pub fn first(sample: Duration, k: f64) -> Self {
        let sample_ms = as_millis_f64(sample);
        Self {
            srtt: sample_ms,
            rttvar: sample_ms / 2.0,
            k,
            granularity_ms: 1.0,
        }
    }

    /// Use a clock granularity floor other than 1 ms.
    pub fn with_granularity(mut self, granularity: Duration) -> Self {
        self.granularity_ms = as_millis_f64(granularity);
        self
    }

    /// Fold in a new RTT sample.
    pub fn update(&mut self, sample: Duration) {
        let sample_ms = as_millis_f64(sample);
        self.rttvar = (1.0 - constants::RTTVAR_BETA) * self.rttvar
            + constants::RTTVAR_BETA * (self.srtt - sample_ms).abs();
        self.srtt = (1.0 - constants::SRTT_ALPHA) * self.srtt + constants::SRTT_ALPHA * sample_ms;
    }

    /// RTO derived from the current SRTT and RTTVAR.
    pub fn rto(&self) -> Duration {
        from_millis_f64(self.srtt + f64::max(self.granularity_ms, self.k * self.rttvar))
    }

    /// Smoothed RTT in milliseconds.
    pub fn srtt_ms(&self) -> f64 {
        self.srtt
    }

    /// RTT variance in milliseconds.
    pub fn rttvar_ms(&self) -> f64 {
        self.rttvar
    }
}

/// Milliseconds as a float.
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Whole milliseconds from a float, negative values clamp to zero.
pub fn from_millis_f64(ms: f64) -> Duration {
    Duration::from_millis(ms.max(0.0) as u64)
}

/// `min(factor × timeout, cap)`.
pub fn backoff(timeout: Duration, factor: f64, cap: Duration) -> Duration {
    from_millis_f64(as_millis_f64(timeout) * factor).min(cap)
}

/// Uniform sample from `[base, base × factor]`, in whole milliseconds.
pub fn dither(base: Duration, factor: f64) -> Duration {
    let low = base.as_millis() as u64;
    let high = (as_millis_f64(base) * factor) as u64;
    if high <= low {
        return base;
    }
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample() {
        let stats = RttStats::first(Duration::from_millis(100), 4.0);
        assert!((stats.srtt_ms() - 100.0).abs() < 0.01);
        assert!((stats.rttvar_ms() - 50.0).abs() < 0.01);
        // 100 + 4 * 50
        assert_eq!(stats.rto(), Duration::from_millis(300));
    }

    #[test]
    fn test_multiple_samples() {
        let mut stats = RttStats::first(Duration::from_millis(100), 4.0);
        stats.update(Duration::from_millis(120));

        // SRTT should move toward the new sample
        assert!(stats.srtt_ms() > 100.0);
        assert!(stats.srtt_ms() < 120.0);
    }

    #[test]
    fn test_weak_k() {
        let stats = RttStats::first(Duration::from_millis(1000), 1.0);
        assert_eq!(stats.rto(), Duration::from_millis(1500));
    }

    #[test]
    fn test_granularity_floor() {
        let mut stats = RttStats::first(Duration::from_millis(100), 4.0)
            .with_granularity(Duration::from_millis(200));
        for _ in 0..50 {
            stats.update(Duration::from_millis(100));
        }
        // Variance has collapsed, the floor dominates
        assert_eq!(stats.rto(), Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_caps() {
        let cap = Duration::from_secs(60);
        assert_eq!(
            backoff(Duration::from_secs(2), 2.0, cap),
            Duration::from_secs(4)
        );
        assert_eq!(backoff(Duration::from_secs(40), 2.0, cap), cap);
        assert_eq!(
            backoff(Duration::from_millis(1000), 1.5, cap),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_dither_range() {
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let timeout = dither(base, 1.5);
            assert!(timeout >= Duration::from_millis(1000));
            assert!(timeout <= Duration::from_millis(1500));
        }
        assert_eq!(dither(base, 1.0), base);
    }
}
