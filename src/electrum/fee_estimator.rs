//! Fee estimation: priority labels mapped to confirmation targets, queried
//! through the client, converted from BTC/kB to sat/vB, and clamped to a
//! sane range (spec §4.12).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::client::Client;
use super::NetworkError;

/// A named urgency level, mapped to a confirmation target in
/// [`FeeEstimatorConfig::priority_targets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
    Economy,
}

/// How much to trust an estimate: `high` when the server answered for the
/// exact requested target, `medium`/`low` when a neighboring target or the
/// fallback rate had to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A fee-rate recommendation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeEstimate {
    pub sat_per_vb: u64,
    pub target_blocks: u32,
    pub confidence: Confidence,
}

/// Tuning surface (spec §4.12/§6).
#[derive(Debug, Clone)]
pub struct FeeEstimatorConfig {
    pub priority_targets: HashMap<Priority, u32>,
    pub min_fee_rate: u64,
    pub validation_threshold: u64,
    pub fallback_rate: u64,
    pub cache_timeout: Duration,
}

impl Default for FeeEstimatorConfig {
    fn default() -> Self {
        let mut priority_targets = HashMap::new();
        priority_targets.insert(Priority::Urgent, 1);
        priority_targets.insert(Priority::High, 3);
        priority_targets.insert(Priority::Medium, 6);
        priority_targets.insert(Priority::Low, 12);
        priority_targets.insert(Priority::Economy, 25);
        Self {
            priority_targets,
            min_fee_rate: 1,
            validation_threshold: 1000,
            fallback_rate: 10,
            cache_timeout: Duration::from_secs(60),
        }
    }
}

struct CachedEstimate {
    estimate: FeeEstimate,
    at: Instant,
}

/// Converts ElectrumX `blockchain.estimatefee` responses (BTC/kB) into
/// sat/vB recommendations, cached per `(priority, target)`.
pub struct FeeEstimator {
    config: FeeEstimatorConfig,
    cache: Mutex<HashMap<(Priority, u32), CachedEstimate>>,
}

/// `max(1, round(btc_per_kb * 1e8 / 1000))`.
fn btc_per_kb_to_sat_per_vb(btc_per_kb: f64) -> u64 {
    if btc_per_kb <= 0.0 {
        return 0;
    }
    let sat_per_vb = (btc_per_kb * 100_000_000.0 / 1000.0).round();
    sat_per_vb.max(1.0) as u64
}

impl FeeEstimator {
    /// New estimator over `config`.
    pub fn new(config: FeeEstimatorConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn target_for(&self, priority: Priority) -> u32 {
        self.config
            .priority_targets
            .get(&priority)
            .copied()
            .unwrap_or(6)
    }

    fn clamp(&self, sat_per_vb: u64) -> (u64, Confidence) {
        if sat_per_vb == 0 {
            return (self.config.fallback_rate, Confidence::Low);
        }
        if sat_per_vb < self.config.min_fee_rate {
            return (self.config.min_fee_rate, Confidence::Medium);
        }
        if sat_per_vb > self.config.validation_threshold {
            return (self.config.validation_threshold, Confidence::Medium);
        }
        (sat_per_vb, Confidence::High)
    }

    /// Estimate a fee rate for `priority`, querying `client` (and caching
    /// the result for `cache_timeout`).
    pub async fn estimate(
        &self,
        client: &Client,
        priority: Priority,
    ) -> Result<FeeEstimate, NetworkError> {
        let target = self.target_for(priority);

        {
            let cache = self.cache.lock().expect("fee cache poisoned");
            if let Some(cached) = cache.get(&(priority, target)) {
                if cached.at.elapsed() < self.config.cache_timeout {
                    return Ok(cached.estimate);
                }
            }
        }

        let response = client.estimate_fee(target).await?;
        let btc_per_kb = response.as_f64().unwrap_or(-1.0);
        let (sat_per_vb, confidence) = if btc_per_kb < 0.0 {
            (self.config.fallback_rate, Confidence::Low)
        } else {
            self.clamp(btc_per_kb_to_sat_per_vb(btc_per_kb))
        };

        let estimate = FeeEstimate {
            sat_per_vb,
            target_blocks: target,
            confidence,
        };
        let mut cache = self.cache.lock().expect("fee cache poisoned");
        cache.insert(
            (priority, target),
            CachedEstimate {
                estimate,
                at: Instant::now(),
            },
        );
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_rounds_and_floors_at_one() {
        assert_eq!(btc_per_kb_to_sat_per_vb(0.00001), 1);
        assert_eq!(btc_per_kb_to_sat_per_vb(0.0002), 20);
    }

    #[test]
    fn clamp_falls_back_on_unavailable_estimate() {
        let estimator = FeeEstimator::new(FeeEstimatorConfig::default());
        let (rate, confidence) = estimator.clamp(0);
        assert_eq!(rate, estimator.config.fallback_rate);
        assert_eq!(confidence, Confidence::Low);
    }

    #[test]
    fn clamp_enforces_validation_threshold() {
        let estimator = FeeEstimator::new(FeeEstimatorConfig::default());
        let (rate, confidence) = estimator.clamp(5000);
        assert_eq!(rate, 1000);
        assert_eq!(confidence, Confidence::Medium);
    }

    #[test]
    fn priority_targets_match_defaults() {
        let estimator = FeeEstimator::new(FeeEstimatorConfig::default());
        assert_eq!(estimator.target_for(Priority::Urgent), 1);
        assert_eq!(estimator.target_for(Priority::Economy), 25);
    }
}
