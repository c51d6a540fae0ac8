//! Block propagation delay and orphan risk

use serde::Deserialize;

use crate::{config::ConfigError, utils::EPSILON};

fn default_latency_penalty() -> f64 {
    1.0
}

fn default_block_rate() -> f64 {
    0.00167
}

/// Maps block size to the probability that a competing block appears before
/// propagation completes.
///
/// Propagation takes `base_delay_ms + delay_per_mb_ms * size_mb`
/// milliseconds. With blocks arriving as a Poisson process of rate
/// `block_rate` per second, the orphan risk of a block is
/// `1 - exp(-block_rate * delay)`. A deviating miner additionally delays
/// propagation by `latency_penalty_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagationModel {
    pub base_delay_ms: f64,
    pub delay_per_mb_ms: f64,
    #[serde(default = "default_block_rate")]
    pub block_rate: f64,
    #[serde(default = "default_latency_penalty")]
    pub latency_penalty_secs: f64,
}

/// Orphan probabilities of an honest and a deviating block.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct OrphanRisk {
    pub honest: f64,
    pub deviate: f64,
}

impl OrphanRisk {
    /// `(rho_dev - rho_honest) / (1 - rho_dev)`: the incentive, as a fraction
    /// of the block reward, at which deviating breaks even.
    pub fn deviation_ratio(&self) -> f64 {
        (self.deviate - self.honest) / (1.0 - self.deviate).max(EPSILON)
    }
}

impl PropagationModel {
    /// Propagation delay of a block of `size_mb` megabytes, in seconds.
    #[inline]
    pub fn delay_secs(&self, size_mb: f64) -> f64 {
        (self.base_delay_ms + self.delay_per_mb_ms * size_mb) / 1000.0
    }

    pub fn orphan_risk(&self, size_mb: f64) -> OrphanRisk {
        let delay = self.delay_secs(size_mb);

        OrphanRisk {
            honest: 1.0 - (-self.block_rate * delay).exp(),
            deviate: 1.0
                - (-self.block_rate * (delay + self.latency_penalty_secs))
                    .exp(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::InvalidParameter;

        let checks = [
            ("base_delay_ms", self.base_delay_ms),
            ("delay_per_mb_ms", self.delay_per_mb_ms),
            ("block_rate", self.block_rate),
            ("latency_penalty_secs", self.latency_penalty_secs),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(InvalidParameter(name, value));
            }
        }

        Ok(())
    }
}
