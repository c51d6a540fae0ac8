/*!
Run configuration

Sweeps are configured with a TOML document made of four tables:

```toml
[run]
rounds = 10000
discount = 0.99
include_block_subsidy = true

[propagation]
base_delay_ms = 2000.0
delay_per_mb_ms = 1000.0
block_rate = 0.00167
latency_penalty_secs = 1.0

[controller]
initial_base_fee = 1.0
alpha = 0.125
target_utilization = 0.80
capacity_step = 0.10
min_capacity_vb = 1000000.0
max_capacity_vb = 2000000.0

[sweep]
incentive_ratios = [0.0, 0.001, 0.01]
fee_floors = [0.0, 5000000.0]
top_miners = 13
```

The `[controller]` table and the keys not shown in the `[run]` and `[sweep]`
tables above may be omitted; every other key is required.
*/

use std::{num::NonZeroUsize, path::Path};

use serde::Deserialize;

use crate::{controller::ControllerParams, propagation::PropagationModel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config")]
    Parse(#[from] toml::de::Error),
    #[error("parameter {0} has invalid value {1}")]
    InvalidParameter(&'static str, f64),
    #[error("capacity bounds are invalid: min {min}, max {max}")]
    CapacityBounds { min: f64, max: f64 },
    #[error("{0} grid must not be empty")]
    EmptyGrid(&'static str),
}

fn default_include_block_subsidy() -> bool {
    true
}

fn default_top_miners() -> usize {
    13
}

/// Parameters shared by every run of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Number of simulated rounds per run.
    pub rounds: NonZeroUsize,
    /// Per-round discount factor `gamma` of the discounted miner value.
    pub discount: f64,
    /// When false, block subsidies are forced to zero (subsidy-exhausted
    /// scenario).
    #[serde(default = "default_include_block_subsidy")]
    pub include_block_subsidy: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSection {
    /// Deviation incentives, as fractions of the mean fee reward per block.
    pub incentive_ratios: Vec<f64>,
    /// Fee floors in satoshi per block, swept for archetypes with a floor.
    pub fee_floors: Vec<f64>,
    /// Number of miners, by average share, taking part in each run.
    #[serde(default = "default_top_miners")]
    pub top_miners: usize,
}

/// Complete configuration of an experiment sweep.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    pub run: RunSection,
    pub propagation: PropagationModel,
    #[serde(default)]
    pub controller: ControllerParams,
    pub sweep: SweepSection,
}

impl SimConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;

        text.parse()
    }

    /// Checks every parameter. Called before any run executes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::*;

        let gamma = self.run.discount;
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(InvalidParameter("discount", gamma));
        }

        self.propagation.validate()?;
        self.controller.validate()?;

        validate_grid("incentive_ratios", &self.sweep.incentive_ratios)?;
        validate_grid("fee_floors", &self.sweep.fee_floors)?;

        if self.sweep.top_miners == 0 {
            return Err(InvalidParameter("top_miners", 0.0));
        }

        Ok(())
    }
}

impl std::str::FromStr for SimConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: SimConfig = toml::from_str(s)?;
        config.validate()?;

        Ok(config)
    }
}

/// Checks that a sweep grid is non-empty and holds finite, non-negative
/// values.
pub fn validate_grid(
    name: &'static str,
    values: &[f64],
) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::EmptyGrid(name));
    }

    match values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        Some(&bad) => Err(ConfigError::InvalidParameter(name, bad)),
        None => Ok(()),
    }
}
