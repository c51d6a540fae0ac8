use std::sync::Arc;

use crate::{
    config::ConfigError,
    controller::ControllerParams,
    cost::CostResolver,
    feed::BlockFeed,
    miner::MinerSet,
    policy::{PolicyArchetype, PolicyFlags},
    propagation::PropagationModel,
};

use super::Simulation;

/// Builds a [`Simulation`].
///
/// # Example
///
/// ```
/// use fee_market_sim::prelude::*;
///
/// let feed = BlockFeed::new(vec![BlockRecord {
///     height: Some(840_000),
///     date: "2024-04-20".into(),
///     total_vbytes: 950_000.0,
///     avg_sat_per_vb: 25.0,
///     mev_sat: 0.0,
///     block_subsidy_sat: 312_500_000.0,
///     btc_usd: Some(64_000.0),
///     miner_id: Some(MinerId::from(1)),
/// }])
/// .unwrap();
///
/// let miners = MinerSet::new(vec![
///     Miner::new(MinerId::from(1), 0.7, 2_000_000.0),
///     Miner::new(MinerId::from(2), 0.3, 900_000.0),
/// ])
/// .unwrap();
///
/// let output = SimulationBuilder::new()
///     .feed(feed)
///     .miners(miners)
///     .rounds(1_000)
///     .propagation(PropagationModel {
///         base_delay_ms: 2000.0,
///         delay_per_mb_ms: 1000.0,
///         block_rate: 1.0 / 600.0,
///         latency_penalty_secs: 1.0,
///     })
///     .archetype(PolicyArchetype::A)
///     .fee_floor(5_000_000.0)
///     .build()
///     .unwrap()
///     .run();
///
/// assert!((0.0..=1.0).contains(&output.result.beta_bar));
/// ```
#[derive(Debug, Default)]
pub struct SimulationBuilder {
    pub rounds: Option<usize>,
    pub discount: Option<f64>,
    pub include_block_subsidy: Option<bool>,
    pub propagation: Option<PropagationModel>,
    pub controller: Option<ControllerParams>,
    pub policy: PolicyFlags,
    pub fee_floor: f64,
    pub incentive_norm: f64,
    feed: Option<Arc<BlockFeed>>,
    costs: Option<Arc<CostResolver>>,
    miners: Option<MinerSet>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationBuildError {
    #[error("no block feed was given")]
    NoFeedGiven,
    #[error("no miners were given")]
    NoMinersGiven,
    #[error("no propagation model was given")]
    NoPropagationModel,
    #[error("number of simulation rounds must be greater than 0")]
    ZeroRounds,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SimulationBuilder {
    /// Creates a new [`SimulationBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block feed read by the simulation.
    pub fn feed<F: Into<Arc<BlockFeed>>>(mut self, feed: F) -> Self {
        self.feed = Some(feed.into());

        self
    }

    /// Sets the date-specific miner costs. Without one, every miner pays its
    /// average cost in every round.
    pub fn costs<C: Into<Arc<CostResolver>>>(mut self, costs: C) -> Self {
        self.costs = Some(costs.into());

        self
    }

    pub fn miners(mut self, miners: MinerSet) -> Self {
        self.miners = Some(miners);

        self
    }

    /// Sets the number of rounds the simulation will last for (one pass over
    /// the block feed by default).
    pub fn rounds(mut self, rounds: usize) -> Self {
        self.rounds = Some(rounds);

        self
    }

    /// Sets the per-round discount factor of miner values (default 1.0).
    pub fn discount(mut self, gamma: f64) -> Self {
        self.discount = Some(gamma);

        self
    }

    /// Whether block subsidies count toward the block reward (default true).
    pub fn include_block_subsidy(mut self, include: bool) -> Self {
        self.include_block_subsidy = Some(include);

        self
    }

    pub fn propagation(mut self, model: PropagationModel) -> Self {
        self.propagation = Some(model);

        self
    }

    /// Sets the controller hyperparameters ([`ControllerParams::default`]
    /// used otherwise).
    pub fn controller(mut self, params: ControllerParams) -> Self {
        self.controller = Some(params);

        self
    }

    pub fn policy(mut self, flags: PolicyFlags) -> Self {
        self.policy = flags;

        self
    }

    /// Enables the fee-market mechanisms of `archetype`.
    pub fn archetype(self, archetype: PolicyArchetype) -> Self {
        self.policy(archetype.flags())
    }

    /// Minimum total fee per block, applied when the fee floor is enabled.
    pub fn fee_floor(mut self, floor: f64) -> Self {
        self.fee_floor = floor;

        self
    }

    /// Deviation incentive at the target utilization, in satoshi.
    pub fn incentive_norm(mut self, norm: f64) -> Self {
        self.incentive_norm = norm;

        self
    }

    /// Creates a [`Simulation`] from the specified parameters.
    pub fn build(self) -> Result<Simulation, SimulationBuildError> {
        use SimulationBuildError::*;

        let SimulationBuilder {
            rounds,
            discount,
            include_block_subsidy,
            propagation,
            controller,
            policy,
            fee_floor,
            incentive_norm,
            feed,
            costs,
            miners,
        } = self;

        let feed = feed.ok_or(NoFeedGiven)?;
        let miners = miners.ok_or(NoMinersGiven)?;
        let propagation = propagation.ok_or(NoPropagationModel)?;
        propagation.validate()?;

        let controller = controller.unwrap_or_default();
        controller.validate()?;

        let rounds = match rounds {
            Some(0) => return Err(ZeroRounds),
            Some(x) => x,
            None => feed.len(),
        };

        let discount = discount.unwrap_or(1.0);
        if !(discount > 0.0 && discount <= 1.0) {
            return Err(
                ConfigError::InvalidParameter("discount", discount).into()
            );
        }

        let scalars =
            [("fee_floor", fee_floor), ("incentive_norm", incentive_norm)];
        for (name, value) in scalars {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidParameter(name, value).into());
            }
        }

        Ok(Simulation {
            feed,
            costs: costs.unwrap_or_default(),
            miners,
            rounds,
            discount,
            include_block_subsidy: include_block_subsidy.unwrap_or(true),
            propagation,
            controller,
            policy,
            fee_floor,
            incentive_norm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        feed::BlockRecord,
        miner::{Miner, MinerId},
    };

    fn feed() -> BlockFeed {
        BlockFeed::new(vec![BlockRecord {
            height: None,
            date: "2024-04-20".into(),
            total_vbytes: 1_000_000.0,
            avg_sat_per_vb: 10.0,
            mev_sat: 0.0,
            block_subsidy_sat: 312_500_000.0,
            btc_usd: None,
            miner_id: None,
        }])
        .unwrap()
    }

    fn propagation() -> PropagationModel {
        PropagationModel {
            base_delay_ms: 2000.0,
            delay_per_mb_ms: 1000.0,
            block_rate: 1.0 / 600.0,
            latency_penalty_secs: 1.0,
        }
    }

    fn miners() -> MinerSet {
        MinerSet::new(vec![Miner::new(MinerId::from(1), 1.0, 0.0)]).unwrap()
    }

    #[test]
    fn example_build() {
        let sim = Simulation::builder()
            .feed(feed())
            .miners(miners())
            .propagation(propagation())
            .build()
            .expect("valid simulation build");

        assert_eq!(sim.rounds(), 1);
        assert_eq!(sim.policy(), PolicyFlags::default());
    }

    #[test]
    fn missing_inputs_are_reported() {
        let no_feed = SimulationBuilder::new()
            .miners(miners())
            .propagation(propagation())
            .build();
        assert!(matches!(no_feed, Err(SimulationBuildError::NoFeedGiven)));

        let no_miners = SimulationBuilder::new()
            .feed(feed())
            .propagation(propagation())
            .build();
        assert!(matches!(no_miners, Err(SimulationBuildError::NoMinersGiven)));

        let no_model = SimulationBuilder::new()
            .feed(feed())
            .miners(miners())
            .build();
        assert!(matches!(
            no_model,
            Err(SimulationBuildError::NoPropagationModel)
        ));
    }

    #[test]
    fn zero_rounds_is_rejected() {
        let sim = SimulationBuilder::new()
            .feed(feed())
            .miners(miners())
            .propagation(propagation())
            .rounds(0)
            .build();

        assert!(matches!(sim, Err(SimulationBuildError::ZeroRounds)));
    }

    #[test]
    fn negative_fee_floor_is_rejected() {
        let sim = SimulationBuilder::new()
            .feed(feed())
            .miners(miners())
            .propagation(propagation())
            .fee_floor(-1.0)
            .build();

        assert!(matches!(
            sim,
            Err(SimulationBuildError::Config(ConfigError::InvalidParameter(
                "fee_floor",
                _
            )))
        ));
    }
}
