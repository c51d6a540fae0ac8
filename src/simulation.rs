//! Running a single simulation over a block feed

use std::sync::Arc;

use crate::{
    controller::{ControllerParams, FeeMarketController},
    cost::CostResolver,
    decision::{DecisionEngine, RoundContext},
    feed::BlockFeed,
    miner::{Action, DiscountedValue, MinerId, MinerSet},
    policy::PolicyFlags,
    propagation::PropagationModel,
    utils::{self, EPSILON},
};

pub mod builder;

pub use builder::{SimulationBuildError, SimulationBuilder};

/// Virtual bytes per megabyte, for converting capacity to propagation size.
pub const VBYTES_PER_MB: f64 = 1_000_000.0;

/// Deviation rates at or above this value violate BFT safety.
pub const BFT_THRESHOLD: f64 = 1.0 / 3.0;

/// A configured run of the fee-market game, ready to execute.
///
/// Created with [`SimulationBuilder`]. [`Simulation::run`] consumes the
/// simulation and produces its [`SimulationOutput`]; rounds are processed
/// strictly in order since the fee-market controller carries state from one
/// round to the next.
#[derive(Debug, Clone)]
pub struct Simulation {
    feed: Arc<BlockFeed>,
    costs: Arc<CostResolver>,
    miners: MinerSet,
    rounds: usize,
    discount: f64,
    include_block_subsidy: bool,
    propagation: PropagationModel,
    controller: ControllerParams,
    policy: PolicyFlags,
    fee_floor: f64,
    incentive_norm: f64,
}

/// Per-round trace of a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRecord {
    pub round: usize,
    /// Index of the block record used in this round.
    pub feed_index: usize,
    /// Size of the historical block (vB).
    pub observed_size: f64,
    pub utilization: f64,
    /// Capacity after this round's adaptive update (vB).
    pub capacity: f64,
    /// Base fee after this round's update (sat/vB).
    pub base_fee: f64,
    pub raw_fee: f64,
    pub effective_fee: f64,
    /// Total reward `X` of the block.
    pub reward: f64,
    /// Deviation incentive `G`.
    pub incentive: f64,
    pub rho_honest: f64,
    pub rho_deviate: f64,
    /// Deviation margin `D`: incentive over the break-even incentive.
    pub margin: f64,
    /// Historical producer of the block and its modeled action, if the
    /// producer is part of the miner set.
    pub producer: Option<(MinerId, Action)>,
}

/// Aggregate metrics of one run.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RunResult {
    /// Fraction of matched historical blocks whose producer would deviate.
    pub beta_bar: f64,
    pub roi_mean: f64,
    pub roi_std: f64,
    /// `beta_bar < 1/3`.
    pub stable_bft: bool,
    /// Honest orphan risk in the last round.
    pub rho_honest: f64,
    /// Deviation orphan risk in the last round.
    pub rho_deviate: f64,
    /// Fraction of rounds with a deviation margin of at least one.
    pub pr_margin_ge_one: f64,
    /// Rounds whose historical producer was part of the miner set.
    pub matched_blocks: usize,
    pub honest_blocks: usize,
    pub deviate_blocks: usize,
}

impl RunResult {
    #[inline]
    pub fn is_bft_stable(beta_bar: f64) -> bool {
        beta_bar < BFT_THRESHOLD
    }
}

/// Per-miner metrics of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerSummary {
    pub id: MinerId,
    pub share: f64,
    /// Sum of honest profit over sum of cost, or zero without cost.
    pub roi: f64,
    /// Discounted cumulative profit under each strategy.
    pub value: DiscountedValue,
    /// Fraction of rounds in which the miner preferred deviation.
    pub deviation_rate: f64,
}

/// Contains the output data from a [`Simulation`].
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub result: RunResult,
    pub miners: MinerSet,
    pub miner_summaries: Vec<MinerSummary>,
    pub rounds: Vec<RoundRecord>,
}

/// Running sums kept while a simulation executes.
#[derive(Debug, Default)]
struct Tally {
    honest_profit: Vec<f64>,
    cost: Vec<f64>,
    matched: usize,
    deviations: usize,
    unmatched: usize,
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn policy(&self) -> PolicyFlags {
        self.policy
    }

    /// Executes the configured simulation.
    pub fn run(self) -> SimulationOutput {
        let Simulation {
            feed,
            costs,
            miners,
            rounds,
            discount,
            include_block_subsidy,
            propagation,
            controller,
            policy,
            fee_floor,
            incentive_norm,
        } = self;

        tracing::debug!(
            rounds,
            miners = miners.len(),
            ?policy,
            fee_floor,
            incentive_norm,
            "starting simulation"
        );

        let mut miners = miners.fresh();
        let mut market =
            FeeMarketController::new(controller, policy, fee_floor);
        let engine =
            DecisionEngine::new(incentive_norm, controller.target_utilization);

        let mut tally = Tally {
            honest_profit: vec![0.0; miners.len()],
            cost: vec![0.0; miners.len()],
            ..Default::default()
        };
        let mut trace = Vec::with_capacity(rounds);

        for round in 0..rounds {
            let block = feed.get(round);

            let step = market.step(block.total_vbytes);
            let effective_fee =
                market.effective_fee(block.avg_sat_per_vb, block.total_vbytes);
            let subsidy = if include_block_subsidy {
                block.block_subsidy_sat
            } else {
                0.0
            };
            let reward = subsidy + effective_fee + block.mev_sat;

            let risk =
                propagation.orphan_risk(step.state.capacity / VBYTES_PER_MB);
            let incentive = engine.incentive(step.utilization);
            let ctx = RoundContext {
                reward,
                incentive,
                risk,
            };

            for (i, miner) in miners.iter_mut().enumerate() {
                let cost = costs.resolve(&block.date, miner);
                let profit = engine.expected_profit(miner.share(), cost, &ctx);
                miner.decide_and_record(round, profit);

                tally.honest_profit[i] += profit.honest;
                tally.cost[i] += cost;
            }

            let producer = block.miner_id.and_then(|id| {
                let action = miners
                    .position(id)
                    .and_then(|i| miners.get(i))
                    .and_then(|m| m.last_decision())?
                    .action;

                Some((id, action))
            });
            match producer {
                Some((_, action)) => {
                    tally.matched += 1;
                    if action.is_deviate() {
                        tally.deviations += 1;
                    }
                }
                None => tally.unmatched += 1,
            }

            let threshold = risk.deviation_ratio() * reward;
            let margin = incentive / threshold.max(EPSILON);

            trace.push(RoundRecord {
                round,
                feed_index: feed.index_of(round),
                observed_size: block.total_vbytes,
                utilization: step.utilization,
                capacity: step.state.capacity,
                base_fee: step.state.base_fee,
                raw_fee: block.raw_fee(),
                effective_fee,
                reward,
                incentive,
                rho_honest: risk.honest,
                rho_deviate: risk.deviate,
                margin,
                producer,
            });
        }

        if tally.unmatched > 0 {
            tracing::warn!(
                rounds = tally.unmatched,
                "historical producer not in miner set"
            );
        }

        Self::finalize(miners, tally, trace, discount)
    }

    fn finalize(
        miners: MinerSet,
        tally: Tally,
        trace: Vec<RoundRecord>,
        discount: f64,
    ) -> SimulationOutput {
        let miner_summaries: Vec<_> = miners
            .iter()
            .enumerate()
            .map(|(i, miner)| {
                let cost = tally.cost[i];
                let roi = if cost > 0.0 {
                    tally.honest_profit[i] / cost
                } else {
                    0.0
                };

                MinerSummary {
                    id: miner.id(),
                    share: miner.share(),
                    roi,
                    value: miner.discounted_value(discount),
                    deviation_rate: miner.deviation_rate(),
                }
            })
            .collect();

        let rois: Vec<_> = miner_summaries.iter().map(|s| s.roi).collect();

        let beta_bar = if tally.matched > 0 {
            tally.deviations as f64 / tally.matched as f64
        } else {
            0.0
        };

        let (rho_honest, rho_deviate) = trace
            .last()
            .map(|r| (r.rho_honest, r.rho_deviate))
            .unwrap_or_default();

        let pr_margin_ge_one = if trace.is_empty() {
            0.0
        } else {
            trace.iter().filter(|r| r.margin >= 1.0).count() as f64
                / trace.len() as f64
        };

        let result = RunResult {
            beta_bar,
            roi_mean: utils::mean(&rois),
            roi_std: utils::population_std(&rois),
            stable_bft: RunResult::is_bft_stable(beta_bar),
            rho_honest,
            rho_deviate,
            pr_margin_ge_one,
            matched_blocks: tally.matched,
            honest_blocks: tally.matched - tally.deviations,
            deviate_blocks: tally.deviations,
        };

        tracing::debug!(
            beta_bar,
            stable_bft = result.stable_bft,
            roi_mean = result.roi_mean,
            "finished simulation"
        );

        SimulationOutput {
            result,
            miners,
            miner_summaries,
            rounds: trace,
        }
    }
}
