/*!
Evaluating fee-market policies across a parameter grid

An [`ExperimentSweep`] runs one independent [`Simulation`] for every
combination of deviation-incentive ratio, policy archetype and fee floor, over
the same miners and block feed. Fee floors are only swept for archetypes with
the fee floor enabled; the others run once with a floor of zero.

Incentive ratios are relative to the feed's mean fee reward per block (see
[`BlockFeed::mean_fee_reward`]), so a ratio of `0.01` pays deviating miners 1%
of an average block's fees and auxiliary revenue at the target utilization.

Runs share no mutable state. With the `rayon` feature (enabled by default)
they execute in parallel; results are always reported in grid order.
*/

use std::{num::NonZeroUsize, sync::Arc};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    config::{validate_grid, ConfigError, SimConfig},
    controller::ControllerParams,
    cost::CostResolver,
    feed::BlockFeed,
    miner::MinerSet,
    policy::PolicyArchetype,
    propagation::PropagationModel,
    results::{ResultsTable, SweepRow},
    simulation::{Simulation, SimulationBuildError, SimulationBuilder},
};

/// Hyperparameters held fixed across every run of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunParams {
    pub rounds: NonZeroUsize,
    pub discount: f64,
    pub include_block_subsidy: bool,
    pub propagation: PropagationModel,
    pub controller: ControllerParams,
}

impl From<&SimConfig> for RunParams {
    fn from(config: &SimConfig) -> Self {
        Self {
            rounds: config.run.rounds,
            discount: config.run.discount,
            include_block_subsidy: config.run.include_block_subsidy,
            propagation: config.propagation,
            controller: config.controller,
        }
    }
}

/// Grid of policy configurations to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid {
    pub incentive_ratios: Vec<f64>,
    pub fee_floors: Vec<f64>,
    pub archetypes: Vec<PolicyArchetype>,
}

impl SweepGrid {
    /// Creates a grid over all six archetypes.
    pub fn new(incentive_ratios: Vec<f64>, fee_floors: Vec<f64>) -> Self {
        Self {
            incentive_ratios,
            fee_floors,
            archetypes: PolicyArchetype::ALL.to_vec(),
        }
    }

    /// Restricts the grid to the given archetypes.
    pub fn with_archetypes<I>(mut self, archetypes: I) -> Self
    where
        I: IntoIterator<Item = PolicyArchetype>,
    {
        self.archetypes = archetypes.into_iter().collect();

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_grid("incentive_ratios", &self.incentive_ratios)?;
        validate_grid("fee_floors", &self.fee_floors)?;
        if self.archetypes.is_empty() {
            return Err(ConfigError::EmptyGrid("archetypes"));
        }

        Ok(())
    }

    /// Enumerates the grid in ratio, archetype, floor order. `mean_reward`
    /// converts incentive ratios to absolute incentives.
    pub fn points(&self, mean_reward: f64) -> Vec<SweepPoint> {
        let mut points = vec![];
        for &incentive_ratio in self.incentive_ratios.iter() {
            let incentive_norm = incentive_ratio * mean_reward;

            for &archetype in self.archetypes.iter() {
                let floors: &[f64] = if archetype.flags().fee_floor {
                    &self.fee_floors
                } else {
                    &[0.0]
                };

                for &fee_floor in floors {
                    points.push(SweepPoint {
                        archetype,
                        incentive_ratio,
                        incentive_norm,
                        fee_floor,
                    });
                }
            }
        }

        points
    }
}

impl From<&SimConfig> for SweepGrid {
    fn from(config: &SimConfig) -> Self {
        Self::new(
            config.sweep.incentive_ratios.clone(),
            config.sweep.fee_floors.clone(),
        )
    }
}

/// One configuration of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint {
    pub archetype: PolicyArchetype,
    /// Deviation incentive as a fraction of the mean fee reward.
    pub incentive_ratio: f64,
    /// Deviation incentive at the target utilization, in satoshi.
    pub incentive_norm: f64,
    /// Fee floor in satoshi per block; zero for archetypes without a floor.
    pub fee_floor: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no daily miner costs were given")]
    EmptyCostTable,
    #[error("invalid simulation for sweep point {point:?}")]
    Build {
        point: SweepPoint,
        #[source]
        source: SimulationBuildError,
    },
}

/// A validated sweep, ready to run.
#[derive(Debug, Clone)]
pub struct ExperimentSweep {
    params: RunParams,
    runs: Vec<(SweepPoint, Simulation)>,
}

impl ExperimentSweep {
    /// Validates the grid and builds every simulation of the sweep, so that
    /// configuration errors surface before any run executes. `costs` must
    /// hold at least one daily cost entry.
    pub fn new(
        params: RunParams,
        grid: &SweepGrid,
        feed: Arc<BlockFeed>,
        costs: Arc<CostResolver>,
        miners: MinerSet,
    ) -> Result<Self, SweepError> {
        grid.validate()?;
        if costs.is_empty() {
            return Err(SweepError::EmptyCostTable);
        }

        let mean_reward = feed.mean_fee_reward();
        if feed.len() < params.rounds.get() {
            tracing::warn!(
                blocks = feed.len(),
                rounds = params.rounds.get(),
                "block feed is shorter than the run; rounds will wrap around"
            );
        }

        let mut runs = vec![];
        for point in grid.points(mean_reward) {
            let sim = SimulationBuilder::new()
                .feed(feed.clone())
                .costs(costs.clone())
                .miners(miners.clone())
                .rounds(params.rounds.get())
                .discount(params.discount)
                .include_block_subsidy(params.include_block_subsidy)
                .propagation(params.propagation)
                .controller(params.controller)
                .archetype(point.archetype)
                .fee_floor(point.fee_floor)
                .incentive_norm(point.incentive_norm)
                .build()
                .map_err(|source| SweepError::Build { point, source })?;

            runs.push((point, sim));
        }

        tracing::info!(
            runs = runs.len(),
            mean_reward,
            include_block_subsidy = params.include_block_subsidy,
            "prepared sweep"
        );

        Ok(Self { params, runs })
    }

    /// Number of runs in the sweep.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = &SweepPoint> {
        self.runs.iter().map(|(point, _)| point)
    }

    /// Runs every simulation of the sweep and collects the results in grid
    /// order.
    pub fn run_all(self) -> ResultsTable {
        let ExperimentSweep { params, runs } = self;
        let total = runs.len();

        let run = |(i, (point, sim)): (usize, (SweepPoint, Simulation))| {
            tracing::info!(
                run = i + 1,
                total,
                policy = %point.archetype,
                incentive_ratio = point.incentive_ratio,
                incentive_norm = point.incentive_norm,
                fee_floor = point.fee_floor,
                "running simulation"
            );

            let output = sim.run();
            SweepRow {
                point,
                result: output.result,
                miners: output.miner_summaries,
            }
        };

        #[cfg(feature = "rayon")]
        let rows: Vec<_> = runs.into_par_iter().enumerate().map(run).collect();
        #[cfg(not(feature = "rayon"))]
        let rows: Vec<_> = runs.into_iter().enumerate().map(run).collect();

        ResultsTable::new(rows, params)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        feed::BlockRecord,
        miner::{Miner, MinerId},
    };

    fn feed() -> Arc<BlockFeed> {
        let records = (0..12)
            .map(|i| BlockRecord {
                height: Some(840_000 + i),
                date: format!("2024-05-{:02}", 1 + i / 4),
                total_vbytes: 600_000.0 + 100_000.0 * i as f64,
                avg_sat_per_vb: 5.0 + i as f64,
                mev_sat: 10_000.0,
                block_subsidy_sat: 312_500_000.0,
                btc_usd: Some(62_000.0),
                miner_id: Some(MinerId::from(1 + i % 3)),
            })
            .collect();

        Arc::new(BlockFeed::new(records).unwrap())
    }

    fn miners() -> MinerSet {
        MinerSet::new(vec![
            Miner::new(1.into(), 0.5, 3_000_000.0),
            Miner::new(2.into(), 0.3, 2_000_000.0),
            Miner::new(3.into(), 0.2, 1_000_000.0),
        ])
        .unwrap()
    }

    fn costs() -> Arc<CostResolver> {
        let mut costs = CostResolver::averages_only();
        costs.insert("2024-05-01".into(), 1.into(), 2_500_000.0);
        costs.insert("2024-05-02".into(), 2.into(), 2_200_000.0);
        costs.insert("2024-05-03".into(), 3.into(), 900_000.0);

        Arc::new(costs)
    }

    fn params() -> RunParams {
        RunParams {
            rounds: NonZeroUsize::new(48).unwrap(),
            discount: 0.99,
            include_block_subsidy: true,
            propagation: PropagationModel {
                base_delay_ms: 2000.0,
                delay_per_mb_ms: 1000.0,
                block_rate: 1.0 / 600.0,
                latency_penalty_secs: 1.0,
            },
            controller: ControllerParams::default(),
        }
    }

    #[test]
    fn grid_size_counts_floors_only_for_floor_archetypes() {
        let grid = SweepGrid::new(vec![0.0, 0.01, 0.1], vec![0.0, 1e6, 5e6]);
        let points = grid.points(1_000.0);

        // 3 ratios x (3 archetypes x 3 floors + 3 archetypes)
        assert_eq!(points.len(), 36);
        for p in points.iter().filter(|p| !p.archetype.flags().fee_floor) {
            assert_eq!(p.fee_floor, 0.0);
        }
        assert_relative_eq!(points.last().unwrap().incentive_norm, 100.0);
    }

    #[test]
    fn points_are_ordered_ratio_archetype_floor() {
        let grid = SweepGrid::new(vec![0.1, 0.2], vec![1.0, 2.0])
            .with_archetypes([PolicyArchetype::A, PolicyArchetype::B]);
        let points: Vec<_> = grid
            .points(10.0)
            .into_iter()
            .map(|p| (p.incentive_ratio, p.archetype, p.fee_floor))
            .collect();

        assert_eq!(
            points,
            vec![
                (0.1, PolicyArchetype::A, 1.0),
                (0.1, PolicyArchetype::A, 2.0),
                (0.1, PolicyArchetype::B, 0.0),
                (0.2, PolicyArchetype::A, 1.0),
                (0.2, PolicyArchetype::A, 2.0),
                (0.2, PolicyArchetype::B, 0.0),
            ]
        );
    }

    #[test]
    fn empty_grid_aborts_before_running() {
        let grid = SweepGrid::new(vec![], vec![0.0]);
        let sweep = ExperimentSweep::new(
            params(),
            &grid,
            feed(),
            costs(),
            miners(),
        );

        assert!(matches!(
            sweep,
            Err(SweepError::Config(ConfigError::EmptyGrid("incentive_ratios")))
        ));
    }

    #[test]
    fn empty_costs_abort_before_running() {
        let grid = SweepGrid::new(vec![0.0], vec![0.0]);
        let sweep = ExperimentSweep::new(
            params(),
            &grid,
            feed(),
            Arc::new(CostResolver::averages_only()),
            miners(),
        );

        assert!(matches!(sweep, Err(SweepError::EmptyCostTable)));
    }

    #[test]
    fn invalid_controller_aborts_before_running() {
        let mut params = params();
        params.controller.min_capacity_vb = 0.0;
        let grid = SweepGrid::new(vec![0.0], vec![0.0]);

        let sweep = ExperimentSweep::new(
            params,
            &grid,
            feed(),
            costs(),
            miners(),
        );

        assert!(matches!(sweep, Err(SweepError::Build { .. })));
    }

    #[test]
    fn run_all_keeps_grid_order_and_is_deterministic() {
        let grid = SweepGrid::new(vec![0.0, 0.05, 0.5, 5.0], vec![0.0, 2e7]);
        let sweep = ExperimentSweep::new(
            params(),
            &grid,
            feed(),
            costs(),
            miners(),
        )
        .unwrap();
        let expected: Vec<_> = sweep.points().copied().collect();

        let first = sweep.clone().run_all();
        let second = sweep.run_all();

        let points: Vec<_> = first.rows().iter().map(|r| r.point).collect();
        assert_eq!(points, expected);
        for (a, b) in first.rows().iter().zip(second.rows().iter()) {
            assert_eq!(a.result, b.result);
        }
    }

    #[test]
    fn beta_bar_grows_with_incentive_ratio() {
        let ratios = vec![0.0, 0.01, 0.1, 1.0, 10.0, 100.0];
        let grid = SweepGrid::new(ratios.clone(), vec![0.0, 2e7]);
        let table = ExperimentSweep::new(
            params(),
            &grid,
            feed(),
            costs(),
            miners(),
        )
        .unwrap()
        .run_all();

        for archetype in PolicyArchetype::ALL {
            for floor in [0.0, 2e7] {
                let betas: Vec<_> = table
                    .rows()
                    .iter()
                    .filter(|r| {
                        r.point.archetype == archetype
                            && r.point.fee_floor == floor
                    })
                    .map(|r| r.result.beta_bar)
                    .collect();

                for pair in betas.windows(2) {
                    assert!(pair[0] <= pair[1]);
                }
            }
        }

        let rows = table.rows();

        // No incentive means no reason to take on extra orphan risk
        for row in rows.iter().filter(|r| r.point.incentive_ratio == 0.0) {
            assert_eq!(row.result.beta_bar, 0.0);
        }
        // An incentive of 100 average blocks always pays
        for row in rows.iter().filter(|r| r.point.incentive_ratio == 100.0) {
            assert_eq!(row.result.beta_bar, 1.0);
            assert!(!row.result.stable_bft);
        }
    }
}
