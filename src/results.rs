/*!
Presenting the results of an experiment sweep

[`ExperimentSweep::run_all`](crate::sweep::ExperimentSweep::run_all) produces
a [`ResultsTable`] holding one [`SweepRow`] per policy configuration. The table
is rendered by its [`Display`] implementation in the chosen [`Format`]:

```text
 policy_group | G_ratio  | G_norm | ... | beta_bar | ROI_mean | ...
------------------------------------------------------------------
 A_BF_FF_AD   | 0.000000 | 0.0000 | ... | 0.000000 | 0.412000 | ...
```

Two derived views are available:

- [`ResultsTable::summary`] aggregates the runs of each policy archetype.
- [`ResultsTable::miner_values`] lists per-miner ROI and discounted values.

Column titles are stable and meant for downstream analysis scripts.
*/

use std::fmt::Display;

use crate::{
    policy::PolicyArchetype,
    simulation::{MinerSummary, RunResult},
    sweep::{RunParams, SweepPoint},
    utils,
};

/// Floating point precision of results data.
pub const FLOAT_PRECISION_DIGITS: usize = 6;

const SEPARATOR_VERTICAL: char = '|';
const SEPARATOR_HORIZONTAL: char = '-';

/// Describes the appearance of a table as given by its [`Display`]
/// implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// Comma-separated, without extra whitespace.
    CSV,
    /// Human-readable.
    #[default]
    PrettyPrint,
}

/// Outcome of one run of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRow {
    pub point: SweepPoint,
    pub result: RunResult,
    pub miners: Vec<MinerSummary>,
}

/// Results of an experiment sweep, in grid order.
#[derive(Debug, Clone)]
pub struct ResultsTable {
    params: RunParams,
    rows: Vec<SweepRow>,
    format: Format,
}

impl ResultsTable {
    pub fn new(rows: Vec<SweepRow>, params: RunParams) -> Self {
        Self {
            params,
            rows,
            format: Format::default(),
        }
    }

    pub fn rows(&self) -> &[SweepRow] {
        &self.rows
    }

    /// Specify the [`Format`] of the results table.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;

        self
    }

    /// Aggregates the runs of each archetype present in the table.
    pub fn summary(&self) -> SummaryTable {
        let summaries = PolicyArchetype::ALL
            .into_iter()
            .filter_map(|archetype| {
                let results: Vec<_> = self
                    .rows
                    .iter()
                    .filter(|row| row.point.archetype == archetype)
                    .map(|row| row.result)
                    .collect();

                PolicySummary::from_results(archetype, &results)
            })
            .collect();

        SummaryTable {
            summaries,
            format: self.format,
        }
    }

    /// Per-miner outcomes of every run.
    pub fn miner_values(&self) -> MinerValueTable<'_> {
        MinerValueTable {
            rows: &self.rows,
            format: self.format,
        }
    }
}

impl Display for ResultsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let titles: Vec<_> =
            Column::ALL.iter().map(|col| col.to_string()).collect();
        let rows: Vec<Vec<_>> = self
            .rows
            .iter()
            .map(|row| {
                Column::ALL
                    .iter()
                    .map(|col| col.get_value(row, &self.params).to_string())
                    .collect()
            })
            .collect();

        write_table(f, self.format, &titles, &rows)
    }
}

/// Aggregate of all runs of one policy archetype.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicySummary {
    pub archetype: PolicyArchetype,
    pub runs: usize,
    pub beta_bar_mean: f64,
    pub beta_bar_min: f64,
    pub beta_bar_max: f64,
    pub roi_mean: f64,
    /// Mean over runs of the ROI standard deviation across miners.
    pub roi_std_mean: f64,
    /// Runs with `beta_bar < 1/3`.
    pub stable_runs: usize,
}

impl PolicySummary {
    /// Returns `None` if `results` is empty.
    pub fn from_results(
        archetype: PolicyArchetype,
        results: &[RunResult],
    ) -> Option<Self> {
        if results.is_empty() {
            return None;
        }

        let betas: Vec<_> = results.iter().map(|r| r.beta_bar).collect();
        let rois: Vec<_> = results.iter().map(|r| r.roi_mean).collect();
        let roi_stds: Vec<_> = results.iter().map(|r| r.roi_std).collect();

        Some(Self {
            archetype,
            runs: results.len(),
            beta_bar_mean: utils::mean(&betas),
            beta_bar_min: betas.iter().copied().fold(f64::INFINITY, f64::min),
            beta_bar_max: betas
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max),
            roi_mean: utils::mean(&rois),
            roi_std_mean: utils::mean(&roi_stds),
            stable_runs: results.iter().filter(|r| r.stable_bft).count(),
        })
    }
}

/// Per-archetype summary of a [`ResultsTable`].
#[derive(Debug, Clone)]
pub struct SummaryTable {
    summaries: Vec<PolicySummary>,
    format: Format,
}

impl SummaryTable {
    pub fn summaries(&self) -> &[PolicySummary] {
        &self.summaries
    }

    pub fn get(&self, archetype: PolicyArchetype) -> Option<&PolicySummary> {
        self.summaries.iter().find(|s| s.archetype == archetype)
    }
}

impl Display for SummaryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let titles: Vec<_> = [
            "policy_group",
            "description",
            "runs",
            "beta_bar_mean",
            "beta_bar_min",
            "beta_bar_max",
            "ROI_mean",
            "ROI_std_mean",
            "stable_runs",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let rows: Vec<Vec<_>> = self
            .summaries
            .iter()
            .map(|s| {
                [
                    ColumnValue::Text(s.archetype.name()),
                    ColumnValue::Text(s.archetype.description()),
                    ColumnValue::Count(s.runs),
                    ColumnValue::Float(s.beta_bar_mean),
                    ColumnValue::Float(s.beta_bar_min),
                    ColumnValue::Float(s.beta_bar_max),
                    ColumnValue::Float(s.roi_mean),
                    ColumnValue::Float(s.roi_std_mean),
                    ColumnValue::Count(s.stable_runs),
                ]
                .iter()
                .map(|val| val.to_string())
                .collect()
            })
            .collect();

        write_table(f, self.format, &titles, &rows)
    }
}

/// Per-miner view of a [`ResultsTable`], one line per miner per run.
#[derive(Debug, Clone, Copy)]
pub struct MinerValueTable<'a> {
    rows: &'a [SweepRow],
    format: Format,
}

impl Display for MinerValueTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let titles: Vec<_> = [
            "policy_group",
            "G_ratio",
            "fee_floor_sat",
            "miner_id",
            "share",
            "ROI",
            "V_honest",
            "V_dev",
            "deviation_rate",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut rows = vec![];
        for row in self.rows.iter() {
            for miner in row.miners.iter() {
                let line: Vec<_> = [
                    ColumnValue::Text(row.point.archetype.name()),
                    ColumnValue::Float(row.point.incentive_ratio),
                    ColumnValue::Float(row.point.fee_floor),
                    ColumnValue::Id(miner.id.get()),
                    ColumnValue::Float(miner.share),
                    ColumnValue::Float(miner.roi),
                    ColumnValue::Float(miner.value.honest),
                    ColumnValue::Float(miner.value.deviate),
                    ColumnValue::Float(miner.deviation_rate),
                ]
                .iter()
                .map(|val| val.to_string())
                .collect();

                rows.push(line);
            }
        }

        write_table(f, self.format, &titles, &rows)
    }
}

fn write_table(
    f: &mut std::fmt::Formatter<'_>,
    format: Format,
    titles: &[String],
    rows: &[Vec<String>],
) -> std::fmt::Result {
    match format {
        Format::CSV => {
            write!(f, "{}", titles.join(","))?;

            for row in rows.iter() {
                writeln!(f)?;
                write!(f, "{}", row.join(","))?;
            }
        }
        Format::PrettyPrint => {
            let mut text_widths: Vec<_> =
                titles.iter().map(|title| title.len()).collect();

            for row in rows.iter() {
                for (i, val) in row.iter().enumerate() {
                    text_widths[i] = text_widths[i].max(val.len());
                }
            }

            for (i, title) in titles.iter().enumerate() {
                write!(
                    f,
                    " {:1$} {2}",
                    title, text_widths[i], SEPARATOR_VERTICAL
                )?;
            }
            writeln!(f)?;

            let total_width = text_widths.iter().map(|x| x + 3).sum();
            for _ in 0..total_width {
                write!(f, "{}", SEPARATOR_HORIZONTAL)?;
            }

            for row in rows.iter() {
                writeln!(f)?;

                for (i, val) in row.iter().enumerate() {
                    write!(
                        f,
                        " {:1$} {2}",
                        val, text_widths[i], SEPARATOR_VERTICAL
                    )?;
                }
            }
        }
    }

    Ok(())
}

/// Type of column that can appear in a [`ResultsTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    PolicyGroup,
    IncentiveRatio,
    IncentiveNorm,
    FeeFloor,
    IncludeBlockSubsidy,
    BetaBar,
    RoiMean,
    RoiStd,
    StableBft,
    RhoHonest,
    RhoDeviate,
    PrMarginGeOne,
    MatchedBlocks,
    HonestBlocks,
    DeviateBlocks,
    TargetUtilization,
    CapacityStep,
    BaseFeeEnabled,
    FeeFloorEnabled,
    AdaptiveCapacityEnabled,
    LatencyPenalty,
    Alpha,
    MinCapacity,
    MaxCapacity,
}

/// Value which corresponds to a [`Column`].
#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnValue {
    Text(&'static str),
    Float(f64),
    Count(usize),
    Id(u64),
    Flag(bool),
}

impl Column {
    /// Every column, in table order.
    const ALL: [Column; 24] = [
        Self::PolicyGroup,
        Self::IncentiveRatio,
        Self::IncentiveNorm,
        Self::FeeFloor,
        Self::IncludeBlockSubsidy,
        Self::BetaBar,
        Self::RoiMean,
        Self::RoiStd,
        Self::StableBft,
        Self::RhoHonest,
        Self::RhoDeviate,
        Self::PrMarginGeOne,
        Self::MatchedBlocks,
        Self::HonestBlocks,
        Self::DeviateBlocks,
        Self::TargetUtilization,
        Self::CapacityStep,
        Self::BaseFeeEnabled,
        Self::FeeFloorEnabled,
        Self::AdaptiveCapacityEnabled,
        Self::LatencyPenalty,
        Self::Alpha,
        Self::MinCapacity,
        Self::MaxCapacity,
    ];

    fn get_value(&self, row: &SweepRow, params: &RunParams) -> ColumnValue {
        use ColumnValue::*;

        let SweepRow { point, result, .. } = row;
        let flags = point.archetype.flags();

        match self {
            Self::PolicyGroup => Text(point.archetype.name()),
            Self::IncentiveRatio => Float(point.incentive_ratio),
            Self::IncentiveNorm => Float(point.incentive_norm),
            Self::FeeFloor => Float(point.fee_floor),
            Self::IncludeBlockSubsidy => Flag(params.include_block_subsidy),
            Self::BetaBar => Float(result.beta_bar),
            Self::RoiMean => Float(result.roi_mean),
            Self::RoiStd => Float(result.roi_std),
            Self::StableBft => Flag(result.stable_bft),
            Self::RhoHonest => Float(result.rho_honest),
            Self::RhoDeviate => Float(result.rho_deviate),
            Self::PrMarginGeOne => Float(result.pr_margin_ge_one),
            Self::MatchedBlocks => Count(result.matched_blocks),
            Self::HonestBlocks => Count(result.honest_blocks),
            Self::DeviateBlocks => Count(result.deviate_blocks),
            Self::TargetUtilization => {
                Float(params.controller.target_utilization)
            }
            Self::CapacityStep => Float(params.controller.capacity_step),
            Self::BaseFeeEnabled => Flag(flags.base_fee),
            Self::FeeFloorEnabled => Flag(flags.fee_floor),
            Self::AdaptiveCapacityEnabled => Flag(flags.adaptive_capacity),
            Self::LatencyPenalty => {
                Float(params.propagation.latency_penalty_secs)
            }
            Self::Alpha => Float(params.controller.alpha),
            Self::MinCapacity => Float(params.controller.min_capacity_vb),
            Self::MaxCapacity => Float(params.controller.max_capacity_vb),
        }
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = match self {
            Self::PolicyGroup => "policy_group",
            Self::IncentiveRatio => "G_ratio",
            Self::IncentiveNorm => "G_norm",
            Self::FeeFloor => "fee_floor_sat",
            Self::IncludeBlockSubsidy => "include_block_reward",
            Self::BetaBar => "beta_bar",
            Self::RoiMean => "ROI_mean",
            Self::RoiStd => "ROI_std",
            Self::StableBft => "stable_bft",
            Self::RhoHonest => "rho_honest",
            Self::RhoDeviate => "rho_dev",
            Self::PrMarginGeOne => "pr_D_ge_1",
            Self::MatchedBlocks => "matched_blocks",
            Self::HonestBlocks => "honest_blocks",
            Self::DeviateBlocks => "dev_blocks",
            Self::TargetUtilization => "U_star",
            Self::CapacityStep => "delta_step",
            Self::BaseFeeEnabled => "enable_basefee",
            Self::FeeFloorEnabled => "enable_feefloor",
            Self::AdaptiveCapacityEnabled => "enable_adaptive",
            Self::LatencyPenalty => "w_sec",
            Self::Alpha => "alpha",
            Self::MinCapacity => "B_min_vB",
            Self::MaxCapacity => "B_max_vB",
        };

        write!(f, "{}", title)
    }
}

impl Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{}", text),
            Self::Float(value) => {
                write!(f, "{:.1$}", value, FLOAT_PRECISION_DIGITS)
            }
            Self::Count(count) => write!(f, "{}", count),
            Self::Id(id) => write!(f, "{}", id),
            Self::Flag(flag) => write!(f, "{}", flag),
        }
    }
}
