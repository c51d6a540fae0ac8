//! Expected-profit comparison between honest and deviating block production

use crate::{miner::Action, propagation::OrphanRisk};

/// Expected per-round profit of a miner under each strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedProfit {
    pub honest: f64,
    pub deviate: f64,
}

impl ExpectedProfit {
    /// Deviation is preferred only if it is strictly more profitable.
    #[inline]
    pub fn preferred(&self) -> Action {
        if self.deviate > self.honest {
            Action::Deviate
        } else {
            Action::Honest
        }
    }
}

/// Inputs shared by every miner's decision in a round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundContext {
    /// Total block reward `X = subsidy + fee + auxiliary revenue`.
    pub reward: f64,
    /// Deviation incentive `G` for the round.
    pub incentive: f64,
    pub risk: OrphanRisk,
}

/// Evaluates honest against deviating block production.
///
/// The deviation incentive scales with congestion:
/// `G = incentive_norm * U / U*`, so a fully congested network pays more for
/// withholding than one running at its target utilization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionEngine {
    incentive_norm: f64,
    target_utilization: f64,
}

impl DecisionEngine {
    pub fn new(incentive_norm: f64, target_utilization: f64) -> Self {
        Self {
            incentive_norm,
            target_utilization,
        }
    }

    /// Deviation incentive at utilization `utilization`.
    #[inline]
    pub fn incentive(&self, utilization: f64) -> f64 {
        self.incentive_norm * (utilization / self.target_utilization)
    }

    /// Expected profit of a miner with hash-power `share` and per-round
    /// `cost` in the round described by `ctx`.
    pub fn expected_profit(
        &self,
        share: f64,
        cost: f64,
        ctx: &RoundContext,
    ) -> ExpectedProfit {
        let p_honest = share * (1.0 - ctx.risk.honest);
        let p_deviate = share * (1.0 - ctx.risk.deviate);

        ExpectedProfit {
            honest: p_honest * ctx.reward - cost,
            deviate: p_deviate * (ctx.reward + ctx.incentive) - cost,
        }
    }
}
