/*!
Definitions for miners and their per-round decisions

A [`Miner`] is a participant with a fixed hash-power share and a fallback
per-round operating cost. Each simulation round it records one
[`DecisionRecord`] holding its expected honest and deviation profit and the
[`Action`] it prefers. Histories are append-only; discounted values are
computed once after a run completes.

A [`MinerSet`] is the validated set of miners taking part in a run: shares
must lie in `(0, 1]` and sum to one.
*/

use std::fmt::Display;

use crate::decision::ExpectedProfit;

/// Unique identifier of a miner, as found in the block and cost tables.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinerId(u64);

impl MinerId {
    /// Returns the [`u64`] corresponding to this [`MinerId`].
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for MinerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for MinerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Strategy a miner prefers in a given round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Publish the block immediately.
    #[default]
    Honest,
    /// Withhold propagation to extract the deviation incentive.
    Deviate,
}

impl Action {
    #[inline]
    pub fn is_deviate(&self) -> bool {
        matches!(self, Self::Deviate)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Honest => write!(f, "honest"),
            Self::Deviate => write!(f, "deviate"),
        }
    }
}

/// A miner's evaluation of a single round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionRecord {
    pub round: usize,
    pub profit_honest: f64,
    pub profit_deviate: f64,
    pub action: Action,
}

/// Discounted cumulative profit of a miner over a whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DiscountedValue {
    pub honest: f64,
    pub deviate: f64,
}

/// A mining participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Miner {
    id: MinerId,
    name: Option<String>,
    share: f64,
    average_cost: f64,
    history: Vec<DecisionRecord>,
}

impl Miner {
    /// Creates a miner with the given normalized hash-power `share` and
    /// fallback per-round cost (in satoshi).
    pub fn new(id: MinerId, share: f64, average_cost: f64) -> Self {
        Self {
            id,
            name: None,
            share,
            average_cost,
            history: vec![],
        }
    }

    /// Attaches a display name, usually the mining pool's name.
    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = Some(name.into());

        self
    }

    #[inline]
    pub fn id(&self) -> MinerId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn share(&self) -> f64 {
        self.share
    }

    /// Per-round cost used when no date-specific cost is known.
    #[inline]
    pub fn average_cost(&self) -> f64 {
        self.average_cost
    }

    /// Decision records, in round order.
    pub fn history(&self) -> &[DecisionRecord] {
        &self.history
    }

    pub fn last_decision(&self) -> Option<&DecisionRecord> {
        self.history.last()
    }

    /// Records this round's expected profits and returns the preferred
    /// action (see [`ExpectedProfit::preferred`]).
    pub fn decide_and_record(
        &mut self,
        round: usize,
        profit: ExpectedProfit,
    ) -> Action {
        let action = profit.preferred();

        self.history.push(DecisionRecord {
            round,
            profit_honest: profit.honest,
            profit_deviate: profit.deviate,
            action,
        });

        action
    }

    /// Computes `sum gamma^t * profit(t)` over the decision history for both
    /// strategies.
    pub fn discounted_value(&self, gamma: f64) -> DiscountedValue {
        let mut value = DiscountedValue::default();
        let mut discount = 1.0;
        for record in self.history.iter() {
            value.honest += discount * record.profit_honest;
            value.deviate += discount * record.profit_deviate;
            discount *= gamma;
        }

        value
    }

    /// Fraction of recorded rounds in which this miner preferred deviation.
    pub fn deviation_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }

        let deviations =
            self.history.iter().filter(|r| r.action.is_deviate()).count();

        deviations as f64 / self.history.len() as f64
    }

    /// Returns a copy of this miner with an empty history.
    pub(crate) fn fresh(&self) -> Self {
        Self {
            history: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MinerSetError {
    #[error("shares sum to {0}, not 1.0")]
    BadShareSum(f64),
    #[error("share {1} of miner {0} is not in the range (0.0, 1.0]")]
    BadShare(MinerId, f64),
    #[error("cost {1} of miner {0} is negative or not finite")]
    BadCost(MinerId, f64),
    #[error("miner {0} appears more than once")]
    DuplicateMiner(MinerId),
    #[error("cannot create a miner set with zero miners")]
    ZeroMinersGiven,
}

/// Validated set of miners taking part in a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerSet {
    miners: Vec<Miner>,
}

impl MinerSet {
    /// Allowable difference between the share sum and 1.0.
    const EPSILON_SHARE: f64 = 1e-6;

    pub fn new(miners: Vec<Miner>) -> Result<Self, MinerSetError> {
        use MinerSetError::*;

        if miners.is_empty() {
            return Err(ZeroMinersGiven);
        }

        for (i, miner) in miners.iter().enumerate() {
            let share = miner.share;
            if share.is_nan() || share <= 0.0 || share > 1.0 {
                return Err(BadShare(miner.id, share));
            }

            let cost = miner.average_cost;
            if !cost.is_finite() || cost < 0.0 {
                return Err(BadCost(miner.id, cost));
            }

            if miners[..i].iter().any(|m| m.id == miner.id) {
                return Err(DuplicateMiner(miner.id));
            }
        }

        let sum: f64 = miners.iter().map(|m| m.share).sum();
        if (sum - 1.0).abs() > Self::EPSILON_SHARE {
            return Err(BadShareSum(sum));
        }

        Ok(Self { miners })
    }

    /// Creates a miner set from raw share weights, normalizing them so that
    /// they sum to one.
    pub fn normalized<I>(entries: I) -> Result<Self, MinerSetError>
    where
        I: IntoIterator<Item = (MinerId, f64, f64)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        let total: f64 = entries.iter().map(|(_, weight, _)| weight).sum();

        let miners = entries
            .into_iter()
            .map(|(id, weight, cost)| {
                let share = if total > 0.0 { weight / total } else { 0.0 };
                Miner::new(id, share, cost)
            })
            .collect();

        Self::new(miners)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.miners.len()
    }

    /// Always `false`; miner sets are validated to be non-empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.miners.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Miner> {
        self.miners.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Miner> {
        self.miners.iter_mut()
    }

    /// Position of the miner with the given ID within this set.
    pub fn position(&self, id: MinerId) -> Option<usize> {
        self.miners.iter().position(|m| m.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&Miner> {
        self.miners.get(index)
    }

    /// Returns a copy of this set with all decision histories cleared.
    pub(crate) fn fresh(&self) -> Self {
        Self {
            miners: self.miners.iter().map(Miner::fresh).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a MinerSet {
    type Item = &'a Miner;
    type IntoIter = std::slice::Iter<'a, Miner>;

    fn into_iter(self) -> Self::IntoIter {
        self.miners.iter()
    }
}
