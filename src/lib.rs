/*!
Simulator for miner deviation incentives under fee-market policies.

Replays historical blocks through a fee-market controller (base fee, fee
floor, adaptive capacity) and asks, every round, whether each miner expects
more profit from honest block production or from a deviating strategy that
pays an extra incentive at the cost of higher orphan risk. Runs are swept
over six policy archetypes and a grid of incentive and fee-floor values; see
[`sweep::ExperimentSweep`].
*/

pub mod config;
pub mod controller;
pub mod cost;
pub mod decision;
pub mod feed;
pub mod miner;
pub mod policy;
pub mod prelude;
pub mod propagation;
pub mod results;
pub mod simulation;
pub mod sweep;

pub(crate) mod utils;
