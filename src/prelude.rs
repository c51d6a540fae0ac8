/*!
Re-export of common values and datatypes used for running and analyzing
simulations. Must be imported manually.

```
use fee_market_sim::prelude::*;
```
*/

use crate::{
    config, controller, cost, decision, feed, miner, policy, propagation,
    results, simulation, sweep,
};

pub use config::{ConfigError, SimConfig};

pub use controller::{ControllerParams, ControllerState, FeeMarketController};

pub use cost::{CostError, CostResolver, CostTable, DailyCost};

pub use decision::{DecisionEngine, ExpectedProfit};

pub use feed::{BlockFeed, BlockRecord, FeedError, PriceIndex};

pub use miner::{
    Action, DecisionRecord, Miner, MinerId, MinerSet, MinerSetError,
};

pub use policy::{PolicyArchetype, PolicyFlags};

pub use propagation::{OrphanRisk, PropagationModel};

pub use results::{Format, PolicySummary, ResultsTable};

pub use simulation::{
    MinerSummary, RunResult, Simulation, SimulationBuildError,
    SimulationBuilder, SimulationOutput,
};

pub use sweep::{ExperimentSweep, RunParams, SweepError, SweepGrid, SweepPoint};
