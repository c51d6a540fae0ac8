/*!
Fee-market controller

[`FeeMarketController`] holds the two feedback-controlled quantities of a run,
the base fee and the block capacity, and updates them once per round from the
observed block utilization `U = min(1, size / capacity)`.

The update order within a round is fixed: utilization is measured against the
capacity in effect at the start of the round, the capacity is then adjusted,
and the base fee step uses the utilization measured before the capacity
change.
*/

use serde::Deserialize;

use crate::{config::ConfigError, policy::PolicyFlags};

fn default_initial_base_fee() -> f64 {
    1.0
}

fn default_alpha() -> f64 {
    0.125
}

fn default_target_utilization() -> f64 {
    0.80
}

fn default_capacity_step() -> f64 {
    0.10
}

fn default_min_capacity() -> f64 {
    1_000_000.0
}

fn default_max_capacity() -> f64 {
    2_000_000.0
}

fn default_base_fee_cap() -> f64 {
    1e15
}

/// Fixed hyperparameters of the fee-market controller.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerParams {
    /// Base fee at the start of a run (satoshi per virtual byte).
    #[serde(default = "default_initial_base_fee")]
    pub initial_base_fee: f64,
    /// Base fee adjustment speed.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Target utilization `U*`, in `(0, 1]`.
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,
    /// Relative capacity step applied when utilization misses the target.
    #[serde(default = "default_capacity_step")]
    pub capacity_step: f64,
    /// Lower capacity bound, also the capacity at the start of a run (vB).
    #[serde(default = "default_min_capacity")]
    pub min_capacity_vb: f64,
    /// Upper capacity bound (vB).
    #[serde(default = "default_max_capacity")]
    pub max_capacity_vb: f64,
    /// Upper bound on the base fee.
    #[serde(default = "default_base_fee_cap")]
    pub base_fee_cap: f64,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            initial_base_fee: default_initial_base_fee(),
            alpha: default_alpha(),
            target_utilization: default_target_utilization(),
            capacity_step: default_capacity_step(),
            min_capacity_vb: default_min_capacity(),
            max_capacity_vb: default_max_capacity(),
            base_fee_cap: default_base_fee_cap(),
        }
    }
}

impl ControllerParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::*;

        let u = self.target_utilization;
        if !(u > 0.0 && u <= 1.0) {
            return Err(InvalidParameter("target_utilization", u));
        }

        let step = self.capacity_step;
        if !(0.0..1.0).contains(&step) {
            return Err(InvalidParameter("capacity_step", step));
        }

        let non_negative = [
            ("initial_base_fee", self.initial_base_fee),
            ("alpha", self.alpha),
            ("base_fee_cap", self.base_fee_cap),
        ];
        for (name, value) in non_negative {
            if value.is_nan() || value < 0.0 {
                return Err(InvalidParameter(name, value));
            }
        }

        let (min, max) = (self.min_capacity_vb, self.max_capacity_vb);
        if !(min.is_finite() && min > 0.0) {
            return Err(InvalidParameter("min_capacity_vb", min));
        }
        if !(max.is_finite() && max >= min) {
            return Err(CapacityBounds { min, max });
        }

        Ok(())
    }
}

/// Base fee and capacity carried from one round to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerState {
    /// Satoshi per virtual byte.
    pub base_fee: f64,
    /// Virtual bytes.
    pub capacity: f64,
}

/// Outcome of one controller update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketStep {
    /// Utilization against the capacity in effect at the start of the round.
    pub utilization: f64,
    /// Controller state after the update.
    pub state: ControllerState,
}

/// Stateful base-fee and capacity controller. A fresh instance is used for
/// every run.
#[derive(Debug, Clone)]
pub struct FeeMarketController {
    params: ControllerParams,
    policy: PolicyFlags,
    fee_floor: f64,
    state: ControllerState,
}

impl FeeMarketController {
    /// Creates a controller at its initial state. `fee_floor` (satoshi per
    /// block) only applies if `policy.fee_floor` is set.
    pub fn new(
        params: ControllerParams,
        policy: PolicyFlags,
        fee_floor: f64,
    ) -> Self {
        Self {
            state: ControllerState {
                base_fee: params.initial_base_fee,
                capacity: params.min_capacity_vb,
            },
            params,
            policy,
            fee_floor,
        }
    }

    #[inline]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// `min(1, size / capacity)` against the current capacity.
    #[inline]
    pub fn utilization(&self, observed_size: f64) -> f64 {
        (observed_size / self.state.capacity).min(1.0)
    }

    /// Advances the controller by one round given the observed block size.
    pub fn step(&mut self, observed_size: f64) -> MarketStep {
        let utilization = self.utilization(observed_size);

        self.state.capacity = self.next_capacity(utilization);
        self.state.base_fee = self.next_base_fee(utilization);

        MarketStep {
            utilization,
            state: self.state,
        }
    }

    fn next_capacity(&self, utilization: f64) -> f64 {
        let capacity = self.state.capacity;
        if !self.policy.adaptive_capacity {
            return capacity;
        }

        let ControllerParams {
            target_utilization: target,
            capacity_step: step,
            min_capacity_vb: min,
            max_capacity_vb: max,
            ..
        } = self.params;

        if utilization > target {
            (capacity * (1.0 + step)).min(max)
        } else if utilization < target {
            (capacity * (1.0 - step)).max(min)
        } else {
            capacity
        }
    }

    fn next_base_fee(&self, utilization: f64) -> f64 {
        let base_fee = self.state.base_fee;
        if !self.policy.base_fee {
            return base_fee;
        }

        let target = self.params.target_utilization;
        let delta = self.params.alpha * (utilization - target) / target;

        (base_fee * (1.0 + delta)).max(0.0).min(self.params.base_fee_cap)
    }

    /// Total fee collected by a block of `observed_size` vB paying `fee_rate`
    /// sat/vB, after the base fee and fee floor of the current state apply.
    pub fn effective_fee(&self, fee_rate: f64, observed_size: f64) -> f64 {
        let raw = fee_rate * observed_size;

        let fee = if self.policy.base_fee {
            raw.max(self.state.base_fee * observed_size)
        } else {
            raw
        };

        if self.policy.fee_floor {
            fee.max(self.fee_floor)
        } else {
            fee
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::policy::PolicyArchetype;

    fn params() -> ControllerParams {
        ControllerParams {
            initial_base_fee: 10.0,
            alpha: 0.125,
            target_utilization: 0.75,
            capacity_step: 0.05,
            min_capacity_vb: 1_000_000.0,
            max_capacity_vb: 1_200_000.0,
            base_fee_cap: 1e15,
        }
    }

    #[test]
    fn utilization_is_capped_at_one() {
        let ctl =
            FeeMarketController::new(params(), PolicyArchetype::F.flags(), 0.0);

        assert_relative_eq!(ctl.utilization(500_000.0), 0.5);
        assert_eq!(ctl.utilization(3_000_000.0), 1.0);
    }

    #[test]
    fn disabled_policy_leaves_state_unchanged() {
        let mut ctl =
            FeeMarketController::new(params(), PolicyArchetype::F.flags(), 0.0);
        let before = ctl.state();

        for size in [0.0, 400_000.0, 1_000_000.0, 5_000_000.0] {
            ctl.step(size);
        }

        assert_eq!(ctl.state(), before);
    }

    #[test]
    fn base_fee_follows_utilization_error() {
        let mut ctl =
            FeeMarketController::new(params(), PolicyArchetype::D.flags(), 0.0);

        // U = 1: fee grows by alpha * (0.25 / 0.75)
        let step = ctl.step(1_000_000.0);
        assert_eq!(step.utilization, 1.0);
        assert_relative_eq!(step.state.base_fee, 10.0 * (1.0 + 0.125 / 3.0));

        // U = 0: fee shrinks by alpha
        let step = ctl.step(0.0);
        assert_relative_eq!(
            step.state.base_fee,
            10.0 * (1.0 + 0.125 / 3.0) * (1.0 - 0.125)
        );
    }

    #[test]
    fn base_fee_is_capped() {
        let mut p = params();
        p.base_fee_cap = 10.5;
        p.alpha = 1.0;
        let mut ctl =
            FeeMarketController::new(p, PolicyArchetype::D.flags(), 0.0);

        for _ in 0..10 {
            ctl.step(1_000_000.0);
        }

        assert_eq!(ctl.state().base_fee, 10.5);
    }

    #[test]
    fn fee_step_uses_pre_update_utilization() {
        let mut ctl =
            FeeMarketController::new(params(), PolicyArchetype::B.flags(), 0.0);

        // Full block: capacity grows, but the fee step still sees U = 1
        let step = ctl.step(1_000_000.0);
        assert_relative_eq!(step.state.capacity, 1_050_000.0);
        assert_relative_eq!(step.state.base_fee, 10.0 * (1.0 + 0.125 / 3.0));
    }

    #[test]
    fn capacity_stays_within_bounds() {
        let mut ctl =
            FeeMarketController::new(params(), PolicyArchetype::E.flags(), 0.0);

        for round in 0..200 {
            let size = if round % 2 == 0 { 2_000_000.0 } else { 100_000.0 };
            let state = ctl.step(size).state;

            assert!(state.capacity >= 1_000_000.0);
            assert!(state.capacity <= 1_200_000.0);
        }

        for _ in 0..50 {
            ctl.step(2_000_000.0);
        }
        assert_eq!(ctl.state().capacity, 1_200_000.0);

        for _ in 0..50 {
            ctl.step(0.0);
        }
        assert_eq!(ctl.state().capacity, 1_000_000.0);
    }

    #[test]
    fn capacity_holds_at_target() {
        let mut ctl =
            FeeMarketController::new(params(), PolicyArchetype::E.flags(), 0.0);

        ctl.step(750_000.0);
        assert_eq!(ctl.state().capacity, 1_000_000.0);
    }

    #[test]
    fn effective_fee_applies_base_fee_and_floor() {
        let ctl = FeeMarketController::new(
            params(),
            PolicyArchetype::A.flags(),
            50_000_000.0,
        );

        // base fee of 10 sat/vB dominates a 2 sat/vB block, floor dominates
        // both
        assert_relative_eq!(ctl.effective_fee(2.0, 1_000_000.0), 50_000_000.0);
        assert_relative_eq!(
            ctl.effective_fee(2.0, 10_000_000.0),
            100_000_000.0
        );
        assert_relative_eq!(
            ctl.effective_fee(20.0, 10_000_000.0),
            200_000_000.0
        );
    }

    #[test]
    fn baseline_fee_is_raw_fee() {
        let ctl =
            FeeMarketController::new(params(), PolicyArchetype::F.flags(), 0.0);

        assert_eq!(ctl.effective_fee(3.5, 800_000.0), 3.5 * 800_000.0);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let mut p = params();
        p.target_utilization = 0.0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.max_capacity_vb = 10.0;
        assert!(matches!(
            p.validate(),
            Err(ConfigError::CapacityBounds { .. })
        ));

        assert!(params().validate().is_ok());
    }
}
