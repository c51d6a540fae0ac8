//! Fee-market policy archetypes

use std::fmt::Display;

/// Which fee-market mechanisms are active in a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyFlags {
    /// EIP-1559 style base fee adjusted toward the target utilization.
    pub base_fee: bool,
    /// Minimum total fee per block.
    pub fee_floor: bool,
    /// Block capacity adjusted toward the target utilization.
    pub adaptive_capacity: bool,
}

/// The six policy combinations evaluated by an
/// [`ExperimentSweep`](crate::sweep::ExperimentSweep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyArchetype {
    /// Base fee, fee floor and adaptive capacity.
    A,
    /// Base fee and adaptive capacity.
    B,
    /// Base fee and fee floor.
    C,
    /// Base fee only.
    D,
    /// Fee floor and adaptive capacity.
    E,
    /// No policy (baseline).
    F,
}

impl PolicyArchetype {
    pub const ALL: [PolicyArchetype; 6] =
        [Self::A, Self::B, Self::C, Self::D, Self::E, Self::F];

    pub fn flags(&self) -> PolicyFlags {
        let (base_fee, fee_floor, adaptive_capacity) = match self {
            Self::A => (true, true, true),
            Self::B => (true, false, true),
            Self::C => (true, true, false),
            Self::D => (true, false, false),
            Self::E => (false, true, true),
            Self::F => (false, false, false),
        };

        PolicyFlags {
            base_fee,
            fee_floor,
            adaptive_capacity,
        }
    }

    /// Identifier used in results tables.
    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "A_BF_FF_AD",
            Self::B => "B_BF_AD",
            Self::C => "C_BF_FF",
            Self::D => "D_BF",
            Self::E => "E_FF_AD",
            Self::F => "F_NONE",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::A => "Base Fee + Fee Floor + Adaptive",
            Self::B => "Base Fee + Adaptive",
            Self::C => "Base Fee + Fee Floor",
            Self::D => "Base Fee only",
            Self::E => "Fee Floor + Adaptive",
            Self::F => "No policy",
        }
    }
}

impl Display for PolicyArchetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::PolicyArchetype;

    #[test]
    fn floor_archetypes_are_a_c_e() {
        let with_floor: Vec<_> = PolicyArchetype::ALL
            .into_iter()
            .filter(|a| a.flags().fee_floor)
            .collect();

        assert_eq!(
            with_floor,
            vec![PolicyArchetype::A, PolicyArchetype::C, PolicyArchetype::E]
        );
    }

    #[test]
    fn baseline_has_no_mechanism() {
        assert_eq!(PolicyArchetype::F.flags(), Default::default());
    }
}
