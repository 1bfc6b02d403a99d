use std::cmp::Ordering;
use strum::EnumString;

#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
pub enum FeatureFlagMatchReason {
    #[strum(serialize = "condition_match")]
    ConditionMatch,
    #[strum(serialize = "no_condition_match")]
    NoConditionMatch,
    #[strum(serialize = "out_of_rollout_bound")]
    OutOfRolloutBound,
    #[strum(serialize = "no_group_type")]
    NoGroupType,
    #[strum(serialize = "flag_disabled")]
    FlagDisabled,
}

impl FeatureFlagMatchReason {
    pub fn score(&self) -> i32 {
        match self {
            FeatureFlagMatchReason::ConditionMatch => 3,
            FeatureFlagMatchReason::NoGroupType => 2,
            FeatureFlagMatchReason::OutOfRolloutBound => 1,
            FeatureFlagMatchReason::NoConditionMatch => 0,
            FeatureFlagMatchReason::FlagDisabled => 0,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FeatureFlagMatchReason::ConditionMatch => "Matched a condition set",
            FeatureFlagMatchReason::NoConditionMatch => "No matching condition set",
            FeatureFlagMatchReason::OutOfRolloutBound => "Out of rollout bound",
            FeatureFlagMatchReason::NoGroupType => "No group type",
            FeatureFlagMatchReason::FlagDisabled => "Flag disabled",
        }
    }
}

impl PartialOrd for FeatureFlagMatchReason {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeatureFlagMatchReason {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score().cmp(&other.score())
    }
}

impl std::fmt::Display for FeatureFlagMatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FeatureFlagMatchReason::ConditionMatch => "condition_match",
                FeatureFlagMatchReason::NoConditionMatch => "no_condition_match",
                FeatureFlagMatchReason::OutOfRolloutBound => "out_of_rollout_bound",
                FeatureFlagMatchReason::NoGroupType => "no_group_type",
                FeatureFlagMatchReason::FlagDisabled => "flag_disabled",
            }
        )
    }
}
