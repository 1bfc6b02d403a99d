use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::api::types::FlagValue;
use crate::cohorts::cohort_matching::match_cohort;
use crate::flags::flag_match_reason::FeatureFlagMatchReason;
use crate::flags::flag_matching_utils::calculate_hash;
use crate::flags::flag_models::{FeatureFlag, FlagGroupType, RuleSet};
use crate::properties::property_matching::{
    match_property, to_string_representation, FlagMatchingError,
};
use crate::properties::property_models::{PropertyFilter, PropertyType};

pub const VARIANT_SALT: &str = "variant";

/// Synthetic property key that always resolves to the subject identifier
/// unless the caller supplied an explicit property of the same name.
pub const DISTINCT_ID_PROPERTY: &str = "distinct_id";

#[derive(Debug, PartialEq, Clone)]
pub struct FeatureFlagMatch {
    pub matches: bool,
    pub variant: Option<String>,
    pub reason: FeatureFlagMatchReason,
    pub condition_index: Option<usize>,
    pub payload: Option<Value>,
}

impl FeatureFlagMatch {
    pub fn get_flag_value(&self) -> FlagValue {
        match (self.matches, &self.variant) {
            (true, Some(variant)) => FlagValue::String(variant.clone()),
            (true, None) => FlagValue::Boolean(true),
            (false, _) => FlagValue::Boolean(false),
        }
    }
}

/// Evaluates feature flags for one subject against one rule-set snapshot.
///
/// The matcher is pure: it never does I/O, and evaluating the same subject
/// against the same snapshot always produces the same decisions. Results of
/// flag-dependency evaluations are memoized for the lifetime of the matcher,
/// which is one request.
pub struct FeatureFlagMatcher<'a> {
    rule_set: &'a RuleSet,
    distinct_id: String,
    person_properties: HashMap<String, Value>,
    /// group type -> group key
    groups: HashMap<String, Value>,
    group_properties: HashMap<String, HashMap<String, Value>>,
    now: DateTime<Utc>,
    flag_results: HashMap<String, FlagValue>,
}

impl<'a> FeatureFlagMatcher<'a> {
    pub fn new(
        rule_set: &'a RuleSet,
        distinct_id: &str,
        person_properties: Option<HashMap<String, Value>>,
        groups: Option<HashMap<String, Value>>,
        group_properties: Option<HashMap<String, HashMap<String, Value>>>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut person_properties = person_properties.unwrap_or_default();
        // An explicit distinct_id property takes precedence over the synthetic one
        person_properties
            .entry(DISTINCT_ID_PROPERTY.to_string())
            .or_insert_with(|| Value::String(distinct_id.to_string()));

        FeatureFlagMatcher {
            rule_set,
            distinct_id: distinct_id.to_string(),
            person_properties,
            groups: groups.unwrap_or_default(),
            group_properties: group_properties.unwrap_or_default(),
            now,
            flag_results: HashMap::new(),
        }
    }

    /// Evaluate one flag. `Err` means the local data is insufficient for a
    /// definitive answer and the caller should fall back to the remote
    /// decision endpoint.
    pub fn get_match(
        &mut self,
        feature_flag: &FeatureFlag,
    ) -> Result<FeatureFlagMatch, FlagMatchingError> {
        if feature_flag.ensure_experience_continuity {
            // Continuity needs the server-side hash key overrides
            return Err(FlagMatchingError::ExperienceContinuityRequired);
        }

        if !feature_flag.active {
            return Ok(FeatureFlagMatch {
                matches: false,
                variant: None,
                reason: FeatureFlagMatchReason::FlagDisabled,
                condition_index: None,
                payload: None,
            });
        }

        let Some(hashed_identifier) = self.hashed_identifier(feature_flag) else {
            tracing::warn!(
                "can't compute hash for flag '{}' without a group of the right type",
                feature_flag.key
            );
            return Ok(FeatureFlagMatch {
                matches: false,
                variant: None,
                reason: FeatureFlagMatchReason::NoGroupType,
                condition_index: None,
                payload: None,
            });
        };

        let mut best_reason = FeatureFlagMatchReason::NoConditionMatch;
        let mut best_index = None;

        for (index, condition) in feature_flag.get_conditions().iter().enumerate() {
            let (is_match, reason) =
                self.is_condition_match(feature_flag, condition, &hashed_identifier)?;

            if is_match {
                let variant = self.get_matching_variant(feature_flag, condition, &hashed_identifier);
                let payload =
                    feature_flag.get_payload(variant.as_deref().unwrap_or("true"));

                return Ok(FeatureFlagMatch {
                    matches: true,
                    variant,
                    reason: FeatureFlagMatchReason::ConditionMatch,
                    condition_index: Some(index),
                    payload,
                });
            }

            if reason > best_reason {
                best_reason = reason;
                best_index = Some(index);
            }
        }

        Ok(FeatureFlagMatch {
            matches: false,
            variant: None,
            reason: best_reason,
            condition_index: best_index,
            payload: None,
        })
    }

    /// Evaluate one condition group: every filter has to match, in order, and
    /// the subject has to fall inside the rollout bucket.
    fn is_condition_match(
        &mut self,
        feature_flag: &FeatureFlag,
        condition: &FlagGroupType,
        hashed_identifier: &str,
    ) -> Result<(bool, FeatureFlagMatchReason), FlagMatchingError> {
        if let Some(properties) = condition.properties.as_ref() {
            for filter in properties {
                if !self.match_filter(feature_flag, filter)? {
                    return Ok((false, FeatureFlagMatchReason::NoConditionMatch));
                }
            }
        }

        let rollout_percentage = condition.rollout_percentage.unwrap_or(100.0);
        if rollout_percentage < 100.0 {
            let hash = calculate_hash(&feature_flag.key, hashed_identifier, "");
            if hash >= rollout_percentage / 100.0 {
                return Ok((false, FeatureFlagMatchReason::OutOfRolloutBound));
            }
        }

        Ok((true, FeatureFlagMatchReason::ConditionMatch))
    }

    fn match_filter(
        &mut self,
        feature_flag: &FeatureFlag,
        filter: &PropertyFilter,
    ) -> Result<bool, FlagMatchingError> {
        match filter.prop_type {
            PropertyType::Cohort => match_cohort(
                filter,
                &self.person_properties,
                &self.rule_set.cohorts,
                self.now,
            ),
            PropertyType::Flag => self.match_flag_dependency(filter),
            PropertyType::Group => {
                let properties = self.group_properties_for_filter(feature_flag, filter);
                match_property(filter, properties.unwrap_or(&HashMap::new()), self.now)
            }
            PropertyType::Person => match_property(filter, &self.person_properties, self.now),
        }
    }

    fn group_properties_for_filter(
        &self,
        feature_flag: &FeatureFlag,
        filter: &PropertyFilter,
    ) -> Option<&HashMap<String, Value>> {
        let index = filter
            .group_type_index
            .or(feature_flag.get_group_type_index())?;
        let group_type = self.rule_set.group_type_mapping.get(&index.to_string())?;
        self.group_properties.get(group_type)
    }

    /// Evaluate a filter that references another flag's outcome. The
    /// precomputed dependency chain is walked front to back with memoization;
    /// an empty chain is the cycle marker and is inconclusive.
    fn match_flag_dependency(
        &mut self,
        filter: &PropertyFilter,
    ) -> Result<bool, FlagMatchingError> {
        let chain = filter.dependency_chain.clone().unwrap_or_default();
        if chain.is_empty() {
            return Err(FlagMatchingError::MissingDependencyChain(
                filter.key.clone(),
            ));
        }

        let rule_set = self.rule_set;
        for dep_key in chain.iter().chain(std::iter::once(&filter.key)) {
            if self.flag_results.contains_key(dep_key) {
                continue;
            }
            let dep_flag = rule_set.flag(dep_key).ok_or_else(|| {
                FlagMatchingError::ValidationError(format!(
                    "flag dependency '{dep_key}' is not in the rule set"
                ))
            })?;
            let dep_match = self.get_match(dep_flag)?;
            self.flag_results
                .insert(dep_key.clone(), dep_match.get_flag_value());
        }

        let actual = self
            .flag_results
            .get(&filter.key)
            .expect("dependency loop above evaluated the referenced flag");
        let expected = filter.value.as_ref().ok_or_else(|| {
            FlagMatchingError::ValidationError(
                "flag dependency filter without an expected value".to_string(),
            )
        })?;

        Ok(dependency_value_matches(expected, actual))
    }

    fn hashed_identifier(&self, feature_flag: &FeatureFlag) -> Option<String> {
        match feature_flag.get_group_type_index() {
            None => Some(self.distinct_id.clone()),
            Some(index) => {
                let group_type = self.rule_set.group_type_mapping.get(&index.to_string())?;
                let group_key = self.groups.get(group_type)?;
                Some(to_string_representation(group_key))
            }
        }
    }

    /// Pick the multivariate outcome. A condition-level variant override wins
    /// when it names a variant that actually exists; otherwise the variant
    /// hash walks the cumulative rollout ranges in declaration order.
    fn get_matching_variant(
        &self,
        feature_flag: &FeatureFlag,
        condition: &FlagGroupType,
        hashed_identifier: &str,
    ) -> Option<String> {
        if let Some(variant_override) = condition.variant.as_ref() {
            if feature_flag
                .get_variants()
                .iter()
                .any(|variant| &variant.key == variant_override)
            {
                return Some(variant_override.clone());
            }
        }

        let hash = calculate_hash(&feature_flag.key, hashed_identifier, VARIANT_SALT);
        let mut total_percentage = 0.0;
        for variant in feature_flag.get_variants() {
            total_percentage += variant.rollout_percentage / 100.0;
            if hash < total_percentage {
                return Some(variant.key.clone());
            }
        }
        None
    }
}

/// Compare a dependency outcome against the expected value from the filter:
/// a string expects that exact variant (case-sensitive), `true` expects any
/// truthy outcome, `false` expects a plain disabled flag.
fn dependency_value_matches(expected: &Value, actual: &FlagValue) -> bool {
    match expected {
        Value::String(expected_variant) => {
            matches!(actual, FlagValue::String(variant) if variant == expected_variant)
        }
        Value::Bool(true) => actual.is_truthy(),
        Value::Bool(false) => matches!(actual, FlagValue::Boolean(false)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohorts::cohort_models::{CohortExpression, CohortNode, CohortPropertyType};
    use crate::flags::flag_models::{
        FlagFilters, LocalEvaluationResponse, MultivariateFlagOptions, MultivariateFlagVariant,
    };
    use crate::properties::property_models::OperatorType;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn rule_set_with_flags(flags: Vec<FeatureFlag>) -> RuleSet {
        RuleSet::from_response(
            LocalEvaluationResponse {
                flags,
                group_type_mapping: Some(HashMap::from([(
                    "0".to_string(),
                    "organization".to_string(),
                )])),
                cohorts: None,
            },
            now(),
        )
    }

    fn boolean_flag(key: &str, rollout_percentage: f64, active: bool) -> FeatureFlag {
        FeatureFlag {
            id: 1,
            name: None,
            key: key.to_string(),
            filters: FlagFilters {
                groups: vec![FlagGroupType {
                    properties: Some(vec![]),
                    rollout_percentage: Some(rollout_percentage),
                    variant: None,
                }],
                multivariate: None,
                aggregation_group_type_index: None,
                payloads: None,
            },
            deleted: false,
            active,
            ensure_experience_continuity: false,
            version: Some(1),
        }
    }

    fn person_filter(key: &str, value: Value, operator: OperatorType) -> PropertyFilter {
        PropertyFilter {
            key: key.to_string(),
            value: Some(value),
            operator: Some(operator),
            prop_type: PropertyType::Person,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }
    }

    fn matcher<'a>(
        rule_set: &'a RuleSet,
        distinct_id: &str,
        person_properties: Option<HashMap<String, Value>>,
    ) -> FeatureFlagMatcher<'a> {
        FeatureFlagMatcher::new(rule_set, distinct_id, person_properties, None, None, now())
    }

    #[test]
    fn test_blank_flag_with_full_rollout() {
        let rule_set = rule_set_with_flags(vec![boolean_flag("beta-feature", 100.0, true)]);
        let flag = rule_set.flag("beta-feature").unwrap();

        let result = matcher(&rule_set, "distinct-id", None)
            .get_match(flag)
            .unwrap();

        assert!(result.matches);
        assert_eq!(result.reason, FeatureFlagMatchReason::ConditionMatch);
        assert_eq!(result.condition_index, Some(0));
        assert_eq!(result.get_flag_value(), FlagValue::Boolean(true));
    }

    #[test]
    fn test_inactive_flag_is_disabled() {
        let rule_set = rule_set_with_flags(vec![boolean_flag("beta-feature", 100.0, false)]);
        let flag = rule_set.flag("beta-feature").unwrap();

        let result = matcher(&rule_set, "distinct-id", None)
            .get_match(flag)
            .unwrap();

        assert!(!result.matches);
        assert_eq!(result.reason, FeatureFlagMatchReason::FlagDisabled);
    }

    #[test]
    fn test_zero_rollout_never_matches() {
        let rule_set = rule_set_with_flags(vec![boolean_flag("beta-feature", 0.0, true)]);
        let flag = rule_set.flag("beta-feature").unwrap();

        let result = matcher(&rule_set, "distinct-id", None)
            .get_match(flag)
            .unwrap();

        assert!(!result.matches);
        assert_eq!(result.reason, FeatureFlagMatchReason::OutOfRolloutBound);
        assert_eq!(result.condition_index, Some(0));
    }

    #[test]
    fn test_rollout_monotonicity() {
        // Raising the percentage can enable a subject but never disable one
        for distinct_id in ["a", "b", "c", "d", "e", "user-42"] {
            let mut enabled_at_lower = false;
            for percentage in [10.0, 30.0, 50.0, 80.0, 100.0] {
                let rule_set =
                    rule_set_with_flags(vec![boolean_flag("rollout-flag", percentage, true)]);
                let flag = rule_set.flag("rollout-flag").unwrap();
                let result = matcher(&rule_set, distinct_id, None).get_match(flag).unwrap();
                if enabled_at_lower {
                    assert!(result.matches, "{distinct_id} flipped off at {percentage}");
                }
                enabled_at_lower = enabled_at_lower || result.matches;
            }
            assert!(enabled_at_lower, "{distinct_id} disabled even at 100%");
        }
    }

    #[test]
    fn test_person_property_condition() {
        let mut flag = boolean_flag("property-flag", 100.0, true);
        flag.filters.groups[0].properties = Some(vec![person_filter(
            "region",
            json!("USA"),
            OperatorType::Exact,
        )]);
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("property-flag").unwrap();

        let matched = matcher(
            &rule_set,
            "id",
            Some(HashMap::from([("region".to_string(), json!("USA"))])),
        )
        .get_match(flag)
        .unwrap();
        assert!(matched.matches);

        let unmatched = matcher(
            &rule_set,
            "id",
            Some(HashMap::from([("region".to_string(), json!("Canada"))])),
        )
        .get_match(flag)
        .unwrap();
        assert!(!unmatched.matches);
        assert_eq!(unmatched.reason, FeatureFlagMatchReason::NoConditionMatch);

        // Without the property the decision is inconclusive
        assert!(matcher(&rule_set, "id", None).get_match(flag).is_err());
    }

    #[test]
    fn test_distinct_id_synthetic_property() {
        let mut flag = boolean_flag("id-flag", 100.0, true);
        flag.filters.groups[0].properties = Some(vec![person_filter(
            "distinct_id",
            json!("special-id"),
            OperatorType::Exact,
        )]);
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("id-flag").unwrap();

        assert!(matcher(&rule_set, "special-id", None)
            .get_match(flag)
            .unwrap()
            .matches);
        assert!(!matcher(&rule_set, "other-id", None)
            .get_match(flag)
            .unwrap()
            .matches);

        // An explicit distinct_id property wins over the synthetic one
        let overridden = matcher(
            &rule_set,
            "other-id",
            Some(HashMap::from([(
                "distinct_id".to_string(),
                json!("special-id"),
            )])),
        )
        .get_match(flag)
        .unwrap();
        assert!(overridden.matches);
    }

    #[test]
    fn test_first_matching_condition_wins() {
        let mut flag = boolean_flag("ordered-flag", 100.0, true);
        flag.filters.multivariate = Some(MultivariateFlagOptions {
            variants: vec![
                MultivariateFlagVariant {
                    key: "first-variant".to_string(),
                    name: None,
                    rollout_percentage: 50.0,
                },
                MultivariateFlagVariant {
                    key: "second-variant".to_string(),
                    name: None,
                    rollout_percentage: 50.0,
                },
            ],
        });
        flag.filters.groups = vec![
            FlagGroupType {
                properties: Some(vec![person_filter(
                    "email",
                    json!("test@posthog.com"),
                    OperatorType::Exact,
                )]),
                rollout_percentage: Some(100.0),
                variant: Some("second-variant".to_string()),
            },
            FlagGroupType {
                properties: Some(vec![]),
                rollout_percentage: Some(100.0),
                variant: Some("first-variant".to_string()),
            },
        ];
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("ordered-flag").unwrap();

        let with_email = matcher(
            &rule_set,
            "test_id",
            Some(HashMap::from([(
                "email".to_string(),
                json!("test@posthog.com"),
            )])),
        )
        .get_match(flag)
        .unwrap();
        assert_eq!(with_email.variant.as_deref(), Some("second-variant"));
        assert_eq!(with_email.condition_index, Some(0));

        let without_email = matcher(
            &rule_set,
            "example_id",
            Some(HashMap::from([(
                "email".to_string(),
                json!("someone@else.com"),
            )])),
        )
        .get_match(flag)
        .unwrap();
        assert_eq!(without_email.variant.as_deref(), Some("first-variant"));
        assert_eq!(without_email.condition_index, Some(1));
    }

    #[test]
    fn test_unknown_variant_override_falls_back_to_hash() {
        let mut flag = boolean_flag("override-flag", 100.0, true);
        flag.filters.multivariate = Some(MultivariateFlagOptions {
            variants: vec![MultivariateFlagVariant {
                key: "only-variant".to_string(),
                name: None,
                rollout_percentage: 100.0,
            }],
        });
        flag.filters.groups[0].variant = Some("no-such-variant".to_string());
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("override-flag").unwrap();

        let result = matcher(&rule_set, "id", None).get_match(flag).unwrap();
        assert_eq!(result.variant.as_deref(), Some("only-variant"));
    }

    #[test]
    fn test_variant_determinism() {
        let mut flag = boolean_flag("variant-flag", 100.0, true);
        flag.filters.multivariate = Some(MultivariateFlagOptions {
            variants: vec![
                MultivariateFlagVariant {
                    key: "a".to_string(),
                    name: None,
                    rollout_percentage: 33.0,
                },
                MultivariateFlagVariant {
                    key: "b".to_string(),
                    name: None,
                    rollout_percentage: 33.0,
                },
                MultivariateFlagVariant {
                    key: "c".to_string(),
                    name: None,
                    rollout_percentage: 34.0,
                },
            ],
        });
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("variant-flag").unwrap();

        for distinct_id in ["u1", "u2", "u3", "u4"] {
            let first = matcher(&rule_set, distinct_id, None).get_match(flag).unwrap();
            let second = matcher(&rule_set, distinct_id, None).get_match(flag).unwrap();
            assert_eq!(first.variant, second.variant);
            assert!(first.variant.is_some());
        }
    }

    #[test]
    fn test_multivariate_payload_lookup() {
        let mut flag = boolean_flag("payload-flag", 100.0, true);
        flag.filters.multivariate = Some(MultivariateFlagOptions {
            variants: vec![MultivariateFlagVariant {
                key: "the-variant".to_string(),
                name: None,
                rollout_percentage: 100.0,
            }],
        });
        flag.filters.payloads = Some(json!({"the-variant": [1, 2, 3]}));
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("payload-flag").unwrap();

        let result = matcher(&rule_set, "id", None).get_match(flag).unwrap();
        assert_eq!(result.payload, Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_experience_continuity_is_inconclusive() {
        let mut flag = boolean_flag("continuity-flag", 100.0, true);
        flag.ensure_experience_continuity = true;
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("continuity-flag").unwrap();

        assert_eq!(
            matcher(&rule_set, "id", None).get_match(flag),
            Err(FlagMatchingError::ExperienceContinuityRequired)
        );
    }

    #[test]
    fn test_group_flag_uses_group_key_for_hashing() {
        let mut flag = boolean_flag("group-flag", 100.0, true);
        flag.filters.aggregation_group_type_index = Some(0);
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("group-flag").unwrap();

        // Without a group of the right type the flag is off, not inconclusive
        let no_group = matcher(&rule_set, "id", None).get_match(flag).unwrap();
        assert!(!no_group.matches);
        assert_eq!(no_group.reason, FeatureFlagMatchReason::NoGroupType);

        let with_group = FeatureFlagMatcher::new(
            &rule_set,
            "id",
            None,
            Some(HashMap::from([(
                "organization".to_string(),
                json!("posthog"),
            )])),
            None,
            now(),
        )
        .get_match(flag)
        .unwrap();
        assert!(with_group.matches);
    }

    #[test]
    fn test_group_property_condition() {
        let mut flag = boolean_flag("group-props-flag", 100.0, true);
        flag.filters.aggregation_group_type_index = Some(0);
        flag.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "plan".to_string(),
            value: Some(json!("enterprise")),
            operator: Some(OperatorType::Exact),
            prop_type: PropertyType::Group,
            negation: None,
            group_type_index: Some(0),
            dependency_chain: None,
        }]);
        let rule_set = rule_set_with_flags(vec![flag]);
        let flag = rule_set.flag("group-props-flag").unwrap();

        let groups = HashMap::from([("organization".to_string(), json!("posthog"))]);
        let group_properties = HashMap::from([(
            "organization".to_string(),
            HashMap::from([("plan".to_string(), json!("enterprise"))]),
        )]);

        let matched = FeatureFlagMatcher::new(
            &rule_set,
            "id",
            None,
            Some(groups.clone()),
            Some(group_properties),
            now(),
        )
        .get_match(flag)
        .unwrap();
        assert!(matched.matches);

        // Group properties absent: inconclusive, same as person properties
        let inconclusive =
            FeatureFlagMatcher::new(&rule_set, "id", None, Some(groups), None, now())
                .get_match(flag);
        assert!(inconclusive.is_err());
    }

    #[test]
    fn test_cohort_condition() {
        let mut flag = boolean_flag("cohort-flag", 100.0, true);
        flag.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "id".to_string(),
            value: Some(json!(5)),
            operator: Some(OperatorType::In),
            prop_type: PropertyType::Cohort,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }]);
        let mut response = LocalEvaluationResponse {
            flags: vec![flag],
            group_type_mapping: None,
            cohorts: None,
        };
        response.cohorts = Some(HashMap::from([(
            "5".to_string(),
            CohortExpression {
                prop_type: CohortPropertyType::And,
                values: vec![CohortNode::Filter(person_filter(
                    "region",
                    json!("USA"),
                    OperatorType::Exact,
                ))],
                negation: None,
            },
        )]));
        let rule_set = RuleSet::from_response(response, now());
        let flag = rule_set.flag("cohort-flag").unwrap();

        assert!(matcher(
            &rule_set,
            "id",
            Some(HashMap::from([("region".to_string(), json!("USA"))])),
        )
        .get_match(flag)
        .unwrap()
        .matches);

        // A cohort the SDK doesn't have is inconclusive
        let mut missing_cohort_flag = rule_set.flag("cohort-flag").unwrap().clone();
        missing_cohort_flag.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "id".to_string(),
            value: Some(json!(99)),
            operator: Some(OperatorType::In),
            prop_type: PropertyType::Cohort,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }]);
        assert!(matcher(
            &rule_set,
            "id",
            Some(HashMap::from([("region".to_string(), json!("USA"))])),
        )
        .get_match(&missing_cohort_flag)
        .is_err());
    }

    #[test]
    fn test_flag_dependency() {
        let mut parent = boolean_flag("parent-flag", 100.0, true);
        parent.filters.groups[0].properties = Some(vec![person_filter(
            "region",
            json!("USA"),
            OperatorType::Exact,
        )]);

        let mut child = boolean_flag("child-flag", 100.0, true);
        child.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "parent-flag".to_string(),
            value: Some(json!(true)),
            operator: Some(OperatorType::FlagEvaluatesTo),
            prop_type: PropertyType::Flag,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }]);

        let rule_set = rule_set_with_flags(vec![parent, child]);
        let flag = rule_set.flag("child-flag").unwrap();

        let matched = matcher(
            &rule_set,
            "id",
            Some(HashMap::from([("region".to_string(), json!("USA"))])),
        )
        .get_match(flag)
        .unwrap();
        assert!(matched.matches);

        let unmatched = matcher(
            &rule_set,
            "id",
            Some(HashMap::from([("region".to_string(), json!("Canada"))])),
        )
        .get_match(flag)
        .unwrap();
        assert!(!unmatched.matches);
    }

    #[test]
    fn test_flag_dependency_on_variant() {
        let mut parent = boolean_flag("parent-flag", 100.0, true);
        parent.filters.multivariate = Some(MultivariateFlagOptions {
            variants: vec![MultivariateFlagVariant {
                key: "gold".to_string(),
                name: None,
                rollout_percentage: 100.0,
            }],
        });

        let mut child = boolean_flag("child-flag", 100.0, true);
        child.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "parent-flag".to_string(),
            value: Some(json!("gold")),
            operator: Some(OperatorType::FlagEvaluatesTo),
            prop_type: PropertyType::Flag,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }]);
        let mut case_sensitive_child = child.clone();
        case_sensitive_child.key = "case-child".to_string();
        case_sensitive_child.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "parent-flag".to_string(),
            value: Some(json!("Gold")),
            operator: Some(OperatorType::FlagEvaluatesTo),
            prop_type: PropertyType::Flag,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }]);

        let rule_set = rule_set_with_flags(vec![parent, child, case_sensitive_child]);

        assert!(matcher(&rule_set, "id", None)
            .get_match(rule_set.flag("child-flag").unwrap())
            .unwrap()
            .matches);
        // Variant comparison is case-sensitive
        assert!(!matcher(&rule_set, "id", None)
            .get_match(rule_set.flag("case-child").unwrap())
            .unwrap()
            .matches);
    }

    #[test]
    fn test_circular_flag_dependency_is_inconclusive() {
        let mut first = boolean_flag("first-flag", 100.0, true);
        first.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "second-flag".to_string(),
            value: Some(json!(true)),
            operator: Some(OperatorType::FlagEvaluatesTo),
            prop_type: PropertyType::Flag,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }]);
        let mut second = boolean_flag("second-flag", 100.0, true);
        second.filters.groups[0].properties = Some(vec![PropertyFilter {
            key: "first-flag".to_string(),
            value: Some(json!(true)),
            operator: Some(OperatorType::FlagEvaluatesTo),
            prop_type: PropertyType::Flag,
            negation: None,
            group_type_index: None,
            dependency_chain: None,
        }]);

        let rule_set = rule_set_with_flags(vec![first, second]);

        assert!(matches!(
            matcher(&rule_set, "id", None).get_match(rule_set.flag("first-flag").unwrap()),
            Err(FlagMatchingError::MissingDependencyChain(_))
        ));
    }

    #[test]
    fn test_same_snapshot_same_decision() {
        let rule_set = rule_set_with_flags(vec![boolean_flag("stable-flag", 37.0, true)]);
        let flag = rule_set.flag("stable-flag").unwrap();

        for distinct_id in ["x", "y", "z"] {
            let first = matcher(&rule_set, distinct_id, None).get_match(flag).unwrap();
            let second = matcher(&rule_set, distinct_id, None).get_match(flag).unwrap();
            assert_eq!(first, second);
        }
    }
}
