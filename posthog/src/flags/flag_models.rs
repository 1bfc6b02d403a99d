use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cohorts::cohort_models::{CohortExpression, CohortId};
use crate::properties::property_models::PropertyFilter;
use crate::utils::graph_utils;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FlagGroupType {
    pub properties: Option<Vec<PropertyFilter>>,
    pub rollout_percentage: Option<f64>,
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MultivariateFlagVariant {
    pub key: String,
    pub name: Option<String>,
    pub rollout_percentage: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MultivariateFlagOptions {
    pub variants: Vec<MultivariateFlagVariant>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FlagFilters {
    pub groups: Vec<FlagGroupType>,
    pub multivariate: Option<MultivariateFlagOptions>,
    pub aggregation_group_type_index: Option<i32>,
    pub payloads: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FeatureFlag {
    pub id: i64,
    pub name: Option<String>,
    pub key: String,
    pub filters: FlagFilters,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub ensure_experience_continuity: bool,
    #[serde(default)]
    pub version: Option<i32>,
}

impl FeatureFlag {
    pub fn get_conditions(&self) -> &Vec<FlagGroupType> {
        &self.filters.groups
    }

    pub fn get_variants(&self) -> Vec<MultivariateFlagVariant> {
        self.filters
            .multivariate
            .clone()
            .map_or(vec![], |m| m.variants)
    }

    pub fn get_group_type_index(&self) -> Option<i32> {
        self.filters.aggregation_group_type_index
    }

    /// Payloads are keyed by variant key, or "true" for plain boolean flags.
    pub fn get_payload(&self, match_key: &str) -> Option<Value> {
        self.filters
            .payloads
            .as_ref()
            .and_then(|payloads| payloads.get(match_key))
            .cloned()
    }
}

/// Body of the local-evaluation endpoint response. Cohort ids arrive as JSON
/// object keys, i.e. strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocalEvaluationResponse {
    pub flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub group_type_mapping: Option<HashMap<String, String>>,
    #[serde(default)]
    pub cohorts: Option<HashMap<String, CohortExpression>>,
}

/// One immutable snapshot of everything needed for local evaluation. The
/// poller builds a new one per successful download and swaps it in atomically;
/// readers keep evaluating against whichever snapshot they grabbed.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub flags: Vec<FeatureFlag>,
    flags_by_key: HashMap<String, usize>,
    pub cohorts: HashMap<CohortId, CohortExpression>,
    /// group type index (stringly, as on the wire) -> group type name
    pub group_type_mapping: HashMap<String, String>,
    pub loaded_at: DateTime<Utc>,
}

impl RuleSet {
    pub fn from_response(response: LocalEvaluationResponse, loaded_at: DateTime<Utc>) -> Self {
        let mut flags = response.flags;
        // Flag filters may arrive without precomputed dependency chains;
        // derive them here so evaluation never has to walk the graph
        graph_utils::populate_dependency_chains(&mut flags);

        let flags_by_key = flags
            .iter()
            .enumerate()
            .map(|(index, flag)| (flag.key.clone(), index))
            .collect();

        let cohorts = response
            .cohorts
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(id, cohort)| match id.parse::<CohortId>() {
                Ok(id) => Some((id, cohort)),
                Err(_) => {
                    tracing::warn!("discarding cohort with non-numeric id {id}");
                    None
                }
            })
            .collect();

        RuleSet {
            flags,
            flags_by_key,
            cohorts,
            group_type_mapping: response.group_type_mapping.unwrap_or_default(),
            loaded_at,
        }
    }

    pub fn flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.flags_by_key.get(key).map(|&index| &self.flags[index])
    }
}
