use crate::properties::property_models::PropertyFilter;
use serde::{Deserialize, Serialize};

pub type CohortId = i64;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CohortPropertyType {
    And,
    Or,
}

/// One node of a cohort definition as served by the local-evaluation
/// endpoint: a boolean combination of property filters and nested groups.
/// Cohort filters inside (`type: "cohort"`) reference other cohorts by id.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CohortExpression {
    #[serde(rename = "type")]
    pub prop_type: CohortPropertyType,
    pub values: Vec<CohortNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negation: Option<bool>,
}

// Untagged: a nested group carries "type": "AND"/"OR" plus "values", which a
// property filter can never satisfy, so the first matching variant wins.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CohortNode {
    Group(CohortExpression),
    Filter(PropertyFilter),
}
