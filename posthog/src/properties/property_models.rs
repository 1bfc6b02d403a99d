use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
    Exact,
    IsNot,
    Icontains,
    NotIcontains,
    Regex,
    NotRegex,
    Gt,
    Lt,
    Gte,
    Lte,
    IsSet,
    IsNotSet,
    IsDateExact,
    IsDateAfter,
    IsDateBefore,
    In,
    NotIn,
    FlagEvaluatesTo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    #[serde(rename = "person")]
    Person,
    #[serde(rename = "cohort")]
    Cohort,
    #[serde(rename = "group")]
    Group,
    // A flag property is compared to another flag's evaluation result
    #[serde(rename = "flag")]
    Flag,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PropertyFilter {
    pub key: String,
    // NB: if a property filter is of type is_set or is_not_set, the value isn't used,
    // and if it's a filter made by the API, the value is None.
    pub value: Option<serde_json::Value>,
    pub operator: Option<OperatorType>,
    #[serde(rename = "type")]
    pub prop_type: PropertyType,
    pub negation: Option<bool>,
    pub group_type_index: Option<i32>,
    /// For `flag` filters: the transitive flag dependencies that must be
    /// evaluated before this filter, dependencies first, ending with the
    /// referenced flag. An empty chain marks a dependency cycle. Filled in at
    /// rule-set load time when the server omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_chain: Option<Vec<String>>,
}

// Manual equality: an absent dependency chain compares equal to an empty one,
// but not to a non-empty one.
impl PartialEq for PropertyFilter {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.operator == other.operator
            && self.prop_type == other.prop_type
            && self.negation == other.negation
            && self.group_type_index == other.group_type_index
            && self.dependency_chain.as_deref().unwrap_or_default()
                == other.dependency_chain.as_deref().unwrap_or_default()
    }
}

impl Eq for PropertyFilter {}

impl PropertyFilter {
    /// Cohort filters carry the referenced cohort id in `value`, either as a
    /// number or a numeric string.
    pub fn cohort_id(&self) -> Option<i64> {
        match self.value.as_ref()? {
            serde_json::Value::Number(num) => num.as_i64(),
            serde_json::Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn is_negated(&self) -> bool {
        self.negation.unwrap_or(false) || self.operator == Some(OperatorType::NotIn)
    }
}
