use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::flags::flag_matching::FeatureFlagMatch;
use crate::flags::flag_models::FeatureFlag;

/// A flag outcome as the product understands it: boolean for plain flags, the
/// variant key for multivariate ones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
}

impl FlagValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Boolean(enabled) => *enabled,
            FlagValue::String(variant) => !variant.is_empty(),
        }
    }
}

impl std::fmt::Display for FlagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagValue::Boolean(enabled) => write!(f, "{enabled}"),
            FlagValue::String(variant) => write!(f, "{variant}"),
        }
    }
}

/// Request body for the decision endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsRequest {
    pub api_key: String,
    pub distinct_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_properties: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_properties: Option<HashMap<String, HashMap<String, Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_keys_to_evaluate: Option<Vec<String>>,
}

/// The decision endpoint answers in one of two shapes; try the older flat one
/// first, exactly as it predates the keyed one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServiceResponse {
    Default(LegacyFlagsResponse),
    V2(FlagsResponse),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFlagsResponse {
    #[serde(default)]
    pub errors_while_computing_flags: bool,
    pub feature_flags: HashMap<String, FlagValue>,
    #[serde(default)]
    pub feature_flag_payloads: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_limited: Option<Vec<String>>,
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagsResponse {
    #[serde(default)]
    pub errors_while_computing_flags: bool,
    pub flags: HashMap<String, FlagDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_limited: Option<Vec<String>>,
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagDetails {
    pub key: String,
    pub enabled: bool,
    pub variant: Option<String>,
    #[serde(default)]
    pub reason: Option<FlagEvaluationReason>,
    pub metadata: FlagDetailsMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagDetailsMetadata {
    pub id: i64,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagEvaluationReason {
    pub code: String,
    #[serde(default)]
    pub condition_index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The one decision type every evaluation path funnels into, local or remote.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDecision {
    pub key: String,
    pub enabled: bool,
    pub variant: Option<String>,
    pub payload: Option<Value>,
    pub reason: Option<FlagEvaluationReason>,
    pub flag_id: Option<i64>,
    pub version: Option<i32>,
    pub request_id: Option<Uuid>,
    pub locally_evaluated: bool,
}

impl FlagDecision {
    pub fn to_value(&self) -> FlagValue {
        match (&self.variant, self.enabled) {
            (Some(variant), true) => FlagValue::String(variant.clone()),
            (_, enabled) => FlagValue::Boolean(enabled),
        }
    }

    pub fn from_local(flag: &FeatureFlag, flag_match: &FeatureFlagMatch) -> Self {
        FlagDecision {
            key: flag.key.clone(),
            enabled: flag_match.matches,
            variant: flag_match.variant.clone(),
            payload: flag_match.payload.clone(),
            reason: Some(FlagEvaluationReason {
                code: flag_match.reason.to_string(),
                condition_index: flag_match.condition_index.map(|i| i as i32),
                description: Some(flag_match.reason.description().to_string()),
            }),
            flag_id: Some(flag.id),
            version: flag.version,
            request_id: None,
            locally_evaluated: true,
        }
    }

    pub fn from_details(details: FlagDetails, request_id: Option<Uuid>) -> Self {
        FlagDecision {
            key: details.key,
            enabled: details.enabled,
            variant: details.variant,
            payload: details.metadata.payload,
            reason: details.reason,
            flag_id: Some(details.metadata.id),
            version: details.metadata.version,
            request_id,
            locally_evaluated: false,
        }
    }

    pub fn from_legacy(key: String, value: FlagValue, payload: Option<Value>) -> Self {
        let (enabled, variant) = match value {
            FlagValue::Boolean(enabled) => (enabled, None),
            FlagValue::String(variant) => (true, Some(variant)),
        };
        FlagDecision {
            key,
            enabled,
            variant,
            payload,
            reason: None,
            flag_id: None,
            version: None,
            request_id: None,
            locally_evaluated: false,
        }
    }
}

impl ServiceResponse {
    pub fn errors_while_computing_flags(&self) -> bool {
        match self {
            ServiceResponse::Default(response) => response.errors_while_computing_flags,
            ServiceResponse::V2(response) => response.errors_while_computing_flags,
        }
    }

    pub fn quota_limited(&self) -> Option<&Vec<String>> {
        match self {
            ServiceResponse::Default(response) => response.quota_limited.as_ref(),
            ServiceResponse::V2(response) => response.quota_limited.as_ref(),
        }
    }

    /// Project either wire shape into the common decision map.
    pub fn into_decisions(self) -> HashMap<String, FlagDecision> {
        match self {
            ServiceResponse::Default(mut response) => response
                .feature_flags
                .drain()
                .map(|(key, value)| {
                    // Payloads arrive as JSON-encoded strings in the flat shape
                    let payload = response
                        .feature_flag_payloads
                        .get(&key)
                        .map(decode_string_wrapped_json);
                    (
                        key.clone(),
                        FlagDecision::from_legacy(key, value, payload),
                    )
                })
                .collect(),
            ServiceResponse::V2(response) => {
                let request_id = response.request_id;
                response
                    .flags
                    .into_iter()
                    .map(|(key, details)| (key, FlagDecision::from_details(details, request_id)))
                    .collect()
            }
        }
    }
}

/// Unwrap one layer of string-encoding when the value is a string whose
/// content itself parses as JSON; otherwise hand the value back untouched.
pub fn decode_string_wrapped_json(value: &Value) -> Value {
    if let Value::String(inner) = value {
        if let Ok(decoded) = serde_json::from_str::<Value>(inner) {
            return decoded;
        }
    }
    value.clone()
}
