use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Reserved event names
pub const FEATURE_FLAG_CALLED_EVENT: &str = "$feature_flag_called";
pub const IDENTIFY_EVENT: &str = "$identify";
pub const GROUP_IDENTIFY_EVENT: &str = "$groupidentify";

// Reserved property keys
pub const LIB_PROPERTY: &str = "$lib";
pub const LIB_VERSION_PROPERTY: &str = "$lib_version";
pub const GEOIP_DISABLE_PROPERTY: &str = "$geoip_disable";
pub const GROUPS_PROPERTY: &str = "$groups";
pub const SET_PROPERTY: &str = "$set";
pub const SET_ONCE_PROPERTY: &str = "$set_once";
pub const GROUP_TYPE_PROPERTY: &str = "$group_type";
pub const GROUP_KEY_PROPERTY: &str = "$group_key";
pub const GROUP_SET_PROPERTY: &str = "$group_set";
pub const FEATURE_FLAG_PROPERTY: &str = "$feature_flag";
pub const FEATURE_FLAG_RESPONSE_PROPERTY: &str = "$feature_flag_response";
pub const FEATURE_FLAG_ID_PROPERTY: &str = "$feature_flag_id";
pub const FEATURE_FLAG_VERSION_PROPERTY: &str = "$feature_flag_version";
pub const FEATURE_FLAG_REASON_PROPERTY: &str = "$feature_flag_reason";
pub const FEATURE_FLAG_REQUEST_ID_PROPERTY: &str = "$feature_flag_request_id";
pub const LOCALLY_EVALUATED_PROPERTY: &str = "locally_evaluated";
pub const ACTIVE_FEATURE_FLAGS_PROPERTY: &str = "$active_feature_flags";
pub const FEATURE_FLAG_PROPERTY_PREFIX: &str = "$feature/";

pub const LIB_NAME: &str = "posthog-rust";
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One analytics event, immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    pub event: String,
    pub distinct_id: String,
    pub properties: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Body of the batch capture endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureBatch {
    pub api_key: String,
    pub historical_migrations: bool,
    pub batch: Vec<CapturedEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_batch_wire_shape() {
        let event = CapturedEvent {
            event: "user signed up".to_string(),
            distinct_id: "user-1".to_string(),
            properties: HashMap::from([("plan".to_string(), json!("free"))]),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        };
        let batch = CaptureBatch {
            api_key: "phc_test".to_string(),
            historical_migrations: false,
            batch: vec![event],
        };

        assert_json_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({
                "api_key": "phc_test",
                "historical_migrations": false,
                "batch": [
                    {
                        "event": "user signed up",
                        "distinct_id": "user-1",
                        "properties": {"plan": "free"},
                        "timestamp": "2024-03-01T09:30:00Z"
                    }
                ]
            })
        );
    }
}
