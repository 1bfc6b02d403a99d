use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use posthog::{Client, Config, MemorySink};
use serde_json::{json, Value};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A client pointed at the mock server, with background polling disabled so
/// tests control exactly when the rule set is fetched. Events land in the
/// returned memory sink.
pub fn test_client(server: &MockServer) -> (Client, Arc<MemorySink>) {
    init_logging();
    let sink = Arc::new(MemorySink::new());
    let mut config = Config::new("phc_test")
        .with_personal_api_key("phx_personal")
        .with_host(server.base_url());
    config.flush_interval = Duration::from_secs(3600);
    let client = Client::builder(config)
        .capture_sink(sink.clone())
        .disable_feature_flag_polling()
        .build()
        .expect("client should build");
    (client, sink)
}

/// Like `test_client` but without a personal API key: local evaluation is
/// unavailable and everything goes through the decision endpoint.
pub fn remote_only_client(server: &MockServer) -> (Client, Arc<MemorySink>) {
    init_logging();
    let sink = Arc::new(MemorySink::new());
    let mut config = Config::new("phc_test").with_host(server.base_url());
    config.flush_interval = Duration::from_secs(3600);
    let client = Client::builder(config)
        .capture_sink(sink.clone())
        .build()
        .expect("client should build");
    (client, sink)
}

/// Rule set fixture: a plain rollout flag, a person-property flag, a
/// multivariate flag with overrides, and a flag gated on a cohort the
/// server deliberately does not include.
pub fn local_evaluation_body() -> Value {
    json!({
        "flags": [
            {
                "id": 1,
                "name": "Beta feature",
                "key": "beta-feature",
                "active": true,
                "version": 3,
                "filters": {
                    "groups": [{"properties": [], "rollout_percentage": 100}]
                }
            },
            {
                "id": 2,
                "name": "Disabled feature",
                "key": "disabled-feature",
                "active": false,
                "filters": {
                    "groups": [{"properties": [], "rollout_percentage": 100}]
                }
            },
            {
                "id": 3,
                "name": "US only",
                "key": "us-only",
                "active": true,
                "filters": {
                    "groups": [{
                        "properties": [
                            {"key": "region", "value": "USA", "operator": "exact", "type": "person"}
                        ],
                        "rollout_percentage": 100
                    }]
                }
            },
            {
                "id": 4,
                "name": "Variant experiment",
                "key": "variant-experiment",
                "active": true,
                "filters": {
                    "groups": [
                        {
                            "properties": [
                                {"key": "email", "value": "test@posthog.com", "operator": "exact", "type": "person"}
                            ],
                            "rollout_percentage": 100,
                            "variant": "second-variant"
                        },
                        {"properties": [], "rollout_percentage": 100, "variant": "first-variant"}
                    ],
                    "multivariate": {
                        "variants": [
                            {"key": "first-variant", "name": "First", "rollout_percentage": 50},
                            {"key": "second-variant", "name": "Second", "rollout_percentage": 50}
                        ]
                    }
                }
            },
            {
                "id": 5,
                "name": "Cohort gated",
                "key": "cohort-gated",
                "active": true,
                "filters": {
                    "groups": [{
                        "properties": [
                            {"key": "id", "value": 404, "operator": "in", "type": "cohort"}
                        ],
                        "rollout_percentage": 100
                    }]
                }
            }
        ],
        "group_type_mapping": {"0": "organization"},
        "cohorts": {}
    })
}
