use std::collections::HashMap;
use std::time::Duration;

use envconfig::Envconfig;
use serde_json::Value;

use crate::api::errors::PostHogError;

pub const DEFAULT_HOST: &str = "https://us.i.posthog.com";

/// Client configuration. Every knob has a production default; only the
/// project API key is mandatory. Without a personal API key the rule-set
/// endpoint is off limits and every flag query goes through the remote
/// decision endpoint.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public token used for capture, decide and remote config.
    pub project_api_key: String,
    /// Personal-scope token; enables local flag evaluation.
    pub personal_api_key: Option<String>,
    pub host: String,
    pub feature_flag_poll_interval: Duration,
    /// Queue depth that triggers a flush.
    pub flush_at: usize,
    pub flush_interval: Duration,
    /// Events per HTTP batch.
    pub max_batch_size: usize,
    /// Backpressure cap; events beyond this are dropped.
    pub max_queue_size: usize,
    /// Attempts per batch before it is dropped.
    pub max_flush_retries: u32,
    pub request_timeout: Duration,
    /// How long `shutdown` waits for the queue to drain.
    pub shutdown_timeout: Duration,
    pub feature_flag_sent_cache_size_limit: usize,
    pub feature_flag_sent_cache_sliding_expiration: Duration,
    /// Fraction of entries dropped when the sent cache overflows.
    pub feature_flag_sent_cache_compaction_percentage: f64,
    pub decision_cache_size: u64,
    /// Merged into every captured event's properties.
    pub super_properties: Option<HashMap<String, Value>>,
    pub disable_geoip: bool,
    pub historical_migrations: bool,
}

impl Config {
    pub fn new(project_api_key: impl Into<String>) -> Self {
        Config {
            project_api_key: project_api_key.into(),
            personal_api_key: None,
            host: DEFAULT_HOST.to_string(),
            feature_flag_poll_interval: Duration::from_secs(30),
            flush_at: 20,
            flush_interval: Duration::from_secs(30),
            max_batch_size: 100,
            max_queue_size: 1000,
            max_flush_retries: 3,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            feature_flag_sent_cache_size_limit: 50_000,
            feature_flag_sent_cache_sliding_expiration: Duration::from_secs(600),
            feature_flag_sent_cache_compaction_percentage: 0.2,
            decision_cache_size: 10_000,
            super_properties: None,
            disable_geoip: true,
            historical_migrations: false,
        }
    }

    pub fn with_personal_api_key(mut self, personal_api_key: impl Into<String>) -> Self {
        self.personal_api_key = Some(personal_api_key.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_super_properties(mut self, super_properties: HashMap<String, Value>) -> Self {
        self.super_properties = Some(super_properties);
        self
    }

    /// Read configuration from `POSTHOG_*` environment variables.
    pub fn init_from_env() -> Result<Self, PostHogError> {
        let env = EnvConfig::init_from_env()
            .map_err(|e| PostHogError::Configuration(e.to_string()))?;

        let mut config = Config::new(env.api_key);
        config.personal_api_key = env.personal_api_key;
        config.host = env.host;
        config.feature_flag_poll_interval =
            Duration::from_secs(env.feature_flag_poll_interval_secs);
        config.flush_at = env.flush_at;
        config.flush_interval = Duration::from_secs(env.flush_interval_secs);
        config.max_batch_size = env.max_batch_size;
        config.max_queue_size = env.max_queue_size;
        config.disable_geoip = env.disable_geoip;
        Ok(config)
    }
}

#[derive(Envconfig)]
struct EnvConfig {
    #[envconfig(from = "POSTHOG_API_KEY")]
    pub api_key: String,

    #[envconfig(from = "POSTHOG_PERSONAL_API_KEY")]
    pub personal_api_key: Option<String>,

    #[envconfig(from = "POSTHOG_HOST", default = "https://us.i.posthog.com")]
    pub host: String,

    #[envconfig(from = "POSTHOG_FEATURE_FLAG_POLL_INTERVAL_SECS", default = "30")]
    pub feature_flag_poll_interval_secs: u64,

    #[envconfig(from = "POSTHOG_FLUSH_AT", default = "20")]
    pub flush_at: usize,

    #[envconfig(from = "POSTHOG_FLUSH_INTERVAL_SECS", default = "30")]
    pub flush_interval_secs: u64,

    #[envconfig(from = "POSTHOG_MAX_BATCH_SIZE", default = "100")]
    pub max_batch_size: usize,

    #[envconfig(from = "POSTHOG_MAX_QUEUE_SIZE", default = "1000")]
    pub max_queue_size: usize,

    #[envconfig(from = "POSTHOG_DISABLE_GEOIP", default = "true")]
    pub disable_geoip: bool,
}
