use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use url::Url;

use crate::api::errors::PostHogError;
use crate::api::types::{FlagDecision, FlagValue};
use crate::capture::event::{
    CapturedEvent, ACTIVE_FEATURE_FLAGS_PROPERTY, FEATURE_FLAG_CALLED_EVENT,
    FEATURE_FLAG_ID_PROPERTY, FEATURE_FLAG_PROPERTY, FEATURE_FLAG_PROPERTY_PREFIX,
    FEATURE_FLAG_REASON_PROPERTY, FEATURE_FLAG_REQUEST_ID_PROPERTY,
    FEATURE_FLAG_RESPONSE_PROPERTY, FEATURE_FLAG_VERSION_PROPERTY, GEOIP_DISABLE_PROPERTY,
    GROUPS_PROPERTY, GROUP_IDENTIFY_EVENT, GROUP_KEY_PROPERTY, GROUP_SET_PROPERTY,
    GROUP_TYPE_PROPERTY, IDENTIFY_EVENT, LIB_NAME, LIB_PROPERTY, LIB_VERSION,
    LIB_VERSION_PROPERTY, LOCALLY_EVALUATED_PROPERTY, SET_ONCE_PROPERTY, SET_PROPERTY,
};
use crate::capture::queue::{EventQueue, QueueOptions};
use crate::capture::retry::RetryPolicy;
use crate::capture::sink::{CaptureSink, HttpSink};
use crate::config::Config;
use crate::flags::decision_cache::{subject_fingerprint, DecisionCache};
use crate::flags::flag_matching::FeatureFlagMatcher;
use crate::flags::flag_models::RuleSet;
use crate::flags::flag_poller::FeatureFlagsPoller;
use crate::flags::remote_evaluation::{fetch_remote_config_payload, RemoteEvaluator};
use crate::flags::sent_cache::{FeatureFlagSentCache, SentFlagKey};
use crate::utils::time::{Clock, SystemClock};

/// Per-call options for the flag query methods.
#[derive(Debug, Clone)]
pub struct FeatureFlagOptions {
    pub person_properties: Option<HashMap<String, Value>>,
    /// group type -> group key
    pub groups: Option<HashMap<String, Value>>,
    /// group type -> properties
    pub group_properties: Option<HashMap<String, HashMap<String, Value>>>,
    /// Skip the remote fallback; inconclusive local evaluations come back
    /// empty.
    pub only_evaluate_locally: bool,
    /// Emit `$feature_flag_called` (deduplicated) for this query.
    pub send_feature_flag_events: bool,
}

impl Default for FeatureFlagOptions {
    fn default() -> Self {
        FeatureFlagOptions {
            person_properties: None,
            groups: None,
            group_properties: None,
            only_evaluate_locally: false,
            send_feature_flag_events: true,
        }
    }
}

/// Per-call options for `capture`.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub properties: Option<HashMap<String, Value>>,
    /// group type -> group key; recorded as `$groups`.
    pub groups: Option<HashMap<String, Value>>,
    /// Evaluate all flags for the subject first and stamp `$feature/<key>`
    /// properties plus `$active_feature_flags` onto the event.
    pub send_feature_flags: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct ClientBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn CaptureSink>>,
    start_feature_flag_polling: bool,
}

impl ClientBuilder {
    pub fn new(config: Config) -> Self {
        ClientBuilder {
            config,
            clock: Arc::new(SystemClock),
            sink: None,
            start_feature_flag_polling: true,
        }
    }

    /// Replace the wall clock; timestamps, relative-date filters and the
    /// sent-flag cache all follow it.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the batch destination (the default posts to `/batch/`).
    pub fn capture_sink(mut self, sink: Arc<dyn CaptureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Don't spawn the background rule-set refresh; `reload_feature_flags`
    /// still works on demand.
    pub fn disable_feature_flag_polling(mut self) -> Self {
        self.start_feature_flag_polling = false;
        self
    }

    pub fn build(self) -> Result<Client, PostHogError> {
        let config = self.config;
        if config.project_api_key.trim().is_empty() {
            return Err(PostHogError::MissingProjectApiKey);
        }
        let host =
            Url::parse(&config.host).map_err(|e| PostHogError::InvalidHostUrl(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("{LIB_NAME}/{LIB_VERSION}"))
            .build()?;

        let sink: Arc<dyn CaptureSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(HttpSink::new(
                http.clone(),
                &host,
                config.project_api_key.clone(),
                config.historical_migrations,
            )?),
        };
        let queue = EventQueue::start(
            QueueOptions {
                flush_at: config.flush_at,
                flush_interval: config.flush_interval,
                max_batch_size: config.max_batch_size,
                max_queue_size: config.max_queue_size,
                retry_policy: RetryPolicy {
                    max_attempts: config.max_flush_retries.max(1),
                    ..RetryPolicy::default()
                },
            },
            sink,
        );

        let remote =
            RemoteEvaluator::new(http.clone(), &host, config.project_api_key.clone())?;

        let poller = match config.personal_api_key.as_deref() {
            Some(personal_api_key) => {
                let poller = FeatureFlagsPoller::new(
                    http.clone(),
                    &host,
                    &config.project_api_key,
                    personal_api_key,
                    self.clock.clone(),
                )?;
                if self.start_feature_flag_polling {
                    poller.start_polling(config.feature_flag_poll_interval);
                }
                Some(poller)
            }
            None => None,
        };

        let decision_cache = DecisionCache::new(config.decision_cache_size);
        let sent_cache = FeatureFlagSentCache::new(
            config.feature_flag_sent_cache_size_limit,
            config.feature_flag_sent_cache_sliding_expiration,
            config.feature_flag_sent_cache_compaction_percentage,
            self.clock.clone(),
        );

        Ok(Client {
            config,
            http,
            host,
            queue,
            poller,
            remote,
            decision_cache,
            sent_cache,
            clock: self.clock,
        })
    }
}

/// The PostHog client: analytics capture plus feature flags.
///
/// Construct one per process and share it; the background flusher and
/// rule-set poller are tied to its lifetime. Every user-facing method is
/// total: failures are logged and surface as absent flags or dropped events,
/// never as panics or errors. Dropping an in-flight call's future cancels its
/// outstanding HTTP request; the background workers are only stopped by
/// `shutdown`.
pub struct Client {
    config: Config,
    http: reqwest::Client,
    host: Url,
    queue: EventQueue,
    poller: Option<FeatureFlagsPoller>,
    remote: RemoteEvaluator,
    decision_cache: DecisionCache,
    sent_cache: FeatureFlagSentCache,
    clock: Arc<dyn Clock>,
}

impl Client {
    /// Build with defaults. Must be called within a tokio runtime.
    pub fn new(config: Config) -> Result<Client, PostHogError> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    fn rule_set(&self) -> Option<Arc<RuleSet>> {
        self.poller.as_ref().and_then(|poller| poller.rule_set())
    }

    /// Force one rule-set fetch cycle right now.
    pub async fn reload_feature_flags(&self) {
        if let Some(poller) = &self.poller {
            poller.reload().await;
        }
    }

    /// Discard the downloaded rule set and entity tag; the next evaluation
    /// falls back to the remote endpoint until a fresh fetch lands.
    pub fn clear_local_flags_cache(&self) {
        if let Some(poller) = &self.poller {
            poller.clear_local_flags_cache();
        }
        self.decision_cache.invalidate_all();
    }

    /// Enqueue one event. Never blocks; when the queue is full the event is
    /// dropped with a warning.
    pub async fn capture(&self, distinct_id: &str, event: &str, options: CaptureOptions) {
        let mut properties = options.properties.unwrap_or_default();

        if options.send_feature_flags {
            let decisions = self
                .decisions_for_subject(
                    distinct_id,
                    None,
                    options.groups.clone(),
                    None,
                    false,
                    true,
                )
                .await;
            let mut active: Vec<&str> = Vec::new();
            for (key, decision) in decisions.iter() {
                let value = decision.to_value();
                if value.is_truthy() {
                    active.push(key.as_str());
                }
                properties.insert(
                    format!("{FEATURE_FLAG_PROPERTY_PREFIX}{key}"),
                    json!(value),
                );
            }
            if !decisions.is_empty() {
                active.sort_unstable();
                properties.insert(ACTIVE_FEATURE_FLAGS_PROPERTY.to_string(), json!(active));
            }
        }

        if let Some(groups) = options.groups {
            properties.insert(GROUPS_PROPERTY.to_string(), json!(groups));
        }

        self.enqueue_event(distinct_id, event, properties, options.timestamp);
    }

    /// Emit `$identify` with `$set` / `$set_once` payloads.
    pub fn identify(
        &self,
        distinct_id: &str,
        set: Option<HashMap<String, Value>>,
        set_once: Option<HashMap<String, Value>>,
    ) {
        let mut properties = HashMap::new();
        if let Some(set) = set {
            properties.insert(SET_PROPERTY.to_string(), json!(set));
        }
        if let Some(set_once) = set_once {
            properties.insert(SET_ONCE_PROPERTY.to_string(), json!(set_once));
        }
        self.enqueue_event(distinct_id, IDENTIFY_EVENT, properties, None);
    }

    /// Emit `$groupidentify` for a group entity.
    pub fn group_identify(
        &self,
        group_type: &str,
        group_key: &str,
        properties: Option<HashMap<String, Value>>,
    ) {
        let distinct_id = format!("${group_type}_{group_key}");
        let mut event_properties = HashMap::from([
            (GROUP_TYPE_PROPERTY.to_string(), json!(group_type)),
            (GROUP_KEY_PROPERTY.to_string(), json!(group_key)),
        ]);
        if let Some(properties) = properties {
            event_properties.insert(GROUP_SET_PROPERTY.to_string(), json!(properties));
        }
        self.enqueue_event(&distinct_id, GROUP_IDENTIFY_EVENT, event_properties, None);
    }

    pub async fn is_feature_enabled(
        &self,
        key: &str,
        distinct_id: &str,
        options: FeatureFlagOptions,
    ) -> bool {
        self.get_feature_flag(key, distinct_id, options)
            .await
            .map(|value| value.is_truthy())
            .unwrap_or(false)
    }

    pub async fn get_feature_flag(
        &self,
        key: &str,
        distinct_id: &str,
        options: FeatureFlagOptions,
    ) -> Option<FlagValue> {
        let decision = self.get_flag_decision(key, distinct_id, &options).await;
        self.report_flag_called(key, distinct_id, decision.as_ref(), &options);
        decision.map(|decision| decision.to_value())
    }

    pub async fn get_all_feature_flags(
        &self,
        distinct_id: &str,
        options: FeatureFlagOptions,
    ) -> HashMap<String, FlagValue> {
        let decisions = self
            .decisions_for_subject(
                distinct_id,
                options.person_properties.clone(),
                options.groups.clone(),
                options.group_properties.clone(),
                options.only_evaluate_locally,
                false,
            )
            .await;
        decisions
            .iter()
            .map(|(key, decision)| (key.clone(), decision.to_value()))
            .collect()
    }

    /// Fetch a flag's remote-config payload, unwrapping one layer of
    /// string-encoded JSON when present.
    pub async fn get_remote_config_payload(&self, key: &str) -> Option<Value> {
        match fetch_remote_config_payload(
            &self.http,
            &self.host,
            &self.config.project_api_key,
            self.config.personal_api_key.as_deref(),
            key,
        )
        .await
        {
            Ok(payload) => Some(payload),
            Err(error) => {
                tracing::warn!("fetching remote config payload for '{key}' failed: {error}");
                None
            }
        }
    }

    /// Flush the capture queue and wait for the delivery attempt.
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    /// Stop the background workers, draining queued events up to the
    /// configured shutdown deadline.
    pub async fn shutdown(self) {
        if let Some(poller) = &self.poller {
            poller.stop();
        }
        self.queue.shutdown(self.config.shutdown_timeout).await;
    }

    fn enqueue_event(
        &self,
        distinct_id: &str,
        event: &str,
        mut properties: HashMap<String, Value>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        if let Some(super_properties) = &self.config.super_properties {
            for (key, value) in super_properties {
                properties
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        properties.insert(LIB_PROPERTY.to_string(), json!(LIB_NAME));
        properties.insert(LIB_VERSION_PROPERTY.to_string(), json!(LIB_VERSION));
        if self.config.disable_geoip {
            properties.insert(GEOIP_DISABLE_PROPERTY.to_string(), json!(true));
        }

        self.queue.enqueue(CapturedEvent {
            event: event.to_string(),
            distinct_id: distinct_id.to_string(),
            properties,
            timestamp: timestamp.unwrap_or_else(|| self.clock.now()),
        });
    }

    /// Single-flag decision: local first, remote fallback.
    async fn get_flag_decision(
        &self,
        key: &str,
        distinct_id: &str,
        options: &FeatureFlagOptions,
    ) -> Option<FlagDecision> {
        if let Some(rule_set) = self.rule_set() {
            if let Some(flag) = rule_set.flag(key) {
                let mut matcher = FeatureFlagMatcher::new(
                    &rule_set,
                    distinct_id,
                    options.person_properties.clone(),
                    options.groups.clone(),
                    options.group_properties.clone(),
                    self.clock.now(),
                );
                match matcher.get_match(flag) {
                    Ok(flag_match) => {
                        return Some(FlagDecision::from_local(flag, &flag_match))
                    }
                    Err(error) => {
                        tracing::debug!("local evaluation of '{key}' inconclusive: {error:?}");
                    }
                }
            } else {
                tracing::debug!("flag '{key}' is not in the local rule set");
            }
        }

        if options.only_evaluate_locally {
            return None;
        }

        match self
            .remote
            .get_decisions(
                distinct_id,
                options.person_properties.clone(),
                options.groups.clone(),
                options.group_properties.clone(),
                Some(vec![key.to_string()]),
            )
            .await
        {
            Ok(mut decisions) => decisions.remove(key),
            Err(error) => {
                tracing::warn!("remote decision for '{key}' failed: {error}");
                None
            }
        }
    }

    /// Decisions for every flag the project has. Locally determined flags are
    /// kept even when others need the remote fallback.
    async fn decisions_for_subject(
        &self,
        distinct_id: &str,
        person_properties: Option<HashMap<String, Value>>,
        groups: Option<HashMap<String, Value>>,
        group_properties: Option<HashMap<String, HashMap<String, Value>>>,
        only_evaluate_locally: bool,
        use_cache: bool,
    ) -> Arc<HashMap<String, FlagDecision>> {
        let fingerprint = subject_fingerprint(
            distinct_id,
            person_properties.as_ref(),
            groups.as_ref(),
            group_properties.as_ref(),
        );
        if use_cache {
            if let Some(cached) = self.decision_cache.get(&fingerprint) {
                return cached;
            }
        }

        let mut decisions: HashMap<String, FlagDecision> = HashMap::new();
        let mut inconclusive: Vec<String> = Vec::new();

        let rule_set = self.rule_set();
        if let Some(rule_set) = &rule_set {
            let mut matcher = FeatureFlagMatcher::new(
                rule_set,
                distinct_id,
                person_properties.clone(),
                groups.clone(),
                group_properties.clone(),
                self.clock.now(),
            );
            for flag in &rule_set.flags {
                if flag.deleted {
                    continue;
                }
                match matcher.get_match(flag) {
                    Ok(flag_match) => {
                        decisions.insert(
                            flag.key.clone(),
                            FlagDecision::from_local(flag, &flag_match),
                        );
                    }
                    Err(error) => {
                        tracing::debug!(
                            "local evaluation of '{}' inconclusive: {error:?}",
                            flag.key
                        );
                        inconclusive.push(flag.key.clone());
                    }
                }
            }
        }

        let needs_remote = rule_set.is_none() || !inconclusive.is_empty();
        if needs_remote && !only_evaluate_locally {
            // With a rule set present only the inconclusive flags are
            // deferred; without one the remote endpoint decides everything
            let flag_keys = rule_set.as_ref().map(|_| inconclusive);
            match self
                .remote
                .get_decisions(
                    distinct_id,
                    person_properties,
                    groups,
                    group_properties,
                    flag_keys,
                )
                .await
            {
                Ok(remote_decisions) => {
                    for (key, decision) in remote_decisions {
                        decisions.insert(key, decision);
                    }
                }
                Err(error) => {
                    tracing::warn!("remote decisions for '{distinct_id}' failed: {error}");
                }
            }
        }

        let decisions = Arc::new(decisions);
        self.decision_cache.insert(fingerprint, decisions.clone());
        decisions
    }

    /// Emit `$feature_flag_called` unless an identical emission is still in
    /// the sent cache.
    fn report_flag_called(
        &self,
        key: &str,
        distinct_id: &str,
        decision: Option<&FlagDecision>,
        options: &FeatureFlagOptions,
    ) {
        if !options.send_feature_flag_events {
            return;
        }

        let response = decision.map(|decision| decision.to_value());
        let sent_key = SentFlagKey {
            flag_key: key.to_string(),
            distinct_id: distinct_id.to_string(),
            response: response
                .as_ref()
                .map_or_else(|| "null".to_string(), |value| value.to_string()),
        };
        if !self.sent_cache.check_and_insert(sent_key) {
            return;
        }

        let mut properties = HashMap::from([
            (FEATURE_FLAG_PROPERTY.to_string(), json!(key)),
            (
                FEATURE_FLAG_RESPONSE_PROPERTY.to_string(),
                response.map_or(Value::Null, |value| json!(value)),
            ),
            (
                LOCALLY_EVALUATED_PROPERTY.to_string(),
                json!(decision.is_some_and(|decision| decision.locally_evaluated)),
            ),
        ]);
        if let Some(decision) = decision {
            if let Some(flag_id) = decision.flag_id {
                properties.insert(FEATURE_FLAG_ID_PROPERTY.to_string(), json!(flag_id));
            }
            if let Some(version) = decision.version {
                properties.insert(FEATURE_FLAG_VERSION_PROPERTY.to_string(), json!(version));
            }
            if let Some(reason) = &decision.reason {
                properties.insert(FEATURE_FLAG_REASON_PROPERTY.to_string(), json!(reason.code));
            }
            if let Some(request_id) = decision.request_id {
                properties.insert(
                    FEATURE_FLAG_REQUEST_ID_PROPERTY.to_string(),
                    json!(request_id),
                );
            }
        }

        self.enqueue_event(distinct_id, FEATURE_FLAG_CALLED_EVENT, properties, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sink::MemorySink;
    use std::time::Duration;

    fn test_client(sink: Arc<MemorySink>) -> Client {
        let mut config = Config::new("phc_test");
        config.flush_interval = Duration::from_secs(3600);
        Client::builder(config)
            .capture_sink(sink)
            .disable_feature_flag_polling()
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_project_api_key_is_rejected() {
        assert!(matches!(
            Client::new(Config::new("")),
            Err(PostHogError::MissingProjectApiKey)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_stamps_library_properties() {
        let sink = Arc::new(MemorySink::new());
        let client = test_client(sink.clone());

        client
            .capture(
                "user-1",
                "user signed up",
                CaptureOptions {
                    properties: Some(HashMap::from([("plan".to_string(), json!("free"))])),
                    ..CaptureOptions::default()
                },
            )
            .await;
        client.flush().await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event, "user signed up");
        assert_eq!(event.distinct_id, "user-1");
        assert_eq!(event.properties["plan"], json!("free"));
        assert_eq!(event.properties[LIB_PROPERTY], json!(LIB_NAME));
        assert_eq!(event.properties[LIB_VERSION_PROPERTY], json!(LIB_VERSION));
        assert_eq!(event.properties[GEOIP_DISABLE_PROPERTY], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_super_properties_do_not_override_event_properties() {
        let sink = Arc::new(MemorySink::new());
        let mut config = Config::new("phc_test");
        config.flush_interval = Duration::from_secs(3600);
        config.super_properties = Some(HashMap::from([
            ("environment".to_string(), json!("production")),
            ("plan".to_string(), json!("super")),
        ]));
        let client = Client::builder(config)
            .capture_sink(sink.clone())
            .disable_feature_flag_polling()
            .build()
            .unwrap();

        client
            .capture(
                "user-1",
                "event",
                CaptureOptions {
                    properties: Some(HashMap::from([("plan".to_string(), json!("free"))])),
                    ..CaptureOptions::default()
                },
            )
            .await;
        client.flush().await;

        let event = &sink.events()[0];
        assert_eq!(event.properties["environment"], json!("production"));
        assert_eq!(event.properties["plan"], json!("free"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_records_groups() {
        let sink = Arc::new(MemorySink::new());
        let client = test_client(sink.clone());

        client
            .capture(
                "user-1",
                "event",
                CaptureOptions {
                    groups: Some(HashMap::from([(
                        "organization".to_string(),
                        json!("posthog"),
                    )])),
                    ..CaptureOptions::default()
                },
            )
            .await;
        client.flush().await;

        let event = &sink.events()[0];
        assert_eq!(
            event.properties[GROUPS_PROPERTY],
            json!({"organization": "posthog"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_shape() {
        let sink = Arc::new(MemorySink::new());
        let client = test_client(sink.clone());

        client.identify(
            "user-1",
            Some(HashMap::from([("email".to_string(), json!("a@b.com"))])),
            Some(HashMap::from([("first_seen".to_string(), json!("today"))])),
        );
        client.flush().await;

        let event = &sink.events()[0];
        assert_eq!(event.event, IDENTIFY_EVENT);
        assert_eq!(event.properties[SET_PROPERTY], json!({"email": "a@b.com"}));
        assert_eq!(
            event.properties[SET_ONCE_PROPERTY],
            json!({"first_seen": "today"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_identify_shape() {
        let sink = Arc::new(MemorySink::new());
        let client = test_client(sink.clone());

        client.group_identify(
            "organization",
            "posthog",
            Some(HashMap::from([("plan".to_string(), json!("enterprise"))])),
        );
        client.flush().await;

        let event = &sink.events()[0];
        assert_eq!(event.event, GROUP_IDENTIFY_EVENT);
        assert_eq!(event.distinct_id, "$organization_posthog");
        assert_eq!(event.properties[GROUP_TYPE_PROPERTY], json!("organization"));
        assert_eq!(event.properties[GROUP_KEY_PROPERTY], json!("posthog"));
        assert_eq!(
            event.properties[GROUP_SET_PROPERTY],
            json!({"plan": "enterprise"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_only_with_no_rule_set_returns_nothing() {
        let sink = Arc::new(MemorySink::new());
        let client = test_client(sink.clone());

        let options = FeatureFlagOptions {
            only_evaluate_locally: true,
            send_feature_flag_events: false,
            ..FeatureFlagOptions::default()
        };
        assert_eq!(
            client
                .get_feature_flag("missing", "user-1", options.clone())
                .await,
            None
        );
        assert!(!client.is_feature_enabled("missing", "user-1", options).await);

        client.flush().await;
        assert!(sink.events().is_empty());
    }
}
