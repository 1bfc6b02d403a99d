use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use reqwest::header::{ETAG, IF_NONE_MATCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::api::errors::PostHogError;
use crate::flags::flag_models::{LocalEvaluationResponse, RuleSet};
use crate::utils::time::Clock;

/// Downloads the rule set and keeps it fresh.
///
/// The active rule set lives behind an atomic reference: readers grab a
/// snapshot and evaluate without locking, the poller installs whole new
/// snapshots. Conditional requests ride on the entity tag from the previous
/// download; a 304 keeps the current snapshot, a quota-limited 402 clears it
/// so evaluation falls back to the remote endpoint entirely.
pub struct FeatureFlagsPoller {
    state: Arc<PollerState>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct PollerState {
    client: reqwest::Client,
    endpoint: Url,
    personal_api_key: String,
    rule_set: RwLock<Option<Arc<RuleSet>>>,
    etag: Mutex<Option<String>>,
    clock: Arc<dyn Clock>,
}

impl FeatureFlagsPoller {
    pub fn new(
        client: reqwest::Client,
        host: &Url,
        project_api_key: &str,
        personal_api_key: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PostHogError> {
        let mut endpoint = host
            .join("api/feature_flag/local_evaluation")
            .map_err(|e| PostHogError::InvalidHostUrl(e.to_string()))?;
        endpoint
            .query_pairs_mut()
            .append_pair("token", project_api_key)
            .append_key_only("send_cohorts");

        let (shutdown, _) = watch::channel(false);
        Ok(FeatureFlagsPoller {
            state: Arc::new(PollerState {
                client,
                endpoint,
                personal_api_key: personal_api_key.to_string(),
                rule_set: RwLock::new(None),
                etag: Mutex::new(None),
                clock,
            }),
            shutdown,
            handle: Mutex::new(None),
        })
    }

    /// Spawn the background refresh task: an immediate initial load, then one
    /// reload per interval. Must be called within a tokio runtime.
    pub fn start_polling(&self, poll_interval: Duration) {
        let state = self.state.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        PollerState::fetch_and_swap(&state).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        *self.handle.lock().expect("poller handle lock poisoned") = Some(handle);
    }

    /// One fetch cycle, on demand.
    pub async fn reload(&self) {
        PollerState::fetch_and_swap(&self.state).await;
    }

    /// Current snapshot, if local evaluation is possible at all.
    pub fn rule_set(&self) -> Option<Arc<RuleSet>> {
        self.state
            .rule_set
            .read()
            .expect("rule set lock poisoned")
            .clone()
    }

    /// Discard the rule set and the entity tag, forcing the next fetch to
    /// start from scratch.
    pub fn clear_local_flags_cache(&self) {
        *self
            .state
            .rule_set
            .write()
            .expect("rule set lock poisoned") = None;
        *self.state.etag.lock().expect("etag lock poisoned") = None;
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for FeatureFlagsPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PollerState {
    async fn fetch_and_swap(state: &PollerState) {
        let previous_etag = state.etag.lock().expect("etag lock poisoned").clone();

        let mut request = state
            .client
            .get(state.endpoint.clone())
            .bearer_auth(&state.personal_api_key);
        if let Some(etag) = previous_etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("failed to fetch feature flag definitions: {error}");
                return;
            }
        };

        let status = response.status().as_u16();
        match status {
            200 => {
                let new_etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);

                let body = match response.text().await {
                    Ok(body) => body,
                    Err(error) => {
                        tracing::warn!("failed to read feature flag definitions: {error}");
                        return;
                    }
                };
                let parsed: LocalEvaluationResponse = match serde_json::from_str(&body) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        tracing::warn!("failed to parse feature flag definitions: {error}");
                        return;
                    }
                };

                let rule_set = RuleSet::from_response(parsed, state.clock.now());
                tracing::debug!(
                    "loaded {} feature flags and {} cohorts",
                    rule_set.flags.len(),
                    rule_set.cohorts.len()
                );
                *state.rule_set.write().expect("rule set lock poisoned") =
                    Some(Arc::new(rule_set));
                *state.etag.lock().expect("etag lock poisoned") = new_etag;
            }
            304 => {
                // Unchanged; refresh the entity tag only if the server sent one
                if let Some(new_etag) = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                {
                    *state.etag.lock().expect("etag lock poisoned") =
                        Some(new_etag.to_string());
                }
            }
            402 => {
                tracing::warn!(
                    "feature flags quota limited, dropping local flag definitions"
                );
                *state.rule_set.write().expect("rule set lock poisoned") = None;
                *state.etag.lock().expect("etag lock poisoned") = None;
            }
            401 | 403 => {
                tracing::error!(
                    "personal API key rejected ({status}) while fetching feature flag definitions"
                );
            }
            other => {
                tracing::warn!(
                    "unexpected status {other} while fetching feature flag definitions"
                );
            }
        }
    }
}
