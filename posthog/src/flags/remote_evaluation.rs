use std::collections::HashMap;

use serde_json::Value;
use url::Url;

use crate::api::errors::PostHogError;
use crate::api::types::{
    decode_string_wrapped_json, FlagDecision, FlagsRequest, ServiceResponse,
};

/// Client for the remote decision endpoint, used whenever local evaluation is
/// inconclusive or unavailable.
pub struct RemoteEvaluator {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl RemoteEvaluator {
    pub fn new(
        client: reqwest::Client,
        host: &Url,
        api_key: String,
    ) -> Result<Self, PostHogError> {
        let mut endpoint = host
            .join("decide")
            .map_err(|e| PostHogError::InvalidHostUrl(e.to_string()))?;
        endpoint.set_query(Some("v=4"));
        Ok(RemoteEvaluator {
            client,
            endpoint,
            api_key,
        })
    }

    /// Post the full subject context and project whatever shape comes back
    /// into the common decision map. `flag_keys` restricts evaluation to the
    /// named flags.
    pub async fn get_decisions(
        &self,
        distinct_id: &str,
        person_properties: Option<HashMap<String, Value>>,
        groups: Option<HashMap<String, Value>>,
        group_properties: Option<HashMap<String, HashMap<String, Value>>>,
        flag_keys: Option<Vec<String>>,
    ) -> Result<HashMap<String, FlagDecision>, PostHogError> {
        let body = FlagsRequest {
            api_key: self.api_key.clone(),
            distinct_id: distinct_id.to_string(),
            groups,
            person_properties,
            group_properties,
            flag_keys_to_evaluate: flag_keys,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            401 | 403 => return Err(PostHogError::Authentication(status)),
            402 => return Err(PostHogError::QuotaLimited),
            _ if !response.status().is_success() => {
                return Err(PostHogError::UnexpectedStatus(status))
            }
            _ => {}
        }

        let text = response.text().await?;
        let parsed: ServiceResponse = serde_json::from_str(&text)?;

        if parsed
            .quota_limited()
            .is_some_and(|resources| resources.iter().any(|r| r == "feature_flags"))
        {
            return Err(PostHogError::QuotaLimited);
        }
        if parsed.errors_while_computing_flags() {
            tracing::warn!("decision endpoint reported errors while computing flags");
        }

        Ok(parsed.into_decisions())
    }
}

/// Fetch a flag's remote-config payload. The endpoint may answer with plain
/// JSON, a JSON-encoded string containing JSON, or a bare string; exactly one
/// layer of string-wrapping is unwrapped.
pub async fn fetch_remote_config_payload(
    client: &reqwest::Client,
    host: &Url,
    project_api_key: &str,
    personal_api_key: Option<&str>,
    flag_key: &str,
) -> Result<Value, PostHogError> {
    let mut url = host
        .join(&format!(
            "api/projects/@current/feature_flags/{flag_key}/remote_config"
        ))
        .map_err(|e| PostHogError::InvalidHostUrl(e.to_string()))?;
    url.query_pairs_mut().append_pair("token", project_api_key);

    let mut request = client.get(url);
    if let Some(personal_api_key) = personal_api_key {
        request = request.bearer_auth(personal_api_key);
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    match status {
        401 | 403 => return Err(PostHogError::Authentication(status)),
        _ if !response.status().is_success() => {
            return Err(PostHogError::UnexpectedStatus(status))
        }
        _ => {}
    }

    let text = response.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(payload) => Ok(decode_string_wrapped_json(&payload)),
        // Not JSON at all: hand the raw body back as a string
        Err(_) => Ok(Value::String(text)),
    }
}
