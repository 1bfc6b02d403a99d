use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use crate::api::errors::PostHogError;
use crate::capture::event::{CaptureBatch, CapturedEvent};

/// Where flushed batches go. The HTTP sink is the production implementation;
/// the memory sink exists for tests and dry runs.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn send_batch(&self, events: Vec<CapturedEvent>) -> Result<(), PostHogError>;
}

pub struct HttpSink {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    historical_migrations: bool,
}

impl HttpSink {
    pub fn new(
        client: reqwest::Client,
        host: &Url,
        api_key: String,
        historical_migrations: bool,
    ) -> Result<Self, PostHogError> {
        let endpoint = host
            .join("batch/")
            .map_err(|e| PostHogError::InvalidHostUrl(e.to_string()))?;
        Ok(HttpSink {
            client,
            endpoint,
            api_key,
            historical_migrations,
        })
    }
}

#[async_trait]
impl CaptureSink for HttpSink {
    async fn send_batch(&self, events: Vec<CapturedEvent>) -> Result<(), PostHogError> {
        let body = CaptureBatch {
            api_key: self.api_key.clone(),
            historical_migrations: self.historical_migrations,
            batch: events,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            // The response body is unused; a malformed one is not a delivery
            // failure
            return Ok(());
        }
        match status.as_u16() {
            401 | 403 => Err(PostHogError::Authentication(status.as_u16())),
            402 => Err(PostHogError::QuotaLimited),
            other => Err(PostHogError::UnexpectedStatus(other)),
        }
    }
}

/// Collects batches in memory instead of sending them anywhere.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().expect("memory sink lock poisoned").clone()
    }
}

#[async_trait]
impl CaptureSink for MemorySink {
    async fn send_batch(&self, events: Vec<CapturedEvent>) -> Result<(), PostHogError> {
        self.events
            .lock()
            .expect("memory sink lock poisoned")
            .extend(events);
        Ok(())
    }
}

/// Whether a failed send is worth retrying: transport errors and server-side
/// trouble are, auth and quota problems are not.
pub fn is_retryable(error: &PostHogError) -> bool {
    match error {
        PostHogError::Transport(_) => true,
        PostHogError::UnexpectedStatus(status) => *status == 429 || *status >= 500,
        _ => false,
    }
}
