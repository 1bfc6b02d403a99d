use thiserror::Error;

/// Errors surfaced by the SDK's HTTP plumbing and configuration.
///
/// User-facing client methods never propagate these; they log and return a
/// default. The error type exists for construction (`Client::new`) and for
/// the internal request paths.
#[derive(Error, Debug)]
pub enum PostHogError {
    #[error("no project API key configured")]
    MissingProjectApiKey,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("local evaluation requires a personal API key")]
    MissingPersonalApiKey,
    #[error("invalid host URL: {0}")]
    InvalidHostUrl(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authentication rejected with status {0}")]
    Authentication(u16),
    #[error("feature flags quota limited")]
    QuotaLimited,
    #[error("failed to parse response: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
}

impl PostHogError {
    /// Short code for log lines, mirroring how the capture service labels
    /// error counters.
    pub fn error_code(&self) -> &'static str {
        match self {
            PostHogError::MissingProjectApiKey => "missing_project_api_key",
            PostHogError::Configuration(_) => "configuration_error",
            PostHogError::MissingPersonalApiKey => "missing_personal_api_key",
            PostHogError::InvalidHostUrl(_) => "invalid_host_url",
            PostHogError::Transport(_) => "transport_error",
            PostHogError::Authentication(_) => "authentication_error",
            PostHogError::QuotaLimited => "quota_limited",
            PostHogError::Schema(_) => "schema_error",
            PostHogError::UnexpectedStatus(_) => "unexpected_status",
        }
    }
}
