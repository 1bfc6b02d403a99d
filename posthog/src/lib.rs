//! Server-side PostHog client: asynchronous event capture plus feature-flag
//! evaluation.
//!
//! Flags are evaluated locally against a periodically refreshed rule set
//! whenever a personal API key is configured, with automatic fallback to the
//! remote decision endpoint when local data is insufficient. Captured events
//! are batched by a background worker and delivered with retries.
//!
//! ```no_run
//! use posthog::{CaptureOptions, Client, Config, FeatureFlagOptions};
//!
//! # async fn run() -> Result<(), posthog::PostHogError> {
//! let client = Client::new(
//!     Config::new("phc_project_key").with_personal_api_key("phx_personal_key"),
//! )?;
//!
//! if client
//!     .is_feature_enabled("beta-feature", "user-42", FeatureFlagOptions::default())
//!     .await
//! {
//!     client
//!         .capture("user-42", "beta feature used", CaptureOptions::default())
//!         .await;
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod capture;
pub mod client;
pub mod cohorts;
pub mod config;
pub mod flags;
pub mod properties;
pub mod utils;

pub use api::errors::PostHogError;
pub use api::types::{FlagDecision, FlagValue};
pub use capture::event::CapturedEvent;
pub use capture::sink::{CaptureSink, MemorySink};
pub use client::{CaptureOptions, Client, ClientBuilder, FeatureFlagOptions};
pub use config::Config;
pub use utils::time::{Clock, SystemClock};
