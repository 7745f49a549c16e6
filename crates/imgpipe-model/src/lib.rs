#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Pluggable generative-model client abstraction (spec §4.B/§4.G "call the
//! generative model").
//!
//! The stage executor depends only on [`ModelClient`]; concrete backends
//! (a real vendor HTTP client, a mock for tests) live in their own crates.

use anyhow::Result;
use async_trait::async_trait;
use imgpipe_core::{SamplingKnobs, Stage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One call to the generative model for a single stage attempt.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Which stage is being attempted.
    pub stage: Stage,
    /// The baseline image bytes this attempt builds on.
    pub baseline_image: Vec<u8>,
    /// The rendered prompt text for this attempt.
    pub prompt: String,
    /// Sampling knobs for the current tighten level.
    pub sampling: SamplingKnobs,
    /// Per-call timeout; the client must not exceed this.
    pub timeout: Duration,
}

/// The generative model's response for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Candidate image bytes produced by the model.
    pub image_bytes: Vec<u8>,
    /// Inbound token count, for telemetry.
    pub tokens_in: u64,
    /// Outbound token count, for telemetry.
    pub tokens_out: u64,
}

/// A generative-model backend capable of producing one stage's candidate
/// image from a baseline and a prompt.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Stable name for telemetry and error messages.
    fn name(&self) -> &str;

    /// Execute one generation call.
    ///
    /// Implementations should race their own HTTP call against
    /// `request.timeout` and return [`imgpipe_error::ErrorCode::Timeout`]
    /// (via `anyhow`) on expiry rather than hanging past it.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;
}
