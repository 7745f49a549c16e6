//! Mock [`ModelClient`] implementation used for local development and tests.
//!
//! Never calls any real vendor API. Produces a deterministic "candidate"
//! by appending a marker byte to the baseline, so downstream validators see
//! a candidate that differs from the baseline without needing real pixels.

use anyhow::Result;
use async_trait::async_trait;
use imgpipe_model::{GenerateRequest, GenerateResponse, ModelClient};
use std::time::Duration;
use tokio::time::sleep;

/// A model client for local development and unit tests.
#[derive(Debug, Clone, Default)]
pub struct MockModelClient {
    /// Artificial latency to simulate a real call, useful for timeout tests.
    pub artificial_delay: Option<Duration>,
    /// When `true`, every call fails as if the vendor API errored.
    pub always_fail: bool,
}

impl MockModelClient {
    /// A client with no delay and no forced failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that always returns an error, for retry-exhaustion tests.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    /// A client with a fixed artificial delay, for timeout tests.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            artificial_delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        if let Some(delay) = self.artificial_delay {
            sleep(delay).await;
        }
        if self.always_fail {
            anyhow::bail!("mock model client configured to always fail");
        }

        let mut image_bytes = request.baseline_image.clone();
        image_bytes.push(request.stage.as_str().as_bytes()[0]);

        Ok(GenerateResponse {
            image_bytes,
            tokens_in: request.prompt.len() as u64,
            tokens_out: 64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgpipe_core::{SamplingKnobs, Stage};

    fn sample_request() -> GenerateRequest {
        GenerateRequest {
            stage: Stage::OneA,
            baseline_image: vec![10, 20, 30],
            prompt: "clean lighting".into(),
            sampling: SamplingKnobs::base(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn generates_a_candidate_that_differs_from_baseline() {
        let client = MockModelClient::new();
        let response = client.generate(sample_request()).await.unwrap();
        assert_ne!(response.image_bytes, vec![10, 20, 30]);
        assert!(response.image_bytes.starts_with(&[10, 20, 30]));
    }

    #[tokio::test]
    async fn failing_client_always_errors() {
        let client = MockModelClient::failing();
        assert!(client.generate(sample_request()).await.is_err());
    }

    #[tokio::test]
    async fn delayed_client_respects_delay() {
        let client = MockModelClient::with_delay(Duration::from_millis(20));
        let start = std::time::Instant::now();
        client.generate(sample_request()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
