// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin HTTP client over the `imgpipe-daemon` API.
//!
//! Kept library-level so it can be exercised in tests against a mock server
//! without spawning the CLI binary.

use anyhow::{Context, Result, bail};
use imgpipe_core::{BatchSettings, FurnishedState, SceneType, User};
use imgpipe_daemon::api::{BatchStatusView, CreateUserRequest, JobStatusView, UploadImage, UploadRequest};
use serde::Serialize;
use uuid::Uuid;

/// A client bound to one daemon base URL.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
}

impl DaemonClient {
    /// Build a client against `base_url` (no trailing slash required).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> serde::Deserialize<'de>>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            resp.json::<T>().await.context("parse daemon response body")
        } else {
            let body = resp.text().await.unwrap_or_default();
            bail!("daemon returned {status}: {body}")
        }
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let resp = self.http.get(self.url("/health")).send().await.context("send health request")?;
        self.send(resp).await
    }

    /// `POST /users`.
    pub async fn create_user(&self, email: impl Into<String>, credits: u64) -> Result<User> {
        let req = CreateUserRequest { email: email.into(), credits };
        let resp = self
            .http
            .post(self.url("/users"))
            .json(&req)
            .send()
            .await
            .context("send create-user request")?;
        self.send(resp).await
    }

    /// `GET /users/{user_id}`.
    pub async fn get_user(&self, user_id: Uuid) -> Result<User> {
        let resp = self
            .http
            .get(self.url(&format!("/users/{user_id}")))
            .send()
            .await
            .context("send get-user request")?;
        self.send(resp).await
    }

    /// `POST /batches`.
    pub async fn upload(&self, user_id: Uuid, settings: BatchSettings, images: Vec<UploadSpec>) -> Result<BatchStatusView> {
        let req = UploadRequest {
            user_id,
            settings,
            images: images.into_iter().map(UploadSpec::into_upload_image).collect(),
        };
        let resp = self
            .http
            .post(self.url("/batches"))
            .json(&req)
            .send()
            .await
            .context("send upload request")?;
        self.send(resp).await
    }

    /// `POST /batches/{batch_id}/cancel`.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<BatchStatusView> {
        let resp = self
            .http
            .post(self.url(&format!("/batches/{batch_id}/cancel")))
            .send()
            .await
            .context("send cancel-batch request")?;
        self.send(resp).await
    }

    /// `POST /jobs/{job_id}/retry`.
    pub async fn retry_job(&self, job_id: Uuid) -> Result<JobStatusView> {
        let resp = self
            .http
            .post(self.url(&format!("/jobs/{job_id}/retry")))
            .send()
            .await
            .context("send retry-job request")?;
        self.send(resp).await
    }

    /// `GET /status/{job_id}`.
    pub async fn job_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        let resp = self
            .http
            .get(self.url(&format!("/status/{job_id}")))
            .send()
            .await
            .context("send job-status request")?;
        self.send(resp).await
    }

    /// `GET /status/batch/{batch_id}`.
    pub async fn batch_status(&self, batch_id: Uuid) -> Result<BatchStatusView> {
        let resp = self
            .http
            .get(self.url(&format!("/status/batch/{batch_id}")))
            .send()
            .await
            .context("send batch-status request")?;
        self.send(resp).await
    }
}

/// One image to submit, parsed from a `--image` CLI flag or a manifest file
/// (spec §6 upload fields, flattened to JSON per `UploadImage`).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct UploadSpec {
    pub input_image_url: String,
    pub scene_type: SceneType,
    pub room_type: Option<String>,
    pub furnished_state: Option<FurnishedState>,
}

impl UploadSpec {
    fn into_upload_image(self) -> UploadImage {
        UploadImage {
            input_image_url: self.input_image_url,
            scene_type: self.scene_type,
            room_type: self.room_type,
            furnished_state: self.furnished_state,
        }
    }
}

/// Parse a manifest file (a JSON array of [`UploadSpec`]) for the `upload` command.
pub fn load_upload_manifest(path: &std::path::Path) -> Result<Vec<UploadSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest file '{}'", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse manifest from '{}'", path.display()))
}
