// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP control-plane for the image pipeline: upload, retry-single,
//! cancel-batch, and the job/batch status API (spec §4.K/§6).

pub mod api;
pub mod fs_store;
pub mod middleware;
pub mod validation;

use imgpipe_runtime::cancel::CancellationToken;
use imgpipe_runtime::PipelineRuntime;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use api::{ApiError, build_app};

/// Shared daemon state: the pipeline runtime plus the live cancellation
/// tokens for every job currently running in this process.
#[derive(Clone)]
pub struct AppState {
    /// The orchestration runtime: stores, stage executor, batch coordinator.
    pub runtime: Arc<PipelineRuntime>,
    /// Cancellation tokens for jobs spawned by this process, keyed by job id.
    /// A job's entry is removed once its background task completes.
    pub tokens: Arc<RwLock<BTreeMap<Uuid, CancellationToken>>>,
}

impl AppState {
    /// Build fresh daemon state around an already-constructed runtime.
    #[must_use]
    pub fn new(runtime: Arc<PipelineRuntime>) -> Self {
        Self { runtime, tokens: Arc::new(RwLock::new(BTreeMap::new())) }
    }

    /// Spawn a background task driving `job_id` to a terminal status,
    /// registering its cancellation token so a later batch-cancel or
    /// retry-single request can reach it.
    pub async fn spawn_job(&self, job_id: Uuid) {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(job_id, token.clone());

        let runtime = self.runtime.clone();
        let tokens = self.tokens.clone();
        tokio::spawn(async move {
            if let Err(err) = runtime.run_job(job_id, token).await {
                tracing::warn!(job_id = %job_id, error = %err, "job run ended with error");
            }
            tokens.write().await.remove(&job_id);
        });
    }
}
