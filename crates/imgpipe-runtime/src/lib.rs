// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-runtime
//!
//! Orchestration layer that turns the data types in `imgpipe-core` and the
//! pure decision functions in `imgpipe-orchestrator` into running pipeline
//! work.
//!
//! Responsibilities:
//! - drive one stage's attempt loop (generate, validate, judge, fuse, retry)
//! - drive one job through its full stage plan to a terminal status
//! - map an upload request to `N` jobs sharing a credit hold
//! - bound every operation by a timeout and cooperate with cancellation

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cancellation primitives for job and batch execution.
pub mod cancel;
/// The job state machine and batch coordinator.
pub mod pipeline;
/// The per-stage attempt loop.
pub mod stages;
/// Bounded-operation timeouts and wall-clock budgets.
pub mod timeouts;

use cancel::CancellationToken;
use imgpipe_config::PipelineConfig;
use imgpipe_error::ErrorCode;
use imgpipe_judge::JudgeClient;
use imgpipe_model::ModelClient;
use imgpipe_store::{BatchStore, JobStore, StoreError, StructuralMaskCache, UserStore};
use pipeline::{BatchCoordinator, ImageStore, JobExecutor};
use stages::StageExecutor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Errors from the pipeline runtime orchestrator.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Executing a job's stage plan failed.
    #[error("job execution failed")]
    JobFailed(#[source] imgpipe_error::PipelineError),

    /// Submitting or cancelling a batch failed.
    #[error("batch operation failed")]
    BatchFailed(#[source] imgpipe_error::PipelineError),

    /// A store read or write failed outside the context of a specific job.
    #[error("store operation failed")]
    StoreFailed(#[from] StoreError),

    /// The global model-call concurrency semaphore was closed unexpectedly.
    #[error("model concurrency semaphore closed")]
    SemaphoreClosed,
}

impl RuntimeError {
    /// Return the [`ErrorCode`] most closely associated with this error, for
    /// callers that need to surface one without unwrapping the variant.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::JobFailed(e) | Self::BatchFailed(e) => e.code,
            Self::StoreFailed(StoreError::NotFound(_)) => ErrorCode::ImageNotFound,
            Self::StoreFailed(_) => ErrorCode::ValidatorError,
            Self::SemaphoreClosed => ErrorCode::ValidatorError,
        }
    }
}

/// Central orchestrator that holds the configured model/judge backends,
/// persistence stores, and concurrency limits, and exposes the job/batch
/// operations callers (the daemon, the CLI) drive.
pub struct PipelineRuntime {
    config: PipelineConfig,
    model_concurrency: Arc<Semaphore>,
    job_executor: Arc<JobExecutor>,
    batch_coordinator: Arc<BatchCoordinator>,
    users: Arc<UserStore>,
    batches: Arc<BatchStore>,
    jobs: Arc<JobStore>,
    structural_masks: Arc<StructuralMaskCache>,
}

impl PipelineRuntime {
    /// Start building a runtime rooted at `store_root` for on-disk
    /// persistence, using the given model/judge backends and image store.
    #[must_use]
    pub fn builder(
        store_root: impl AsRef<Path>,
        model: Arc<dyn ModelClient>,
        judge: Arc<dyn JudgeClient>,
        images: Arc<dyn ImageStore>,
    ) -> PipelineRuntimeBuilder {
        PipelineRuntimeBuilder {
            store_root: store_root.as_ref().to_path_buf(),
            model,
            judge,
            images,
            config: PipelineConfig::default(),
        }
    }

    /// Load every user, batch, and job record from disk into the in-memory
    /// caches (spec §4.H "resume after restart").
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreFailed`] if any store's hydration fails.
    pub async fn hydrate(&self) -> Result<(), RuntimeError> {
        self.users.hydrate_from_disk().await?;
        self.batches.hydrate_from_disk().await?;
        self.jobs.hydrate_from_disk().await?;
        Ok(())
    }

    /// Submit an upload as a new batch.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::BatchFailed`] on insufficient credit or a
    /// persistence failure.
    pub async fn submit_batch(
        &self,
        user_id: Uuid,
        settings: imgpipe_core::BatchSettings,
        images: Vec<pipeline::PlannedImage>,
    ) -> Result<imgpipe_core::Batch, RuntimeError> {
        self.batch_coordinator.submit_batch(user_id, settings, images).await.map_err(RuntimeError::BatchFailed)
    }

    /// Cancel every non-terminal job in a batch and refund its credit hold.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::BatchFailed`] if the batch doesn't exist or a
    /// store write fails.
    pub async fn cancel_batch(
        &self,
        batch_id: Uuid,
        tokens: &std::collections::BTreeMap<Uuid, CancellationToken>,
    ) -> Result<imgpipe_core::Batch, RuntimeError> {
        self.batch_coordinator.cancel_batch(batch_id, tokens).await.map_err(RuntimeError::BatchFailed)
    }

    /// Drive one job to a terminal status, bounding the number of
    /// simultaneous generative-model calls across the whole runtime by
    /// `globalModelConcurrency` (spec §4.H).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobFailed`] if the job cannot be advanced, or
    /// [`RuntimeError::SemaphoreClosed`] if the concurrency limiter was
    /// dropped out from under this call (only possible during shutdown).
    pub async fn run_job(&self, job_id: Uuid, cancel: CancellationToken) -> Result<imgpipe_core::Job, RuntimeError> {
        let _permit = self.model_concurrency.acquire().await.map_err(|_| RuntimeError::SemaphoreClosed)?;
        self.job_executor.run(job_id, cancel).await.map_err(RuntimeError::JobFailed)
    }

    /// `true` iff every job in the batch has reached a terminal status.
    pub async fn batch_is_terminal(&self, batch_id: Uuid) -> bool {
        self.batch_coordinator.is_terminal(batch_id).await
    }

    /// The active configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The shared structural-mask cache (spec §4.C), exposed so the daemon
    /// and CLI can warm or inspect it directly.
    #[must_use]
    pub fn structural_masks(&self) -> &Arc<StructuralMaskCache> {
        &self.structural_masks
    }

    /// The job store, exposed for read-only status queries.
    #[must_use]
    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// The batch store, exposed for read-only status queries.
    #[must_use]
    pub fn batches(&self) -> &Arc<BatchStore> {
        &self.batches
    }

    /// The user store, exposed for read-only balance queries.
    #[must_use]
    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    /// Run metrics collected across every stage attempt this runtime has
    /// driven, for diagnostics and operational dashboards.
    #[must_use]
    pub fn metrics(&self) -> &Arc<imgpipe_telemetry::MetricsCollector> {
        self.job_executor.stage_executor_metrics()
    }
}

/// Builder for [`PipelineRuntime`].
pub struct PipelineRuntimeBuilder {
    store_root: std::path::PathBuf,
    model: Arc<dyn ModelClient>,
    judge: Arc<dyn JudgeClient>,
    images: Arc<dyn ImageStore>,
    config: PipelineConfig,
}

impl PipelineRuntimeBuilder {
    /// Override the default [`PipelineConfig`].
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish construction.
    #[must_use]
    pub fn build(self) -> PipelineRuntime {
        let users = Arc::new(UserStore::new(&self.store_root));
        let batches = Arc::new(BatchStore::new(&self.store_root));
        let jobs = Arc::new(JobStore::new(&self.store_root));
        let structural_masks = Arc::new(StructuralMaskCache::new());

        let stage_executor = Arc::new(StageExecutor::new(self.model, self.judge, self.config.clone(), structural_masks.clone()));
        let job_executor = Arc::new(JobExecutor::new(
            stage_executor,
            self.images,
            jobs.clone(),
            users.clone(),
            batches.clone(),
            self.config.job_wall_clock_secs,
        ));
        let batch_coordinator = Arc::new(BatchCoordinator::new(users.clone(), batches.clone(), jobs.clone()));

        PipelineRuntime {
            model_concurrency: Arc::new(Semaphore::new(self.config.global_model_concurrency)),
            config: self.config,
            job_executor,
            batch_coordinator,
            users,
            batches,
            jobs,
            structural_masks,
        }
    }
}
