// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job state machine and batch coordinator (spec §4.H/§4.I).
//!
//! [`JobExecutor`] drives a single [`Job`] stage-by-stage to a terminal
//! outcome, delegating the per-stage attempt loop to [`StageExecutor`].
//! [`BatchCoordinator`] turns an upload request into `N` jobs sharing a
//! credit hold, and reconciles that hold when jobs finish or a batch is
//! cancelled outright.

use crate::cancel::CancellationToken;
use crate::stages::StageExecutor;
use crate::timeouts::WallClock;
use anyhow::Result;
use async_trait::async_trait;
use imgpipe_core::{
    Batch, BatchSettings, BlockedBy, Job, JobBuilder, JobStatus, Stage, StageConfig, StagePlan,
    ValidatorReport, per_job_cost,
};
use imgpipe_error::{ErrorCode, PipelineError};
use imgpipe_store::{BatchStore, JobStore, StoreError, UserStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Fetches and publishes stage image bytes for a job. Concrete backends
/// (local disk, object storage) live outside this crate; the pipeline only
/// needs the two operations below.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Fetch the bytes addressed by `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Publish `bytes` as the committed output of `stage` for `job_id`,
    /// returning the URL it is now reachable at.
    async fn put(&self, job_id: Uuid, stage: Stage, bytes: Vec<u8>) -> Result<String>;
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => PipelineError::new(ErrorCode::ImageNotFound, key),
            other => PipelineError::new(ErrorCode::ValidatorError, other.to_string()),
        }
    }
}

/// Drives one job through its derived stage plan (spec §4.H).
pub struct JobExecutor {
    stage_executor: Arc<StageExecutor>,
    images: Arc<dyn ImageStore>,
    jobs: Arc<JobStore>,
    users: Arc<UserStore>,
    batches: Arc<BatchStore>,
    job_wall_clock_secs: u64,
}

impl JobExecutor {
    /// Construct an executor over the given collaborators.
    #[must_use]
    pub fn new(
        stage_executor: Arc<StageExecutor>,
        images: Arc<dyn ImageStore>,
        jobs: Arc<JobStore>,
        users: Arc<UserStore>,
        batches: Arc<BatchStore>,
        job_wall_clock_secs: u64,
    ) -> Self {
        Self {
            stage_executor,
            images,
            jobs,
            users,
            batches,
            job_wall_clock_secs,
        }
    }

    /// The stage executor's run-metrics collector.
    #[must_use]
    pub fn stage_executor_metrics(&self) -> &Arc<imgpipe_telemetry::MetricsCollector> {
        self.stage_executor.metrics()
    }

    /// Drive `job_id` from wherever it currently sits in its stage plan to a
    /// terminal status, persisting progress after every committed stage.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the job cannot be found, the job-level
    /// wall clock trips, or a store write fails.
    pub async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> Result<Job, PipelineError> {
        let clock = WallClock::start(Duration::from_secs(self.job_wall_clock_secs));
        loop {
            let job = self
                .jobs
                .get(job_id)
                .await
                .ok_or_else(|| PipelineError::new(ErrorCode::ImageNotFound, format!("job:{job_id}")))?;

            if job.status.is_terminal() {
                return Ok(job);
            }
            clock.check("job")?;
            if cancel.is_cancelled() {
                return Ok(self.cancel_job(&job).await?);
            }

            let Some(stage) = next_stage(&job) else {
                return Ok(self.complete_job(&job).await?);
            };

            if job.status == JobStatus::Queued {
                self.jobs
                    .update(job_id, |current| {
                        let mut next = current.clone();
                        next.status = JobStatus::Processing;
                        next
                    })
                    .await?;
            }

            let baseline_bytes = self.images.fetch(&baseline_url(&job, stage)).await.map_err(|e| {
                PipelineError::new(
                    ErrorCode::ImageNotFound,
                    format!("failed to fetch baseline for stage {}: {e}", stage.as_str()),
                )
            })?;
            let stage_config = job.per_stage_config.get(&stage).cloned().ok_or_else(|| {
                PipelineError::new(ErrorCode::ValidatorError, format!("no stage config for {}", stage.as_str()))
            })?;
            let variant = (stage == Stage::Two).then_some(job.stage_plan.stage_two_variant).flatten();

            let outcome = self
                .stage_executor
                .run_stage(stage, variant, &stage_config, baseline_bytes, job.retry_state.clone(), &cancel)
                .await?;

            if let Some(committed) = outcome.committed_image {
                let url = self
                    .images
                    .put(job_id, stage, committed)
                    .await
                    .map_err(|e| PipelineError::new(ErrorCode::ValidatorError, format!("failed to publish stage output: {e}")))?;
                self.jobs
                    .update(job_id, |current| commit_stage(current, stage, &url, &outcome.reports, &outcome.retry_state))
                    .await?;
                info!(target: "imgpipe.job", job_id = %job_id, stage = stage.as_str(), "stage committed");
                continue;
            }

            let last_report = outcome.reports.last().cloned();
            let failed = self
                .jobs
                .update(job_id, |current| {
                    fail_job(current, stage, &outcome.reports, &outcome.retry_state, last_report.as_ref())
                })
                .await?;
            warn!(target: "imgpipe.job", job_id = %job_id, stage = stage.as_str(), error_code = ?failed.error_code, "job failed");
            self.refund_credit_hold(&failed).await?;
            let analyzed = self.attach_failure_analysis(&failed).await.unwrap_or(failed);
            return Ok(analyzed);
        }
    }

    async fn complete_job(&self, job: &Job) -> Result<Job, StoreError> {
        if job.status.is_terminal() {
            return Ok(job.clone());
        }
        let last_stage = job.stage_plan.stages.last().copied();
        self.jobs
            .update(job.job_id, move |current| {
                let mut next = current.clone();
                next.status = JobStatus::Completed;
                next.result_stage = last_stage;
                next.result_url = last_stage.and_then(|s| next.stage_urls.get(&s).cloned());
                next
            })
            .await
    }

    async fn cancel_job(&self, job: &Job) -> Result<Job, StoreError> {
        if job.status.is_terminal() {
            return Ok(job.clone());
        }
        let cancelled = self
            .jobs
            .update(job.job_id, |current| {
                let mut next = current.clone();
                next.status = JobStatus::Cancelled;
                next.error_code = Some(ErrorCode::Cancelled);
                next.error_message = Some("job cancelled before completion".to_string());
                next
            })
            .await?;
        let _ = self.refund_credit_hold(&cancelled).await;
        Ok(cancelled)
    }

    /// Refund this job's held credits to its owner and shrink the owning
    /// batch's `creditHold` to match (spec §4.I credit reconciliation —
    /// "refund held credits for any failed or cancelled job").
    async fn refund_credit_hold(&self, job: &Job) -> Result<(), PipelineError> {
        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Ok(());
        }
        let refund = per_job_cost(&job.stage_plan);
        if let Some(batch) = self.batches.get(job.batch_id).await {
            self.users
                .update(batch.owner_user_id, |current| {
                    let mut next = current.clone();
                    next.credits += refund;
                    next
                })
                .await?;
            let mut shrunk = batch.clone();
            shrunk.credit_hold = shrunk.credit_hold.saturating_sub(refund);
            self.batches.put(shrunk).await?;
        }
        Ok(())
    }

    /// Best-effort post-mortem (spec §4.L): analyze a job that just reached
    /// `failed` and persist the structured result alongside it. Failure to
    /// analyze or persist never re-opens the job's terminal state — the
    /// caller gets back whatever job record it already had.
    async fn attach_failure_analysis(&self, job: &Job) -> Result<Job, StoreError> {
        let Some(analysis) = imgpipe_analysis::analyze_job(job) else {
            return Ok(job.clone());
        };
        let Ok(encoded) = serde_json::to_string(&analysis) else {
            return Ok(job.clone());
        };
        self.jobs
            .update(job.job_id, move |current| {
                let mut next = current.clone();
                next.meta.failure_analysis = Some(encoded.clone());
                next
            })
            .await
    }
}

fn next_stage(job: &Job) -> Option<Stage> {
    job.stage_plan.stages.iter().find(|s| !job.stage_urls.contains_key(s)).copied()
}

fn baseline_url(job: &Job, stage: Stage) -> String {
    let idx = job.stage_plan.stages.iter().position(|&s| s == stage).unwrap_or(0);
    if idx == 0 {
        return job.input_image_url.clone();
    }
    let prev = job.stage_plan.stages[idx - 1];
    job.stage_urls.get(&prev).cloned().unwrap_or_else(|| job.input_image_url.clone())
}

fn commit_stage(
    current: &Job,
    stage: Stage,
    url: &str,
    reports: &[ValidatorReport],
    retry_state: &imgpipe_core::RetryState,
) -> Job {
    let mut next = current.clone();
    next.stage_urls.insert(stage, url.to_string());
    next.retry_state = retry_state.clone();
    next.meta.attempts.extend(reports.iter().cloned());
    if reports.iter().any(|r| r.attempt > 1) {
        next.meta.strict_retry = true;
        next.meta
            .strict_retry_reasons
            .extend(reports.iter().filter(|r| !r.final_verdict.pass).map(|r| r.final_verdict.reason.clone()));
    }
    let total_latency: u64 = reports.iter().map(|r| r.latency_ms).sum();
    *next.meta.timings.entry(stage.as_str().to_string()).or_insert(0) += total_latency;
    next
}

fn fail_job(
    current: &Job,
    stage: Stage,
    reports: &[ValidatorReport],
    retry_state: &imgpipe_core::RetryState,
    last_report: Option<&ValidatorReport>,
) -> Job {
    let mut next = current.clone();
    next.retry_state = retry_state.clone();
    next.meta.attempts.extend(reports.iter().cloned());
    next.status = JobStatus::Failed;
    next.error_code = Some(terminal_error_code(stage, last_report));
    next.error_message = last_report.map(|r| r.final_verdict.reason.clone());
    next
}

fn terminal_error_code(stage: Stage, last_report: Option<&ValidatorReport>) -> ErrorCode {
    match last_report.map(|r| r.final_verdict.blocked_by) {
        Some(BlockedBy::ModelSemantic) => ErrorCode::GeminiSemantic,
        Some(BlockedBy::ModelPlacement) => ErrorCode::GeminiPlacement,
        Some(BlockedBy::ModelParseError) => ErrorCode::GeminiParseError,
        _ => match stage {
            Stage::OneA => ErrorCode::StructuralStage1ARejected,
            Stage::OneB => ErrorCode::StructuralStage1BRejected,
            Stage::Two => ErrorCode::StructuralStage2Rejected,
        },
    }
}

/// One image submitted as part of an upload request, already classified and
/// planned by the caller (scene classification and `StagePlan` derivation
/// are outside this crate's scope, spec §3 "the core consumes a classifier
/// as a black box").
pub struct PlannedImage {
    /// Content-addressable key for the original image.
    pub image_id: String,
    /// URL of the original uploaded image.
    pub input_image_url: String,
    /// Derived stage plan for this image.
    pub stage_plan: StagePlan,
    /// Per-stage configuration for this image.
    pub per_stage_config: BTreeMap<Stage, StageConfig>,
}

/// Maps an upload of `N` images to `N` jobs sharing batch settings, enforces
/// the credit hold, and exposes batch-level status/cancellation (spec §4.I).
pub struct BatchCoordinator {
    users: Arc<UserStore>,
    batches: Arc<BatchStore>,
    jobs: Arc<JobStore>,
}

impl BatchCoordinator {
    /// Construct a coordinator over the given stores.
    #[must_use]
    pub fn new(users: Arc<UserStore>, batches: Arc<BatchStore>, jobs: Arc<JobStore>) -> Self {
        Self { users, batches, jobs }
    }

    /// Submit an upload: authenticate the user (by id), compute the total
    /// credit hold, reject with [`ErrorCode::QuotaExceeded`] if the balance
    /// is short, then atomically hold credits and create `N` jobs.
    ///
    /// Job ids are returned in upload order (as `batch.job_ids`) so the
    /// caller can map by index (spec §4.I).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::QuotaExceeded`] if the user's balance is below
    /// the total cost, or a store error if persistence fails.
    pub async fn submit_batch(
        &self,
        user_id: Uuid,
        settings: BatchSettings,
        images: Vec<PlannedImage>,
    ) -> Result<Batch, PipelineError> {
        if images.is_empty() {
            return Err(PipelineError::new(ErrorCode::ImageNotFound, "upload must contain at least one image"));
        }
        let total_cost: u64 = images.iter().map(|i| per_job_cost(&i.stage_plan)).sum();

        let mut rejected = false;
        self.users
            .update(user_id, |current| {
                let mut next = current.clone();
                if current.credits < total_cost {
                    rejected = true;
                } else {
                    next.credits -= total_cost;
                }
                next
            })
            .await?;
        if rejected {
            return Err(PipelineError::new(ErrorCode::QuotaExceeded, format!("insufficient credit balance: need {total_cost}")));
        }

        let batch_id = Uuid::new_v4();
        let mut job_ids = Vec::with_capacity(images.len());
        for planned in images {
            let mut job = JobBuilder::new(batch_id, planned.image_id, planned.input_image_url)
                .stage_plan(planned.stage_plan)
                .build();
            job.per_stage_config = planned.per_stage_config;
            let created = self.jobs.create(job).await?;
            job_ids.push(created.job_id);
        }

        let batch = Batch {
            batch_id,
            owner_user_id: user_id,
            created_at: chrono::Utc::now(),
            settings,
            job_ids,
            credit_hold: total_cost,
        };
        Ok(self.batches.create(batch).await?)
    }

    /// Cancel every non-terminal job in a batch, signal each job's
    /// cancellation token, and refund the corresponding credit hold.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch does not exist or a store write fails.
    pub async fn cancel_batch(
        &self,
        batch_id: Uuid,
        tokens: &BTreeMap<Uuid, CancellationToken>,
    ) -> Result<Batch, PipelineError> {
        let batch = self
            .batches
            .get(batch_id)
            .await
            .ok_or_else(|| PipelineError::new(ErrorCode::ImageNotFound, format!("batch:{batch_id}")))?;

        let mut refund = 0u64;
        for job_id in &batch.job_ids {
            if let Some(token) = tokens.get(job_id) {
                token.cancel();
            }
            let Some(job) = self.jobs.get(*job_id).await else {
                continue;
            };
            if job.status.is_terminal() {
                continue;
            }
            self.jobs
                .update(*job_id, |current| {
                    let mut next = current.clone();
                    next.status = JobStatus::Cancelled;
                    next.error_code = Some(ErrorCode::Cancelled);
                    next.error_message = Some("cancelled as part of batch cancellation".to_string());
                    next
                })
                .await?;
            refund += per_job_cost(&job.stage_plan);
        }

        if refund > 0 {
            self.users
                .update(batch.owner_user_id, |current| {
                    let mut next = current.clone();
                    next.credits += refund;
                    next
                })
                .await?;
        }
        let mut updated = batch;
        updated.credit_hold = updated.credit_hold.saturating_sub(refund);
        Ok(self.batches.put(updated).await?)
    }

    /// `true` iff every job in the batch has reached a terminal status
    /// (spec §3 `Batch` invariant "a batch is terminal iff every job is
    /// terminal").
    pub async fn is_terminal(&self, batch_id: Uuid) -> bool {
        let Some(batch) = self.batches.get(batch_id).await else {
            return true;
        };
        for job_id in &batch.job_ids {
            match self.jobs.get(*job_id).await {
                Some(job) if job.status.is_terminal() => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgpipe_core::{FurnishedState, SceneType, StageTwoVariant, User};
    use imgpipe_judge::{PlacementJudgeRequest, SemanticJudgeRequest};
    use imgpipe_model_mock::MockModelClient;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct MemoryImageStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryImageStore {
        fn seeded(url: &str, bytes: Vec<u8>) -> Self {
            let mut objects = HashMap::new();
            objects.insert(url.to_string(), bytes);
            Self { objects: Mutex::new(objects) }
        }
    }

    #[async_trait]
    impl ImageStore for MemoryImageStore {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.objects.lock().await.get(url).cloned().ok_or_else(|| anyhow::anyhow!("no object at {url}"))
        }

        async fn put(&self, job_id: Uuid, stage: Stage, bytes: Vec<u8>) -> Result<String> {
            let url = format!("mem://{job_id}/{}", stage.as_str());
            self.objects.lock().await.insert(url.clone(), bytes);
            Ok(url)
        }
    }

    struct AlwaysPassJudge;

    #[async_trait]
    impl imgpipe_judge::JudgeClient for AlwaysPassJudge {
        fn name(&self) -> &str {
            "always-pass"
        }
        async fn judge_semantic(&self, _request: SemanticJudgeRequest) -> Result<String> {
            Ok(r#"{"pass": true, "confidence": 0.95}"#.to_string())
        }
        async fn judge_placement(&self, _request: PlacementJudgeRequest) -> Result<String> {
            Ok(r#"{"verdict": "pass", "reasons": []}"#.to_string())
        }
    }

    fn stage_config() -> StageConfig {
        StageConfig {
            scene_type: SceneType::Interior,
            room_type: Some("living room".into()),
            furnished_state: Some(FurnishedState::Furnished),
            staging_style: None,
            replace_sky: None,
            sampling: imgpipe_core::SamplingKnobs::base(),
        }
    }

    fn test_root() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[tokio::test]
    async fn job_runs_single_stage_plan_to_completion() {
        let root = test_root();
        let users = Arc::new(UserStore::new(root.path()));
        let batches = Arc::new(BatchStore::new(root.path()));
        let jobs = Arc::new(JobStore::new(root.path()));

        let user = users
            .create(User { user_id: Uuid::new_v4(), email: "a@example.com".into(), credits: 10, version: 0 })
            .await
            .unwrap();

        let mut per_stage_config = BTreeMap::new();
        per_stage_config.insert(Stage::OneA, stage_config());
        let mut job = JobBuilder::new(Uuid::new_v4(), "img1", "mem://input")
            .stage_plan(StagePlan { stages: vec![Stage::OneA], declutter_mode: None, stage_two_variant: None })
            .build();
        job.per_stage_config = per_stage_config;
        let job = jobs.create(job).await.unwrap();

        let batch = Batch {
            batch_id: job.batch_id,
            owner_user_id: user.user_id,
            created_at: chrono::Utc::now(),
            settings: BatchSettings::default(),
            job_ids: vec![job.job_id],
            credit_hold: 1,
        };
        batches.create(batch).await.unwrap();

        let images = Arc::new(MemoryImageStore::seeded("mem://input", vec![9, 9, 9]));
        let stage_executor = Arc::new(StageExecutor::new(
            Arc::new(MockModelClient::new()),
            Arc::new(AlwaysPassJudge),
            imgpipe_config::PipelineConfig::default(),
            Arc::new(imgpipe_store::StructuralMaskCache::new()),
        ));
        let executor = JobExecutor::new(stage_executor, images, jobs.clone(), users, batches, 1800);

        let finished = executor.run(job.job_id, CancellationToken::new()).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.result_stage, Some(Stage::OneA));
        assert!(finished.result_url.is_some());
    }

    #[tokio::test]
    async fn batch_submission_rejects_insufficient_credit() {
        let root = test_root();
        let users = Arc::new(UserStore::new(root.path()));
        let batches = Arc::new(BatchStore::new(root.path()));
        let jobs = Arc::new(JobStore::new(root.path()));
        let user = users
            .create(User { user_id: Uuid::new_v4(), email: "b@example.com".into(), credits: 1, version: 0 })
            .await
            .unwrap();

        let coordinator = BatchCoordinator::new(users, batches, jobs);
        let mut per_stage_config = BTreeMap::new();
        per_stage_config.insert(Stage::Two, stage_config());
        let planned = PlannedImage {
            image_id: "img1".into(),
            input_image_url: "mem://input".into(),
            stage_plan: StagePlan {
                stages: vec![Stage::Two],
                declutter_mode: None,
                stage_two_variant: Some(StageTwoVariant::TwoA),
            },
            per_stage_config,
        };
        let result = coordinator.submit_batch(user.user_id, BatchSettings::default(), vec![planned]).await;
        assert_eq!(result.unwrap_err().code, ErrorCode::QuotaExceeded);
    }

    #[tokio::test]
    async fn batch_submission_holds_credit_and_creates_jobs() {
        let root = test_root();
        let users = Arc::new(UserStore::new(root.path()));
        let batches = Arc::new(BatchStore::new(root.path()));
        let jobs = Arc::new(JobStore::new(root.path()));
        let user = users
            .create(User { user_id: Uuid::new_v4(), email: "c@example.com".into(), credits: 5, version: 0 })
            .await
            .unwrap();

        let coordinator = BatchCoordinator::new(users.clone(), batches.clone(), jobs.clone());
        let mut per_stage_config = BTreeMap::new();
        per_stage_config.insert(Stage::OneA, stage_config());
        let planned = PlannedImage {
            image_id: "img1".into(),
            input_image_url: "mem://input".into(),
            stage_plan: StagePlan { stages: vec![Stage::OneA], declutter_mode: None, stage_two_variant: None },
            per_stage_config,
        };
        let batch = coordinator.submit_batch(user.user_id, BatchSettings::default(), vec![planned]).await.unwrap();
        assert_eq!(batch.credit_hold, 1);
        assert_eq!(batch.job_ids.len(), 1);
        let remaining = users.get(user.user_id).await.unwrap();
        assert_eq!(remaining.credits, 4);
    }

    #[tokio::test]
    async fn cancelling_a_batch_refunds_non_terminal_jobs() {
        let root = test_root();
        let users = Arc::new(UserStore::new(root.path()));
        let batches = Arc::new(BatchStore::new(root.path()));
        let jobs = Arc::new(JobStore::new(root.path()));
        let user = users
            .create(User { user_id: Uuid::new_v4(), email: "d@example.com".into(), credits: 5, version: 0 })
            .await
            .unwrap();

        let coordinator = BatchCoordinator::new(users.clone(), batches.clone(), jobs.clone());
        let mut per_stage_config = BTreeMap::new();
        per_stage_config.insert(Stage::OneA, stage_config());
        let planned = PlannedImage {
            image_id: "img1".into(),
            input_image_url: "mem://input".into(),
            stage_plan: StagePlan { stages: vec![Stage::OneA], declutter_mode: None, stage_two_variant: None },
            per_stage_config,
        };
        let batch = coordinator.submit_batch(user.user_id, BatchSettings::default(), vec![planned]).await.unwrap();

        let cancelled = coordinator.cancel_batch(batch.batch_id, &BTreeMap::new()).await.unwrap();
        assert_eq!(cancelled.credit_hold, 0);
        let refunded_user = users.get(user.user_id).await.unwrap();
        assert_eq!(refunded_user.credits, 5);
        let job = jobs.get(batch.job_ids[0]).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
