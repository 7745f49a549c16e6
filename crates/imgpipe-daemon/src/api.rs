// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP control-plane routes: upload, retry-single, cancel-batch, and the
//! job/batch status API (spec §4.K, §6).

use crate::AppState;
use crate::middleware::{RequestLogger, request_id_middleware};
use crate::validation::RequestValidator;
use axum::{
    Json, Router,
    extract::{Path as AxPath, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use imgpipe_core::{
    Batch, BatchSettings, FurnishedState, Job, JobStatus, SamplingKnobs, SceneType, Stage, StageConfig, StagePlan,
    User, per_job_cost,
};
use imgpipe_error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// A structured API error, rendered as `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to return.
    pub status: StatusCode,
    /// Stable machine-readable error code, when one applies.
    pub code: Option<ErrorCode>,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Construct an error with no associated [`ErrorCode`] (request-shape problems).
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, code: None, message: message.into() }
    }

    /// Construct an error carrying a pipeline [`ErrorCode`], mapping it to the
    /// HTTP status named in spec §6.
    #[must_use]
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let status = match code {
            ErrorCode::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
            ErrorCode::ImageNotFound => StatusCode::NOT_FOUND,
            ErrorCode::RetryComplianceFailed => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        };
        Self { status, code: Some(code), message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code.map(|c| c.as_str()),
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<imgpipe_runtime::RuntimeError> for ApiError {
    fn from(err: imgpipe_runtime::RuntimeError) -> Self {
        let code = err.error_code();
        Self::from_code(code, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// One image submitted as part of an upload request (spec §6 multipart fields,
/// flattened to JSON since object storage upload itself is out of scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadImage {
    /// URL or key the image store already holds the original bytes under.
    pub input_image_url: String,
    /// Interior/exterior classification.
    pub scene_type: SceneType,
    /// Room type, interior only.
    pub room_type: Option<String>,
    /// Furnished/empty, used to resolve the stage-2 variant.
    pub furnished_state: Option<FurnishedState>,
}

/// `POST /batches` request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Owning user.
    pub user_id: Uuid,
    /// Settings shared by every image in the batch.
    pub settings: BatchSettings,
    /// Images to plan and run.
    pub images: Vec<UploadImage>,
}

/// `POST /users` request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserRequest {
    /// Unique email.
    pub email: String,
    /// Starting credit balance.
    pub credits: u64,
}

/// Status envelope for a single job (spec §6 "Status envelope").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub batch_id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    pub stage_urls: BTreeMap<Stage, String>,
    pub result_url: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub strict_retry: bool,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            batch_id: job.batch_id,
            status: job.status,
            progress: job.stages_done_fraction(),
            stage_urls: job.stage_urls.clone(),
            result_url: job.result_url.clone(),
            error_code: job.error_code,
            error_message: job.error_message.clone(),
            strict_retry: job.meta.strict_retry,
        }
    }
}

/// Status envelope for a batch: the batch record plus every job's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusView {
    pub batch_id: Uuid,
    pub owner_user_id: Uuid,
    pub credit_hold: u64,
    pub terminal: bool,
    pub jobs: Vec<JobStatusView>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the Axum router with all daemon routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors: CorsLayer = crate::middleware::CorsConfig::default().to_cors_layer();

    Router::new()
        .route("/health", get(cmd_health))
        .route("/users", post(cmd_create_user))
        .route("/users/{user_id}", get(cmd_get_user))
        .route("/batches", post(cmd_upload))
        .route("/batches/{batch_id}/cancel", post(cmd_cancel_batch))
        .route("/jobs/{job_id}/retry", post(cmd_retry_job))
        .route("/status/{job_id}", get(cmd_job_status))
        .route("/status/batch/{batch_id}", get(cmd_batch_status))
        .layer(axum_middleware::from_fn(RequestLogger::layer))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn cmd_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn cmd_create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let user = User { user_id: Uuid::new_v4(), email: req.email, credits: req.credits, version: 0 };
    let created = state
        .runtime
        .users()
        .create(user)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(created))
}

async fn cmd_get_user(
    State(state): State<Arc<AppState>>,
    AxPath(user_id): AxPath<Uuid>,
) -> Result<Json<User>, ApiError> {
    state
        .runtime
        .users()
        .get(user_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "unknown user"))
}

/// Derive a [`StageConfig`] for one planned stage from the upload image and
/// shared batch settings; `sampling` always starts at tighten level 0, since
/// the stage executor recomputes it per attempt (spec §4.F).
fn stage_config_for(image: &UploadImage, settings: &BatchSettings, stage: Stage) -> StageConfig {
    StageConfig {
        scene_type: image.scene_type,
        room_type: image.room_type.clone(),
        furnished_state: image.furnished_state,
        staging_style: (stage == Stage::Two).then(|| settings.staging_style.clone()).flatten(),
        replace_sky: (image.scene_type == SceneType::Exterior).then_some(true),
        sampling: SamplingKnobs::base(),
    }
}

fn planned_image_for(image: UploadImage, settings: &BatchSettings) -> imgpipe_runtime::pipeline::PlannedImage {
    let stage_plan = StagePlan::derive(
        image.scene_type,
        settings.declutter,
        settings.declutter_mode,
        settings.allow_staging,
        image.furnished_state,
    );
    let mut per_stage_config = BTreeMap::new();
    for &stage in &stage_plan.stages {
        per_stage_config.insert(stage, stage_config_for(&image, settings, stage));
    }
    imgpipe_runtime::pipeline::PlannedImage {
        image_id: imgpipe_core::image_id_for(image.input_image_url.as_bytes()),
        input_image_url: image.input_image_url,
        stage_plan,
        per_stage_config,
    }
}

async fn cmd_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<BatchStatusView>, ApiError> {
    RequestValidator::validate_upload(&req).map_err(|errors| ApiError::new(StatusCode::BAD_REQUEST, errors.join("; ")))?;

    let planned: Vec<_> = req.images.into_iter().map(|img| planned_image_for(img, &req.settings)).collect();
    let batch = state.runtime.submit_batch(req.user_id, req.settings, planned).await?;

    for &job_id in &batch.job_ids {
        state.spawn_job(job_id).await;
    }

    Ok(Json(batch_view(&state, &batch).await))
}

async fn cmd_cancel_batch(
    State(state): State<Arc<AppState>>,
    AxPath(batch_id): AxPath<Uuid>,
) -> Result<Json<BatchStatusView>, ApiError> {
    let tokens = state.tokens.read().await.clone();
    let batch = state.runtime.cancel_batch(batch_id, &tokens).await?;
    Ok(Json(batch_view(&state, &batch).await))
}

/// `POST /jobs/:job_id/retry` — re-submit a single failed job as a fresh job
/// in the same batch, charging its credit cost again (spec §6 retry-single;
/// error codes `RETRY_COMPLIANCE_FAILED` / `image_not_found` / `QUOTA_EXCEEDED`).
async fn cmd_retry_job(
    State(state): State<Arc<AppState>>,
    AxPath(job_id): AxPath<Uuid>,
) -> Result<Json<JobStatusView>, ApiError> {
    let original = state
        .runtime
        .jobs()
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::from_code(ErrorCode::ImageNotFound, "job not found"))?;

    if original.status != JobStatus::Failed {
        return Err(ApiError::from_code(
            ErrorCode::RetryComplianceFailed,
            "only a failed job may be retried",
        ));
    }

    let batch = state
        .runtime
        .batches()
        .get(original.batch_id)
        .await
        .ok_or_else(|| ApiError::from_code(ErrorCode::ImageNotFound, "owning batch not found"))?;

    let cost = per_job_cost(&original.stage_plan);
    let mut rejected = false;
    state
        .runtime
        .users()
        .update(batch.owner_user_id, |current| {
            let mut next = current.clone();
            if current.credits < cost {
                rejected = true;
            } else {
                next.credits -= cost;
            }
            next
        })
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if rejected {
        return Err(ApiError::from_code(ErrorCode::QuotaExceeded, "insufficient credit balance for retry"));
    }

    let mut retried = imgpipe_core::JobBuilder::new(original.batch_id, original.image_id.clone(), original.input_image_url.clone())
        .stage_plan(original.stage_plan.clone())
        .build();
    retried.per_stage_config = original.per_stage_config.clone();
    let created = state
        .runtime
        .jobs()
        .create(retried)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut updated_batch = batch;
    updated_batch.job_ids.push(created.job_id);
    updated_batch.credit_hold += cost;
    state
        .runtime
        .batches()
        .put(updated_batch)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    state.spawn_job(created.job_id).await;
    Ok(Json(JobStatusView::from(&created)))
}

async fn cmd_job_status(
    State(state): State<Arc<AppState>>,
    AxPath(job_id): AxPath<Uuid>,
) -> Result<Json<JobStatusView>, ApiError> {
    let job = state
        .runtime
        .jobs()
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::from_code(ErrorCode::ImageNotFound, "job not found"))?;
    Ok(Json(JobStatusView::from(&job)))
}

async fn cmd_batch_status(
    State(state): State<Arc<AppState>>,
    AxPath(batch_id): AxPath<Uuid>,
) -> Result<Json<BatchStatusView>, ApiError> {
    let batch = state
        .runtime
        .batches()
        .get(batch_id)
        .await
        .ok_or_else(|| ApiError::from_code(ErrorCode::ImageNotFound, "batch not found"))?;
    Ok(Json(batch_view(&state, &batch).await))
}

async fn batch_view(state: &AppState, batch: &Batch) -> BatchStatusView {
    let mut jobs = Vec::with_capacity(batch.job_ids.len());
    for &job_id in &batch.job_ids {
        if let Some(job) = state.runtime.jobs().get(job_id).await {
            jobs.push(JobStatusView::from(&job));
        }
    }
    BatchStatusView {
        batch_id: batch.batch_id,
        owner_user_id: batch.owner_user_id,
        credit_hold: batch.credit_hold,
        terminal: state.runtime.batch_is_terminal(batch.batch_id).await,
        jobs,
    }
}
