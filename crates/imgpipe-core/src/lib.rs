// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Stable data model for the image enhancement pipeline core: users,
//! batches, jobs, stage configuration, validator reports, and retry state.
//! If you only take one dependency from this workspace, take this one.

/// Configuration validation and defaults for jobs and batches.
pub mod config;
/// Validation utilities for persisted [`ValidatorReport`]s.
pub mod validate;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current contract version string embedded in persisted jobs and reports.
///
/// ```
/// assert_eq!(imgpipe_core::CONTRACT_VERSION, "imgpipe/v1");
/// ```
pub const CONTRACT_VERSION: &str = "imgpipe/v1";

// ---------------------------------------------------------------------------
// Stage / plan vocabulary
// ---------------------------------------------------------------------------

/// One of the three generative stages a job may pass through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Stage {
    /// Color/exposure cleanup. Always planned.
    #[serde(rename = "1A")]
    OneA,
    /// Declutter (light or full), planned iff `declutter = true`.
    #[serde(rename = "1B")]
    OneB,
    /// Virtual staging (2A furnished refresh or 2B empty-room), planned iff
    /// `allowStaging = true` and the scene is interior.
    #[serde(rename = "2")]
    Two,
}

impl Stage {
    /// Stable wire representation, matching the status API's stage keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneA => "1A",
            Self::OneB => "1B",
            Self::Two => "2",
        }
    }

    /// The job-terminal error code produced when this stage exhausts its
    /// retry budget (spec §4.H).
    #[must_use]
    pub fn rejection_code(&self) -> imgpipe_error::ErrorCode {
        match self {
            Self::OneA => imgpipe_error::ErrorCode::StructuralStage1ARejected,
            Self::OneB => imgpipe_error::ErrorCode::StructuralStage1BRejected,
            Self::Two => imgpipe_error::ErrorCode::StructuralStage2Rejected,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declutter mode for stage 1B; determines the stage 2 variant downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeclutterMode {
    /// Keep furniture, remove clutter only. Feeds stage 2A.
    Light,
    /// Remove all furniture. Feeds stage 2B.
    Full,
}

/// Stage 2 variant, derived from what stage 1B left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum StageTwoVariant {
    /// Furnished refresh — upstream left furniture in place.
    #[serde(rename = "2A")]
    TwoA,
    /// Empty-room staging — upstream emptied the room.
    #[serde(rename = "2B")]
    TwoB,
}

/// Interior vs exterior scene classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SceneType {
    /// Interior room photograph.
    Interior,
    /// Exterior / outdoor photograph.
    Exterior,
}

/// Whether the room is shown furnished or emptied, for stage 2 prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FurnishedState {
    /// Room contains furniture.
    Furnished,
    /// Room has been emptied.
    Empty,
}

/// Sampling knobs sent to the generative model, derived from the current
/// tighten level at call time (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SamplingKnobs {
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Top-k truncation.
    pub top_k: u32,
}

impl SamplingKnobs {
    /// Base sampling knobs at tighten level 0.
    #[must_use]
    pub fn base() -> Self {
        Self {
            temperature: 0.4,
            top_p: 0.9,
            top_k: 40,
        }
    }

    /// Derive sampling knobs for a given [`TightenLevel`] (spec §4.F).
    ///
    /// L1 scales T/topP by ×0.7 and topK by ×0.8 (with floors); L2 scales by
    /// ×0.4/0.8/0.6; L3 is the fixed near-deterministic floor
    /// `(0.01, 0.5, 5)`.
    #[must_use]
    pub fn for_tighten_level(level: TightenLevel) -> Self {
        let base = Self::base();
        match level.value() {
            0 => base,
            1 => Self {
                temperature: (base.temperature * 0.7).max(0.01),
                top_p: (base.top_p * 0.7).max(0.5),
                top_k: ((base.top_k as f64 * 0.8) as u32).max(5),
            },
            2 => Self {
                temperature: (base.temperature * 0.4).max(0.01),
                top_p: (base.top_p * 0.8).max(0.5),
                top_k: ((base.top_k as f64 * 0.6) as u32).max(5),
            },
            _ => Self {
                temperature: 0.01,
                top_p: 0.5,
                top_k: 5,
            },
        }
    }
}

/// Clamped retry-tighten level, `0..=3` (spec §4.F, glossary "Tighten level").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct TightenLevel(u8);

impl TightenLevel {
    /// Construct a tighten level, clamping to the valid `0..=3` range.
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self(level.min(3) as u8)
    }

    /// The numeric level, `0..=3`.
    #[must_use]
    pub fn value(&self) -> u8 {
        self.0
    }

    /// `true` for any level `>= 1` — surfaced to the client as "strict retry".
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.0 >= 1
    }
}

impl Default for TightenLevel {
    fn default() -> Self {
        Self(0)
    }
}

/// Per-`(job, stage)` configuration (spec §3 `StageConfig`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageConfig {
    /// Interior or exterior.
    pub scene_type: SceneType,
    /// Room type (interior only).
    pub room_type: Option<String>,
    /// Furnished or empty (stage 2 only).
    pub furnished_state: Option<FurnishedState>,
    /// Staging style hint (stage 2 only).
    pub staging_style: Option<String>,
    /// Whether the sky should be replaced (exterior only).
    pub replace_sky: Option<bool>,
    /// Sampling knobs for the current tighten level.
    pub sampling: SamplingKnobs,
}

/// The ordered, derived plan of stages for one job, plus the mode/variant
/// decisions that determine downstream prompting (spec §3 "StagePlan
/// derivation rules").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct StagePlan {
    /// Ordered subset of `{1A, 1B, 2}`.
    pub stages: Vec<Stage>,
    /// Stage 1B's mode, if stage 1B is planned.
    pub declutter_mode: Option<DeclutterMode>,
    /// Stage 2's variant, if stage 2 is planned.
    pub stage_two_variant: Option<StageTwoVariant>,
}

impl StagePlan {
    /// Derive the stage plan for one job from batch-level intent and the
    /// image's scene type.
    ///
    /// - Stage 1A is always included.
    /// - Stage 1B is included iff `declutter`; requires a `declutter_mode`.
    /// - Stage 2 is included iff `allow_staging && scene_type == Interior`;
    ///   its variant is 2A when stage 1B leaves furniture (mode `Light` or
    ///   1B absent and the image is already furnished), 2B when stage 1B
    ///   empties the room (mode `Full`).
    #[must_use]
    pub fn derive(
        scene_type: SceneType,
        declutter: bool,
        declutter_mode: Option<DeclutterMode>,
        allow_staging: bool,
        furnished_state: Option<FurnishedState>,
    ) -> Self {
        let mut stages = vec![Stage::OneA];
        let mut resolved_declutter_mode = None;
        if declutter {
            let mode = declutter_mode.unwrap_or(DeclutterMode::Light);
            stages.push(Stage::OneB);
            resolved_declutter_mode = Some(mode);
        }

        let mut stage_two_variant = None;
        if allow_staging && scene_type == SceneType::Interior {
            let leaves_furniture = match resolved_declutter_mode {
                Some(DeclutterMode::Full) => false,
                Some(DeclutterMode::Light) => true,
                None => !matches!(furnished_state, Some(FurnishedState::Empty)),
            };
            stages.push(Stage::Two);
            stage_two_variant = Some(if leaves_furniture {
                StageTwoVariant::TwoA
            } else {
                StageTwoVariant::TwoB
            });
        }

        Self {
            stages,
            declutter_mode: resolved_declutter_mode,
            stage_two_variant,
        }
    }

    /// The baseline stage for `stage`, per spec §4.G step 4:
    /// 1A's baseline is the original upload; 1B's baseline is 1A's output;
    /// 2's baseline is the latest upstream committed output (1B if present,
    /// else 1A). Canonicalizes the spec's "two styles of stage-2 baseline
    /// selection" open question to "latest upstream committed".
    #[must_use]
    pub fn baseline_stage(&self, stage: Stage) -> Option<Stage> {
        match stage {
            Stage::OneA => None,
            Stage::OneB => Some(Stage::OneA),
            Stage::Two => {
                if self.stages.contains(&Stage::OneB) {
                    Some(Stage::OneB)
                } else {
                    Some(Stage::OneA)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validator report
// ---------------------------------------------------------------------------

/// Local-lane verdict strength (spec §4.C "Aggregate local verdict").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LocalVerdictKind {
    /// No blocking signal.
    Pass,
    /// Two or more non-fatal triggers; policy-configurable to block or warn.
    Risk,
    /// At least one fatal trigger; always short-circuits the model lane.
    Fatal,
}

/// A single named signal emitted by a local validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Trigger {
    /// Stable trigger identifier, e.g. `"low_global_edge_iou"`.
    pub id: String,
    /// Whether this trigger alone short-circuits the model lane.
    pub fatal: bool,
    /// The observed metric value.
    pub value: f64,
    /// The threshold the value was compared against.
    pub threshold: f64,
    /// Human-readable explanation.
    pub message: String,
}

/// Output of the local validator lane (spec §4.C).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LocalVerdict {
    /// Aggregate verdict strength.
    pub verdict: Option<LocalVerdictKind>,
    /// Every trigger raised during this pass.
    pub triggers: Vec<Trigger>,
    /// Named metrics (e.g. `"global_edge_iou"`) for diagnostics and tests.
    pub metrics: BTreeMap<String, f64>,
}

impl LocalVerdict {
    /// `true` iff any trigger is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.triggers.iter().any(|t| t.fatal)
    }

    /// `true` iff fatal, or at least two non-fatal triggers fired (the
    /// "gate minimum signals" constant, spec §4.C).
    #[must_use]
    pub fn is_risk(&self, gate_minimum_signals: usize) -> bool {
        self.is_fatal() || self.triggers.iter().filter(|t| !t.fatal).count() >= gate_minimum_signals
    }
}

/// Per-check result in the judge rubric (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckResult {
    /// The check passed.
    Pass,
    /// The check failed.
    Fail,
    /// The judge could not determine an answer; treated as advisory.
    Unclear,
}

/// Structured semantic-judge verdict (spec §4.D rubric).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SemanticVerdict {
    /// Overall pass/fail per the judge.
    pub pass: bool,
    /// Judge confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Whether only permitted changes were made.
    pub allowed_changes_only: bool,
    /// Human-readable justification.
    pub reason: String,
    /// Reasons given for failing checks.
    pub fail_reasons: Vec<String>,
    /// Per-rubric-check breakdown.
    pub checks: BTreeMap<String, CheckResult>,
    /// Set when the judge's output could not be parsed at all.
    pub parse_error: bool,
}

/// Placement-judge verdict (stage 2 only, spec §4.D).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlacementVerdict {
    /// Pass / soft-fail (warning only) / hard-fail (blocks).
    pub verdict: PlacementResult,
    /// Supporting reasons.
    pub reasons: Vec<String>,
}

/// Placement-judge outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlacementResult {
    /// Placement is acceptable.
    Pass,
    /// Placement is imperfect but warning-only; never blocks (spec §9).
    SoftFail,
    /// Placement is unacceptable; blocks the stage.
    HardFail,
}

/// Combined model-lane verdict (spec calls this field `gemini` on the wire;
/// named generically here since the judge backend is pluggable).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelVerdict {
    /// Semantic-judge result.
    pub semantic: SemanticVerdict,
    /// Placement-judge result, present only for stage 2 when semantic passed.
    pub placement: Option<PlacementVerdict>,
}

/// Terminal cause of a failed stage report (spec glossary `blockedBy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockedBy {
    /// The stage passed; nothing blocked it.
    None,
    /// The local lane fatally (or, under policy, riskily) rejected it.
    Local,
    /// The semantic judge rejected it.
    ModelSemantic,
    /// The placement judge hard-failed it.
    ModelPlacement,
    /// The judge's output could not be parsed under fail-closed policy.
    ModelParseError,
}

/// The fused pass/fail decision for a stage attempt (spec §4.E step 8).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FinalVerdict {
    /// Whether the attempt passed.
    pub pass: bool,
    /// The terminal cause when `pass = false`.
    pub blocked_by: BlockedBy,
    /// Human-readable reason.
    pub reason: String,
}

/// Immutable report produced once per stage attempt by the two-lane
/// validator orchestrator (spec §3 `ValidatorReport`, §4.E).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidatorReport {
    /// The stage under validation.
    pub stage: Stage,
    /// 1-based attempt number within this stage.
    pub attempt: u32,
    /// Path/URL to the stage baseline image.
    pub baseline_path: String,
    /// Path/URL to the candidate image produced by this attempt.
    pub candidate_path: String,
    /// Local-lane result.
    pub local: LocalVerdict,
    /// Model-lane result, absent when short-circuited by a local-fatal verdict.
    #[serde(rename = "gemini", skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelVerdict>,
    /// Fused pass/fail decision.
    #[serde(rename = "final")]
    pub final_verdict: FinalVerdict,
    /// Wall-clock latency of the full validation pass, in milliseconds.
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Retry state
// ---------------------------------------------------------------------------

/// Per-job retry bookkeeping (spec §3 `RetryState`, §4.F).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RetryState {
    /// Attempt counter per stage.
    pub attempts: BTreeMap<Stage, u32>,
    /// The stage of the most recent failed attempt, if any.
    pub last_failed_stage: Option<Stage>,
    /// Set once a stage has exhausted `maxAttemptsPerStage`.
    pub failed_final: bool,
    /// Accumulated human-readable failure reasons across attempts.
    pub failure_reasons: Vec<String>,
}

impl RetryState {
    /// Current attempt count for `stage` (0 if none yet attempted).
    #[must_use]
    pub fn attempt_count(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }
}

/// A single retry-controller decision (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the stage at the given tighten level.
    Retry(TightenLevel),
    /// Give up; the stage (and job) fails.
    NoRetry,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Job lifecycle status (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up by an executor.
    Queued,
    /// Currently advancing through its stage plan.
    Processing,
    /// All planned stages passed.
    Completed,
    /// A stage exhausted its retries, or another terminal error occurred.
    Failed,
    /// Cancelled by the user before reaching a terminal outcome.
    Cancelled,
}

impl JobStatus {
    /// `true` for the three terminal statuses.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Diagnostic and UI-facing metadata carried alongside a [`Job`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct JobMeta {
    /// Scene classifier's predicted type, if run.
    pub scene_prediction: Option<String>,
    /// Detected room type, if any.
    pub room_type_detected: Option<String>,
    /// Whether the submitter manually overrode the scene classification.
    pub manual_scene_override: bool,
    /// `true` if any stage attempt used tighten level `>= 1`.
    pub strict_retry: bool,
    /// Human-readable reasons surfaced when `strict_retry` is set.
    pub strict_retry_reasons: Vec<String>,
    /// Per-stage wall-clock timings in milliseconds, keyed by stage string.
    pub timings: BTreeMap<String, u64>,
    /// Immutable, append-only log of every validator report produced for
    /// this job, across all stages and attempts.
    pub attempts: Vec<ValidatorReport>,
    /// JSON-encoded post-mortem from the failure analysis hook, set once a
    /// job reaches `failed` (spec §4.L). Kept as an opaque string here so
    /// this crate doesn't need to know the analyzer's output shape.
    pub failure_analysis: Option<String>,
}

/// One image's full pipeline run (spec §3 `Job`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: Uuid,
    /// Owning batch.
    pub batch_id: Uuid,
    /// Stable content-addressable key for the original image.
    pub image_id: String,
    /// URL of the original uploaded image.
    pub input_image_url: String,
    /// Derived ordered stage plan.
    pub stage_plan: StagePlan,
    /// Configuration for each planned stage.
    pub per_stage_config: BTreeMap<Stage, StageConfig>,
    /// Committed stage output URLs; a key is present iff that stage passed.
    pub stage_urls: BTreeMap<Stage, String>,
    /// The stage whose URL is the final displayed result.
    pub result_stage: Option<Stage>,
    /// The final result URL, equal to `stage_urls[result_stage]`.
    pub result_url: Option<String>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Terminal error code, set iff `status == Failed`.
    pub error_code: Option<imgpipe_error::ErrorCode>,
    /// Human-readable terminal error message.
    pub error_message: Option<String>,
    /// Retry bookkeeping.
    pub retry_state: RetryState,
    /// Diagnostic metadata and attempt history.
    pub meta: JobMeta,
    /// Contract version this job was created under.
    pub contract_version: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp (bumped on every CAS-guarded write).
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version counter (spec §4.J).
    pub version: u64,
}

impl Job {
    /// Fraction of the stage plan completed, ignoring intra-stage progress
    /// (spec §4.H "Progress reporting").
    #[must_use]
    pub fn stages_done_fraction(&self) -> f64 {
        let planned = self.stage_plan.stages.len().max(1) as f64;
        let done = self.stage_urls.len() as f64;
        done / planned
    }

    /// `true` iff every prior stage in the plan already has a committed URL
    /// (spec P1, stage monotonicity, checked before committing `stage`).
    #[must_use]
    pub fn prior_stages_committed(&self, stage: Stage) -> bool {
        self.stage_plan
            .stages
            .iter()
            .take_while(|&&s| s != stage)
            .all(|s| self.stage_urls.contains_key(s))
    }
}

/// Per-job cost in credits: 2 if stage 2 is planned, else 1 (spec §4.I).
#[must_use]
pub fn per_job_cost(plan: &StagePlan) -> u64 {
    if plan.stages.contains(&Stage::Two) { 2 } else { 1 }
}

// ---------------------------------------------------------------------------
// Batch / User
// ---------------------------------------------------------------------------

/// Raw settings submitted with an upload request (spec §6), carried
/// verbatim so retries and post-mortems can see exactly what was asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BatchSettings {
    /// Free-form goal description.
    pub goal: Option<String>,
    /// Free-form industry tag.
    pub industry: Option<String>,
    /// Whether to bias prompts toward preserving structure.
    pub preserve_structure: bool,
    /// Whether stage 2 (virtual staging) may run at all.
    pub allow_staging: bool,
    /// Free-form staging style hint.
    pub staging_style: Option<String>,
    /// Whether furniture replacement (vs. addition) is requested.
    pub furniture_replacement: Option<bool>,
    /// Whether stage 1B (declutter) should run.
    pub declutter: bool,
    /// Client-facing declutter mode hint.
    pub declutter_mode: Option<DeclutterMode>,
    /// Outdoor staging policy.
    pub outdoor_staging: OutdoorStaging,
}

/// Outdoor (exterior) staging policy (spec §6 `outdoorStaging`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutdoorStaging {
    /// Decide automatically from scene classification.
    #[default]
    Auto,
    /// Never stage exterior images.
    None,
}

/// A user's stable identity and credit balance (spec §3 `User`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct User {
    /// Stable user identifier.
    pub user_id: Uuid,
    /// Lowercased, unique email.
    pub email: String,
    /// Non-negative credit balance, mutated only via atomic increment/decrement.
    pub credits: u64,
    /// Optimistic-concurrency version counter.
    pub version: u64,
}

/// A unit of user intent: a set of jobs sharing settings (spec §3 `Batch`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Batch {
    /// Unique batch identifier.
    pub batch_id: Uuid,
    /// Owning user.
    pub owner_user_id: Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Settings shared by every job in the batch.
    pub settings: BatchSettings,
    /// Ordered, index-addressable job identifiers.
    pub job_ids: Vec<Uuid>,
    /// Total credits held for this batch; equals `sum(perJobCost)`.
    pub credit_hold: u64,
}

impl Batch {
    /// `len(job_ids) >= 1` invariant check.
    #[must_use]
    pub fn has_jobs(&self) -> bool {
        !self.job_ids.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Canonicalization / hashing
// ---------------------------------------------------------------------------

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// Not a full JCS implementation, but stable for our types: keys are sorted
/// (`serde_json::Map` is BTreeMap-backed) and numbers serialize consistently.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ContractError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content-address an input image from its raw bytes, for use as `imageId`.
#[must_use]
pub fn image_id_for(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

/// Builder for constructing [`Job`]s ergonomically (e.g. in the batch
/// coordinator and in tests).
#[derive(Debug)]
pub struct JobBuilder {
    batch_id: Uuid,
    image_id: String,
    input_image_url: String,
    stage_plan: StagePlan,
    per_stage_config: BTreeMap<Stage, StageConfig>,
}

impl JobBuilder {
    /// Start building a job for the given batch and content-addressed image.
    #[must_use]
    pub fn new(batch_id: Uuid, image_id: impl Into<String>, input_image_url: impl Into<String>) -> Self {
        Self {
            batch_id,
            image_id: image_id.into(),
            input_image_url: input_image_url.into(),
            stage_plan: StagePlan::default(),
            per_stage_config: BTreeMap::new(),
        }
    }

    /// Set the derived stage plan.
    #[must_use]
    pub fn stage_plan(mut self, plan: StagePlan) -> Self {
        self.stage_plan = plan;
        self
    }

    /// Attach per-stage configuration.
    #[must_use]
    pub fn stage_config(mut self, stage: Stage, config: StageConfig) -> Self {
        self.per_stage_config.insert(stage, config);
        self
    }

    /// Consume the builder and produce a queued [`Job`].
    #[must_use]
    pub fn build(self) -> Job {
        let now = Utc::now();
        Job {
            job_id: Uuid::new_v4(),
            batch_id: self.batch_id,
            image_id: self.image_id,
            input_image_url: self.input_image_url,
            stage_plan: self.stage_plan,
            per_stage_config: self.per_stage_config,
            stage_urls: BTreeMap::new(),
            result_stage: None,
            result_url: None,
            status: JobStatus::Queued,
            error_code: None,
            error_message: None,
            retry_state: RetryState::default(),
            meta: JobMeta::default(),
            contract_version: CONTRACT_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_plan_interior_full_pipeline() {
        let plan = StagePlan::derive(
            SceneType::Interior,
            true,
            Some(DeclutterMode::Full),
            true,
            None,
        );
        assert_eq!(plan.stages, vec![Stage::OneA, Stage::OneB, Stage::Two]);
        assert_eq!(plan.stage_two_variant, Some(StageTwoVariant::TwoB));
    }

    #[test]
    fn stage_plan_exterior_suppresses_stage_two() {
        let plan = StagePlan::derive(SceneType::Exterior, false, None, true, None);
        assert_eq!(plan.stages, vec![Stage::OneA]);
        assert!(plan.stage_two_variant.is_none());
    }

    #[test]
    fn baseline_stage_latest_upstream() {
        let with_1b = StagePlan::derive(SceneType::Interior, true, Some(DeclutterMode::Light), true, None);
        assert_eq!(with_1b.baseline_stage(Stage::Two), Some(Stage::OneB));

        let without_1b = StagePlan::derive(SceneType::Interior, false, None, true, None);
        assert_eq!(without_1b.baseline_stage(Stage::Two), Some(Stage::OneA));
    }

    #[test]
    fn per_job_cost_reflects_stage_two() {
        let with_stage2 = StagePlan::derive(SceneType::Interior, false, None, true, None);
        assert_eq!(per_job_cost(&with_stage2), 2);

        let without_stage2 = StagePlan::derive(SceneType::Exterior, false, None, true, None);
        assert_eq!(per_job_cost(&without_stage2), 1);
    }

    #[test]
    fn sampling_knobs_scale_down_with_tighten_level() {
        let l0 = SamplingKnobs::for_tighten_level(TightenLevel::new(0));
        let l3 = SamplingKnobs::for_tighten_level(TightenLevel::new(3));
        assert!(l3.temperature < l0.temperature);
        assert_eq!(l3.temperature, 0.01);
        assert_eq!(l3.top_k, 5);
    }

    #[test]
    fn tighten_level_clamps_and_reports_strict() {
        assert_eq!(TightenLevel::new(9).value(), 3);
        assert!(!TightenLevel::new(0).is_strict());
        assert!(TightenLevel::new(1).is_strict());
    }

    #[test]
    fn local_verdict_risk_and_fatal() {
        let mut v = LocalVerdict::default();
        v.triggers.push(Trigger {
            id: "low_global_edge_iou".into(),
            fatal: false,
            value: 0.5,
            threshold: 0.65,
            message: "below threshold".into(),
        });
        assert!(!v.is_fatal());
        assert!(!v.is_risk(2));
        v.triggers.push(Trigger {
            id: "brightness_out_of_range".into(),
            fatal: false,
            value: 0.9,
            threshold: 0.5,
            message: "too bright".into(),
        });
        assert!(v.is_risk(2));
    }

    #[test]
    fn job_builder_starts_queued_with_no_committed_stages() {
        let job = JobBuilder::new(Uuid::new_v4(), "img-1", "https://example/in.png")
            .stage_plan(StagePlan::derive(SceneType::Interior, false, None, false, None))
            .build();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.stage_urls.is_empty());
        assert!(job.prior_stages_committed(Stage::OneA));
    }

    #[test]
    fn blocked_by_serializes_snake_case() {
        let v = BlockedBy::ModelSemantic;
        assert_eq!(serde_json::to_string(&v).unwrap(), r#""model_semantic""#);
    }

    #[test]
    fn stage_serializes_to_wire_keys() {
        assert_eq!(serde_json::to_string(&Stage::OneA).unwrap(), r#""1A""#);
        assert_eq!(serde_json::to_string(&Stage::Two).unwrap(), r#""2""#);
    }

    #[test]
    fn canonical_json_is_deterministic() {
        let a = canonical_json(&serde_json::json!({"b": 1, "a": 2})).unwrap();
        let b = canonical_json(&serde_json::json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
    }
}
