// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-stage attempt loop (spec §4.E/§4.F/§4.G).
//!
//! [`StageExecutor`] drives one stage of one job to a terminal outcome:
//! generate a candidate, run the local validator lane, call the model
//! judge(s) unless the local lane was fatal, fuse the two verdicts, and
//! either commit the candidate or retry at a tightened level. The loop
//! itself has no opinion on persistence — callers own writing the
//! resulting [`ValidatorReport`]s back to a [`Job`](imgpipe_core::Job).

use crate::cancel::CancellationToken;
use crate::timeouts::{WallClock, with_timeout};
use imgpipe_config::PipelineConfig;
use imgpipe_core::{RetryDecision, RetryState, Stage, StageConfig, StageTwoVariant, ValidatorReport};
use imgpipe_error::{ErrorCode, PipelineError};
use imgpipe_judge::{JudgeClient, PlacementJudgeRequest, SemanticJudgeRequest};
use imgpipe_model::{GenerateRequest, ModelClient};
use imgpipe_store::StructuralMaskCache;
use imgpipe_telemetry::{MetricsCollector, RunMetrics};
use imgpipe_validate::run_local_validators;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a [`StageExecutor`] needs to run one stage's attempt loop.
pub struct StageExecutor {
    model: Arc<dyn ModelClient>,
    judge: Arc<dyn JudgeClient>,
    config: PipelineConfig,
    metrics: Arc<MetricsCollector>,
    mask_cache: Arc<StructuralMaskCache>,
}

/// What a completed stage-attempt loop produced.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Every attempt made, in order; the last entry's verdict decided the outcome.
    pub reports: Vec<ValidatorReport>,
    /// The committed candidate image, present iff the stage ultimately passed.
    pub committed_image: Option<Vec<u8>>,
    /// Updated retry bookkeeping after this stage.
    pub retry_state: RetryState,
}

impl StageExecutor {
    /// Construct an executor over the given model and judge backends.
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelClient>,
        judge: Arc<dyn JudgeClient>,
        config: PipelineConfig,
        mask_cache: Arc<StructuralMaskCache>,
    ) -> Self {
        Self { model, judge, config, metrics: Arc::new(MetricsCollector::new()), mask_cache }
    }

    /// This executor's run-metrics collector, shared across every stage
    /// attempt it drives. Exposed so callers (the daemon, the CLI) can read
    /// back a summary without threading metrics through every call site.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Run `stage` to completion (pass, or retries exhausted), honoring the
    /// per-stage wall clock and cooperative cancellation.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the stage wall clock or cancellation
    /// token trips, or if a model/validator call fails for a reason other
    /// than producing a verdict (decode failure, transport error).
    pub async fn run_stage(
        &self,
        stage: Stage,
        variant: Option<StageTwoVariant>,
        stage_config: &StageConfig,
        baseline_image: Vec<u8>,
        mut retry_state: RetryState,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, PipelineError> {
        let clock = WallClock::start(Duration::from_secs(self.config.stage_wall_clock_secs));
        let mut reports = Vec::new();
        let mut committed_image = None;
        let mut failure_reasons: Vec<String> = Vec::new();

        loop {
            clock.check(&format!("stage {}", stage.as_str()))?;
            if cancel.is_cancelled() {
                return Err(PipelineError::new(ErrorCode::Cancelled, "job cancelled mid-stage"));
            }

            let attempt = retry_state.attempt_count(stage) + 1;
            let tighten_level = imgpipe_core::TightenLevel::new(attempt.saturating_sub(1));
            let sampling = imgpipe_core::SamplingKnobs::for_tighten_level(tighten_level);

            let prompt = imgpipe_prompt::build_prompt(stage, variant, stage_config, tighten_level, &failure_reasons);

            let start = std::time::Instant::now();
            let generate_timeout = Duration::from_secs(self.config.model_call_timeout_secs);
            let response = with_timeout(
                generate_timeout,
                "model generate call",
                self.model.generate(GenerateRequest {
                    stage,
                    baseline_image: baseline_image.clone(),
                    prompt,
                    sampling,
                    timeout: generate_timeout,
                }),
            )
            .await?
            .map_err(|e| PipelineError::new(ErrorCode::Timeout, e.to_string()))?;

            let validator_timeout = Duration::from_secs(self.config.validator_call_timeout_secs);
            let candidate_bytes = response.image_bytes.clone();
            let baseline_for_local = baseline_image.clone();
            let local = with_timeout(
                validator_timeout,
                "local validator call",
                run_local_validators(
                    &baseline_for_local,
                    &candidate_bytes,
                    stage,
                    stage_config.scene_type,
                    &self.config,
                    &self.mask_cache,
                ),
            )
            .await?;

            let model_verdict = if imgpipe_orchestrator::should_call_semantic_judge(&self.config, &local, stage) {
                Some(self.call_judges(stage, &baseline_image, &response.image_bytes, variant).await?)
            } else {
                None
            };

            let final_verdict = imgpipe_orchestrator::fuse_verdict(&self.config, stage, &local, model_verdict.as_ref());

            let report = ValidatorReport {
                stage,
                attempt,
                baseline_path: String::new(),
                candidate_path: String::new(),
                local,
                model: model_verdict,
                final_verdict: final_verdict.clone(),
                latency_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            };
            info!(
                target: "imgpipe.stage",
                stage = stage.as_str(),
                attempt,
                pass = report.final_verdict.pass,
                "stage attempt complete"
            );
            self.metrics.record(RunMetrics {
                backend_name: self.model.name().to_string(),
                stage: stage.as_str().to_string(),
                duration_ms: report.latency_ms,
                events_count: report.local.triggers.len() as u64,
                tokens_in: response.tokens_in,
                tokens_out: response.tokens_out,
                tool_calls_count: 1,
                errors_count: u64::from(!report.final_verdict.pass),
                emulations_applied: u64::from(tighten_level.value()),
            });
            reports.push(report);

            let decision = imgpipe_orchestrator::decide_retry(&self.config, &mut retry_state, stage, &final_verdict);
            if final_verdict.pass {
                committed_image = Some(response.image_bytes);
                break;
            }

            match decision {
                RetryDecision::Retry(_) => {
                    failure_reasons.push(final_verdict.reason.clone());
                    continue;
                }
                RetryDecision::NoRetry => {
                    warn!(target: "imgpipe.stage", stage = stage.as_str(), "stage exhausted retries");
                    break;
                }
            }
        }

        Ok(StageOutcome {
            reports,
            committed_image,
            retry_state,
        })
    }

    async fn call_judges(
        &self,
        stage: Stage,
        baseline_image: &[u8],
        candidate_image: &[u8],
        _variant: Option<StageTwoVariant>,
    ) -> Result<imgpipe_core::ModelVerdict, PipelineError> {
        let timeout = Duration::from_secs(self.config.model_call_timeout_secs);
        let raw_semantic = with_timeout(
            timeout,
            "semantic judge call",
            self.judge.judge_semantic(SemanticJudgeRequest {
                baseline_image: baseline_image.to_vec(),
                candidate_image: candidate_image.to_vec(),
                allowed_changes: format!("stage {} permitted edits", stage.as_str()),
                timeout,
            }),
        )
        .await?
        .map_err(|e| PipelineError::new(ErrorCode::GeminiSemantic, e.to_string()))?;
        let semantic = imgpipe_judge::parse_semantic_response(&raw_semantic);

        let placement = if stage == Stage::Two && semantic.pass {
            let raw_placement = with_timeout(
                timeout,
                "placement judge call",
                self.judge.judge_placement(PlacementJudgeRequest {
                    candidate_image: candidate_image.to_vec(),
                    timeout,
                }),
            )
            .await?
            .map_err(|e| PipelineError::new(ErrorCode::GeminiPlacement, e.to_string()))?;
            Some(imgpipe_judge::parse_placement_response(&raw_placement))
        } else {
            None
        };

        Ok(imgpipe_core::ModelVerdict { semantic, placement })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use imgpipe_core::{FurnishedState, SceneType};
    use imgpipe_model_mock::MockModelClient;

    struct AlwaysPassJudge;

    #[async_trait]
    impl JudgeClient for AlwaysPassJudge {
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

    struct AlwaysFailJudge;

    #[async_trait]
    impl JudgeClient for AlwaysFailJudge {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn judge_semantic(&self, _request: SemanticJudgeRequest) -> Result<String> {
            Ok(r#"{"pass": false, "confidence": 0.1, "failReasons": ["bad exposure"]}"#.to_string())
        }
        async fn judge_placement(&self, _request: PlacementJudgeRequest) -> Result<String> {
            Ok(r#"{"verdict": "hard_fail", "reasons": ["blocks doorway"]}"#.to_string())
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

    #[tokio::test]
    async fn stage_passes_on_first_attempt() {
        let executor = StageExecutor::new(
            Arc::new(MockModelClient::new()),
            Arc::new(AlwaysPassJudge),
            PipelineConfig::default(),
            Arc::new(StructuralMaskCache::new()),
        );
        let outcome = executor
            .run_stage(
                Stage::OneA,
                None,
                &stage_config(),
                vec![1, 2, 3, 4],
                RetryState::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.reports.len(), 1);
        assert!(outcome.reports[0].final_verdict.pass);
        assert!(outcome.committed_image.is_some());
    }

    #[tokio::test]
    async fn stage_exhausts_retries_on_persistent_failure() {
        let executor = StageExecutor::new(
            Arc::new(MockModelClient::new()),
            Arc::new(AlwaysFailJudge),
            PipelineConfig::default(),
            Arc::new(StructuralMaskCache::new()),
        );
        let outcome = executor
            .run_stage(
                Stage::OneA,
                None,
                &stage_config(),
                vec![1, 2, 3, 4],
                RetryState::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome.committed_image.is_none());
        assert!(outcome.retry_state.failed_final);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_the_first_attempt() {
        let executor = StageExecutor::new(
            Arc::new(MockModelClient::new()),
            Arc::new(AlwaysPassJudge),
            PipelineConfig::default(),
            Arc::new(StructuralMaskCache::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor
            .run_stage(Stage::OneA, None, &stage_config(), vec![1, 2, 3, 4], RetryState::default(), &cancel)
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Cancelled);
    }
}
