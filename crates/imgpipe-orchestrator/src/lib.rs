// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-orchestrator
#![deny(unsafe_code)]
#![warn(missing_docs)]

use imgpipe_config::{PipelineConfig, ValidatorMode};
use imgpipe_core::{
    BlockedBy, FinalVerdict, LocalVerdict, LocalVerdictKind, ModelVerdict, PlacementResult, RetryDecision,
    RetryState, Stage, TightenLevel,
};

/// Whether the semantic judge should be called at all for this attempt
/// (spec §4.E steps 2-3), decided before any model call is made.
///
/// Returns `false` when the local lane was fatal (cost-control
/// short-circuit, step 2) or when the local validator family is in
/// `block` mode, the local lane flagged risk, and the stage isn't 2 (step
/// 3 — stage 2 always calls the judge since placement judging needs the
/// semantic pass as a gate). In `log` mode the local lane never skips the
/// judge call; it only ever annotates.
#[must_use]
pub fn should_call_semantic_judge(config: &PipelineConfig, local: &LocalVerdict, stage: Stage) -> bool {
    if config.semantic_validator_mode == ValidatorMode::Off {
        return false;
    }
    if config.local_validator_mode == ValidatorMode::Off {
        return true;
    }
    if local.is_fatal() {
        return false;
    }
    if config.local_validator_mode == ValidatorMode::Block
        && local.is_risk(config.gate_minimum_signals)
        && stage != Stage::Two
    {
        return false;
    }
    true
}

/// Fuse the local-lane and (optional) model-lane verdicts into one
/// [`FinalVerdict`] (spec §4.E).
///
/// `model` is `None` when [`should_call_semantic_judge`] told the caller
/// to skip the model call entirely — the caller never has to build a
/// [`ModelVerdict`] it didn't need. `stage` is needed because steps 3, 5
/// and 7 of the fusion algorithm are stage-dependent.
#[must_use]
pub fn fuse_verdict(config: &PipelineConfig, stage: Stage, local: &LocalVerdict, model: Option<&ModelVerdict>) -> FinalVerdict {
    if config.local_validator_mode == ValidatorMode::Block && local.is_fatal() {
        return FinalVerdict {
            pass: false,
            blocked_by: BlockedBy::Local,
            reason: fatal_trigger_summary(local),
        };
    }

    let Some(model) = model else {
        // The judge call was skipped (step 3, or local/semantic mode off).
        return FinalVerdict {
            pass: true,
            blocked_by: BlockedBy::None,
            reason: "local lane passed with no model call".to_string(),
        };
    };

    if config.semantic_validator_mode == ValidatorMode::Off {
        return FinalVerdict {
            pass: true,
            blocked_by: BlockedBy::None,
            reason: "semantic validator disabled".to_string(),
        };
    }

    if model.semantic.parse_error {
        let blocks = config.semantic_validator_mode == ValidatorMode::Block
            && config.fail_closed_on_parse_error
            && matches!(stage, Stage::OneB | Stage::Two);
        if blocks {
            return FinalVerdict {
                pass: false,
                blocked_by: BlockedBy::ModelParseError,
                reason: model.semantic.reason.clone(),
            };
        }
        return FinalVerdict {
            pass: true,
            blocked_by: BlockedBy::None,
            reason: "judge response failed to parse; fail-open policy in effect".to_string(),
        };
    } else if !model.semantic.pass {
        let blocks = config.semantic_validator_mode == ValidatorMode::Block
            && (model.semantic.confidence >= config.high_confidence_threshold || config.fail_closed_on_semantic_failure);
        if blocks {
            return FinalVerdict {
                pass: false,
                blocked_by: BlockedBy::ModelSemantic,
                reason: if model.semantic.fail_reasons.is_empty() {
                    model.semantic.reason.clone()
                } else {
                    model.semantic.fail_reasons.join("; ")
                },
            };
        }
    }

    if stage == Stage::Two && model.semantic.pass {
        if let Some(placement) = &model.placement {
            if config.placement_validator_mode == ValidatorMode::Block && placement.verdict == PlacementResult::HardFail {
                return FinalVerdict {
                    pass: false,
                    blocked_by: BlockedBy::ModelPlacement,
                    reason: placement.reasons.join("; "),
                };
            }
            // Soft-fail never blocks; it's a warning the caller can surface
            // but the job proceeds (spec §9 open question resolution).
        }
    }

    FinalVerdict {
        pass: true,
        blocked_by: BlockedBy::None,
        reason: "local and model lanes both passed".to_string(),
    }
}

fn fatal_trigger_summary(local: &LocalVerdict) -> String {
    local
        .triggers
        .iter()
        .filter(|t| t.fatal)
        .map(|t| t.message.clone())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Decide whether a failed attempt earns another try, and at what tighten
/// level (spec §4.F).
///
/// Mutates `retry_state` in place: bumps the stage's attempt counter,
/// records `last_failed_stage`, appends to `failure_reasons`, and sets
/// `failed_final` once the stage's budget is exhausted.
pub fn decide_retry(
    config: &PipelineConfig,
    retry_state: &mut RetryState,
    stage: Stage,
    verdict: &FinalVerdict,
) -> RetryDecision {
    if verdict.pass {
        return RetryDecision::NoRetry;
    }

    let attempts = retry_state.attempts.entry(stage).or_insert(0);
    *attempts += 1;
    retry_state.last_failed_stage = Some(stage);
    retry_state.failure_reasons.push(verdict.reason.clone());

    if *attempts >= config.max_attempts_per_stage {
        retry_state.failed_final = true;
        return RetryDecision::NoRetry;
    }

    // Attempt 1 failing produces a retry at tighten level 1, attempt 2 at
    // level 2, and so on, capped at 3.
    RetryDecision::Retry(TightenLevel::new(*attempts))
}
