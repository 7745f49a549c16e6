// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-analysis
#![deny(unsafe_code)]
#![warn(missing_docs)]

use imgpipe_core::{BlockedBy, Job, JobStatus, Stage};
use imgpipe_error::FailureClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The single signal judged most responsible for a job's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DominantCause {
    /// The local validator lane (edge IoU, histogram, gradient) blocked it.
    LocalStructural,
    /// The semantic judge rejected the candidate.
    ModelSemantic,
    /// The placement judge hard-failed the candidate.
    ModelPlacement,
    /// The judge's response could not be parsed under fail-closed policy.
    ModelParseError,
    /// A stage burned every attempt without ever being admitted.
    RetriesExhausted,
    /// The job was explicitly cancelled.
    Cancelled,
    /// A bounded operation timed out.
    Timeout,
    /// No attempts were recorded, or the failure shape didn't match a
    /// known pattern; the job's `error_code`/`error_message` are the best
    /// remaining source of truth.
    Unknown,
}

/// Per-stage rollup of attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailureSummary {
    /// Number of attempts recorded for this stage.
    pub attempts: u32,
    /// What blocked the last attempt, if any attempts were recorded.
    pub last_blocked_by: Option<BlockedBy>,
    /// Failure reasons carried across attempts, most recent last.
    pub reasons: Vec<String>,
}

/// A best-effort, read-only summary of why a job failed (spec §4.L).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAnalysis {
    /// The job this analysis describes.
    pub job_id: uuid::Uuid,
    /// The job's terminal status at analysis time.
    pub status: JobStatus,
    /// Best single-sentence explanation of what went wrong.
    pub dominant_cause: DominantCause,
    /// Propagation taxonomy of the job's terminal `error_code`, if set.
    pub failure_class: Option<FailureClass>,
    /// Per-stage attempt rollup, in stage order.
    pub per_stage: BTreeMap<Stage, StageFailureSummary>,
    /// Short human-readable narrative suitable for a support ticket.
    pub narrative: String,
}

/// Analyze a finished job, returning `None` if it isn't in a state this
/// analysis applies to (anything other than `failed` or `cancelled`).
///
/// Never panics and never touches the store: the caller is responsible for
/// loading the job and deciding what to do with the result (log it, attach
/// it to a support ticket, etc). A `completed` job is not analyzed — there
/// is nothing to post-mortem.
#[must_use]
pub fn analyze_job(job: &Job) -> Option<FailureAnalysis> {
    if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
        return None;
    }

    let mut per_stage: BTreeMap<Stage, StageFailureSummary> = BTreeMap::new();
    for report in &job.meta.attempts {
        let entry = per_stage.entry(report.stage).or_insert_with(|| StageFailureSummary {
            attempts: 0,
            last_blocked_by: None,
            reasons: Vec::new(),
        });
        entry.attempts += 1;
        entry.last_blocked_by = Some(report.final_verdict.blocked_by);
        if !report.final_verdict.pass {
            entry.reasons.push(report.final_verdict.reason.clone());
        }
    }

    let failure_class = job.error_code.map(|code| code.failure_class());
    let dominant_cause = infer_dominant_cause(job, &per_stage, failure_class);
    let narrative = build_narrative(job, dominant_cause, &per_stage);

    Some(FailureAnalysis {
        job_id: job.job_id,
        status: job.status,
        dominant_cause,
        failure_class,
        per_stage,
        narrative,
    })
}

fn infer_dominant_cause(
    job: &Job,
    per_stage: &BTreeMap<Stage, StageFailureSummary>,
    failure_class: Option<FailureClass>,
) -> DominantCause {
    if job.status == JobStatus::Cancelled {
        return DominantCause::Cancelled;
    }

    if let Some(code) = job.error_code {
        use imgpipe_error::ErrorCode;
        match code {
            ErrorCode::Timeout => return DominantCause::Timeout,
            ErrorCode::GeminiSemantic => return DominantCause::ModelSemantic,
            ErrorCode::GeminiPlacement => return DominantCause::ModelPlacement,
            ErrorCode::GeminiParseError => return DominantCause::ModelParseError,
            ErrorCode::StructuralStage1ARejected
            | ErrorCode::StructuralStage1BRejected
            | ErrorCode::StructuralStage2Rejected => return DominantCause::RetriesExhausted,
            _ => {}
        }
    }

    if let Some(last) = per_stage.values().max_by_key(|s| s.attempts) {
        match last.last_blocked_by {
            Some(BlockedBy::Local) => return DominantCause::LocalStructural,
            Some(BlockedBy::ModelSemantic) => return DominantCause::ModelSemantic,
            Some(BlockedBy::ModelPlacement) => return DominantCause::ModelPlacement,
            Some(BlockedBy::ModelParseError) => return DominantCause::ModelParseError,
            _ => {}
        }
    }

    let _ = failure_class;
    DominantCause::Unknown
}

fn build_narrative(job: &Job, cause: DominantCause, per_stage: &BTreeMap<Stage, StageFailureSummary>) -> String {
    let stage_detail = per_stage
        .iter()
        .map(|(stage, summary)| format!("{}:{} attempt(s)", stage.as_str(), summary.attempts))
        .collect::<Vec<_>>()
        .join(", ");

    let cause_text = match cause {
        DominantCause::LocalStructural => "the local validator lane rejected the candidate on structural grounds",
        DominantCause::ModelSemantic => "the semantic judge rejected the candidate",
        DominantCause::ModelPlacement => "the placement judge hard-failed the candidate",
        DominantCause::ModelParseError => "the judge's response failed to parse under fail-closed policy",
        DominantCause::RetriesExhausted => "a stage exhausted its retry budget",
        DominantCause::Cancelled => "the job was cancelled before completion",
        DominantCause::Timeout => "a bounded operation timed out",
        DominantCause::Unknown => "the failure shape did not match a known pattern",
    };

    if stage_detail.is_empty() {
        format!("job {} failed: {cause_text}", job.job_id)
    } else {
        format!("job {} failed: {cause_text} ({stage_detail})", job.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgpipe_core::{FinalVerdict, JobBuilder, LocalVerdict, StagePlan, ValidatorReport};
    use imgpipe_error::ErrorCode;

    fn plan(stage: Stage) -> StagePlan {
        StagePlan {
            stages: vec![stage],
            declutter_mode: None,
            stage_two_variant: None,
        }
    }

    fn report(stage: Stage, attempt: u32, pass: bool, blocked_by: BlockedBy, reason: &str) -> ValidatorReport {
        ValidatorReport {
            stage,
            attempt,
            baseline_path: "baseline.png".into(),
            candidate_path: "candidate.png".into(),
            local: LocalVerdict::default(),
            model: None,
            final_verdict: FinalVerdict {
                pass,
                blocked_by,
                reason: reason.to_string(),
            },
            latency_ms: 10,
        }
    }

    #[test]
    fn completed_job_is_not_analyzed() {
        let mut job = JobBuilder::new(uuid::Uuid::new_v4(), "img".to_string(), "https://x/y.jpg".to_string())
            .stage_plan(plan(Stage::OneA))
            .build();
        job.status = JobStatus::Completed;
        assert!(analyze_job(&job).is_none());
    }

    #[test]
    fn cancelled_job_reports_cancelled_cause() {
        let mut job = JobBuilder::new(uuid::Uuid::new_v4(), "img".to_string(), "https://x/y.jpg".to_string())
            .stage_plan(plan(Stage::OneA))
            .build();
        job.status = JobStatus::Cancelled;
        let analysis = analyze_job(&job).unwrap();
        assert_eq!(analysis.dominant_cause, DominantCause::Cancelled);
    }

    #[test]
    fn exhausted_retries_infer_from_error_code() {
        let mut job = JobBuilder::new(uuid::Uuid::new_v4(), "img".to_string(), "https://x/y.jpg".to_string())
            .stage_plan(plan(Stage::OneA))
            .build();
        job.status = JobStatus::Failed;
        job.error_code = Some(ErrorCode::StructuralStage1ARejected);
        job.meta.attempts = vec![
            report(Stage::OneA, 1, false, BlockedBy::Local, "edges diverged"),
            report(Stage::OneA, 2, false, BlockedBy::Local, "edges diverged"),
            report(Stage::OneA, 3, false, BlockedBy::Local, "edges diverged"),
        ];
        let analysis = analyze_job(&job).unwrap();
        assert_eq!(analysis.dominant_cause, DominantCause::RetriesExhausted);
        assert_eq!(analysis.per_stage.get(&Stage::OneA).unwrap().attempts, 3);
        assert_eq!(analysis.failure_class, Some(FailureClass::Terminal));
    }

    #[test]
    fn falls_back_to_last_blocked_by_without_error_code() {
        let mut job = JobBuilder::new(uuid::Uuid::new_v4(), "img".to_string(), "https://x/y.jpg".to_string())
            .stage_plan(plan(Stage::Two))
            .build();
        job.status = JobStatus::Failed;
        job.meta.attempts = vec![report(Stage::Two, 1, false, BlockedBy::ModelPlacement, "blocks doorway")];
        let analysis = analyze_job(&job).unwrap();
        assert_eq!(analysis.dominant_cause, DominantCause::ModelPlacement);
        assert!(analysis.narrative.contains("placement judge"));
    }
}
