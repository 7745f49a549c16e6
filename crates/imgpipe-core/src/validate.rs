// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Integrity validation for persisted [`Job`]s and [`ValidatorReport`]s.

use std::fmt;

use crate::{BlockedBy, CONTRACT_VERSION, Job, ValidatorReport};

/// An individual validation failure found in a [`Job`] or [`ValidatorReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was empty where it must not be.
    MissingField(&'static str),
    /// The job's contract version does not match what this binary writes.
    ContractVersionMismatch { expected: String, found: String },
    /// `final.pass == true` but `blockedBy != none`, or vice versa.
    InconsistentVerdict,
    /// A stage has a committed URL in `stage_urls` without a matching entry
    /// earlier in `stage_plan`, violating stage-order monotonicity (P1).
    StageOrderViolation,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field: {field}"),
            Self::ContractVersionMismatch { expected, found } => {
                write!(f, "contract version mismatch: expected {expected}, found {found}")
            }
            Self::InconsistentVerdict => {
                write!(f, "final.pass is inconsistent with final.blockedBy")
            }
            Self::StageOrderViolation => {
                write!(f, "a later stage committed before an earlier planned stage")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a single [`ValidatorReport`], accumulating every problem found
/// rather than stopping at the first one.
///
/// # Errors
///
/// Returns every [`ValidationError`] found, or `Ok(())` if none.
pub fn validate_report(report: &ValidatorReport) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if report.baseline_path.is_empty() {
        errors.push(ValidationError::MissingField("baseline_path"));
    }
    if report.candidate_path.is_empty() {
        errors.push(ValidationError::MissingField("candidate_path"));
    }
    let consistent = match (report.final_verdict.pass, report.final_verdict.blocked_by) {
        (true, BlockedBy::None) => true,
        (false, BlockedBy::None) => false,
        (false, _) => true,
        (true, _) => false,
    };
    if !consistent {
        errors.push(ValidationError::InconsistentVerdict);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validate a [`Job`]'s internal consistency: contract version, and that
/// every committed stage URL respects the planned stage order.
///
/// # Errors
///
/// Returns every [`ValidationError`] found, or `Ok(())` if none.
pub fn validate_job(job: &Job) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if job.contract_version != CONTRACT_VERSION {
        errors.push(ValidationError::ContractVersionMismatch {
            expected: CONTRACT_VERSION.to_string(),
            found: job.contract_version.clone(),
        });
    }

    for stage in &job.stage_plan.stages {
        if job.stage_urls.contains_key(stage) && !job.prior_stages_committed(*stage) {
            errors.push(ValidationError::StageOrderViolation);
            break;
        }
    }

    for attempt in &job.meta.attempts {
        if let Err(mut sub_errors) = validate_report(attempt) {
            errors.append(&mut sub_errors);
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
