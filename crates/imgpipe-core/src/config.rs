//! Best-effort sanity checks applied when a batch/job is admitted.
//!
//! These never reject a request outright (that is the HTTP layer's job);
//! they accumulate warnings so the daemon can log or surface them without
//! hand-rolling ad-hoc `if` chains at every call site.

use crate::{BatchSettings, SceneType};
use serde::{Deserialize, Serialize};

/// Severity of a single configuration warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningSeverity {
    /// Informational; no action needed.
    Info,
    /// Likely a mistake, but not fatal.
    Warning,
    /// Will almost certainly produce a degraded or failed job.
    Error,
}

/// A single accumulated warning about batch or job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    /// The field the warning concerns, e.g. `"settings.stagingStyle"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
    /// Severity.
    pub severity: WarningSeverity,
}

/// Accumulates [`ConfigWarning`]s for a batch and its jobs.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    warnings: Vec<ConfigWarning>,
}

impl ConfigValidator {
    /// Start a fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate batch-level settings, returning every warning found.
    #[must_use]
    pub fn validate_batch(settings: &BatchSettings) -> Vec<ConfigWarning> {
        let mut v = Self::new();

        if settings.allow_staging && settings.staging_style.as_deref().is_some_and(str::is_empty) {
            v.push(
                "settings.stagingStyle",
                "staging is allowed but stagingStyle is an empty string",
                WarningSeverity::Warning,
            );
        }
        if !settings.declutter && settings.declutter_mode.is_some() {
            v.push(
                "settings.declutterMode",
                "declutterMode set but declutter is false; mode will be ignored",
                WarningSeverity::Info,
            );
        }
        if let Some(industry) = &settings.industry {
            if industry.trim().is_empty() {
                v.push(
                    "settings.industry",
                    "industry is present but blank",
                    WarningSeverity::Info,
                );
            }
        }

        v.warnings
    }

    /// Validate a single image's resolved scene type against batch settings,
    /// e.g. flagging staging requested for an exterior image that will be
    /// silently dropped by stage-plan derivation.
    #[must_use]
    pub fn validate_job_scene(settings: &BatchSettings, scene_type: SceneType) -> Vec<ConfigWarning> {
        let mut v = Self::new();

        if settings.allow_staging && scene_type == SceneType::Exterior {
            v.push(
                "scene_type",
                "staging requested but scene classified as exterior; stage 2 will be skipped",
                WarningSeverity::Info,
            );
        }

        v.warnings
    }

    fn push(&mut self, field: &str, message: &str, severity: WarningSeverity) {
        self.warnings.push(ConfigWarning {
            field: field.to_string(),
            message: message.to_string(),
            severity,
        });
    }
}

/// Default thresholds applied when a batch omits optional settings.
#[derive(Debug, Clone, Copy)]
pub struct ConfigDefaults;

impl ConfigDefaults {
    /// `maxAttemptsPerStage` default (spec §4.F).
    pub const MAX_ATTEMPTS_PER_STAGE: u32 = 3;
    /// Gate minimum signal count for local-lane "risk" classification.
    pub const GATE_MINIMUM_SIGNALS: usize = 2;
    /// Model-call timeout, in seconds.
    pub const MODEL_CALL_TIMEOUT_SECS: u64 = 90;
    /// Validator-call timeout, in seconds.
    pub const VALIDATOR_CALL_TIMEOUT_SECS: u64 = 30;
    /// Per-stage wall-clock budget, in seconds.
    pub const STAGE_WALL_CLOCK_SECS: u64 = 360;
    /// Per-job wall-clock budget, in seconds.
    pub const JOB_WALL_CLOCK_SECS: u64 = 1800;
    /// Status-record TTL, in hours.
    pub const STATUS_TTL_HOURS: u64 = 24;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeclutterMode;

    #[test]
    fn flags_blank_staging_style() {
        let mut settings = BatchSettings::default();
        settings.allow_staging = true;
        settings.staging_style = Some(String::new());
        let warnings = ConfigValidator::validate_batch(&settings);
        assert!(warnings.iter().any(|w| w.field == "settings.stagingStyle"));
    }

    #[test]
    fn flags_ignored_declutter_mode() {
        let mut settings = BatchSettings::default();
        settings.declutter = false;
        settings.declutter_mode = Some(DeclutterMode::Full);
        let warnings = ConfigValidator::validate_batch(&settings);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Info);
    }

    #[test]
    fn clean_settings_produce_no_warnings() {
        let settings = BatchSettings::default();
        assert!(ConfigValidator::validate_batch(&settings).is_empty());
    }
}
