// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the image pipeline.
//!
//! This crate provides [`PipelineConfig`] — the runtime thresholds that
//! govern retry behavior, validator strictness, and timeouts — together
//! with helpers for loading from TOML, applying environment overrides, and
//! producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A threshold is set so loosely it is unlikely to ever trigger.
    PermissiveThreshold {
        /// Field name.
        field: String,
        /// The configured value.
        value: String,
    },
    /// A timeout is unusually large.
    LargeTimeout {
        /// Which timeout.
        name: String,
        /// Value in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissiveThreshold { field, value } => {
                write!(f, "'{field}' is set permissively ({value})")
            }
            Self::LargeTimeout { name, secs } => {
                write!(f, "timeout '{name}' is unusually large ({secs}s)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validator mode
// ---------------------------------------------------------------------------

/// Per-validator-family rollout mode: the primary control for gradually
/// enabling a validator family across a fleet without a redeploy.
///
/// - `Off`: the family's validator(s) are skipped entirely.
/// - `Log`: the family's validator(s) run and are attached to the report for
///   analysis, but never block a stage.
/// - `Block`: the family's validator(s) run and participate in the fused
///   pass/fail decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorMode {
    /// Skip this validator family.
    Off,
    /// Run and record, never block.
    Log,
    /// Run and enforce.
    Block,
}

impl std::str::FromStr for ValidatorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "log" => Ok(Self::Log),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown validator mode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Runtime thresholds for the pipeline's retry controller, validator fusion
/// policy, and timeouts (spec §6 "Configuration thresholds, env-overridable").
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PipelineConfig {
    /// Maximum attempts per stage before giving up (spec §4.F).
    #[serde(default = "PipelineConfig::default_max_attempts_per_stage")]
    pub max_attempts_per_stage: u32,

    /// Minimum non-fatal local triggers before the local lane reports `risk`.
    #[serde(default = "PipelineConfig::default_gate_minimum_signals")]
    pub gate_minimum_signals: usize,

    /// Semantic-judge confidence above which a `risk`-level local verdict is
    /// overridden (spec §4.E "high confidence threshold").
    #[serde(default = "PipelineConfig::default_high_confidence_threshold")]
    pub high_confidence_threshold: f64,

    /// Whether a judge parse failure blocks the stage (fail closed, the
    /// default) or is treated as a pass-through warning (spec §4.D).
    #[serde(default = "PipelineConfig::default_true")]
    pub fail_closed_on_parse_error: bool,

    /// Whether a semantic-judge failure blocks the stage unconditionally
    /// (fail closed) or only when judge confidence clears
    /// `high_confidence_threshold` (spec §4.E step 6). Default fail-closed.
    #[serde(default = "PipelineConfig::default_true")]
    pub fail_closed_on_semantic_failure: bool,

    /// Percentile used by the window/structural-mask detector when scoring
    /// edge-preservation (spec §4.C).
    #[serde(default = "PipelineConfig::default_window_detector_percentile")]
    pub window_detector_percentile: f64,

    /// Rollout mode for the local (non-model) validator family (spec §6/§9
    /// "the primary rollout control").
    #[serde(default = "PipelineConfig::default_block_mode")]
    pub local_validator_mode: ValidatorMode,

    /// Rollout mode for the semantic-judge validator family.
    #[serde(default = "PipelineConfig::default_block_mode")]
    pub semantic_validator_mode: ValidatorMode,

    /// Rollout mode for the placement-judge validator family.
    #[serde(default = "PipelineConfig::default_block_mode")]
    pub placement_validator_mode: ValidatorMode,

    /// Model-call timeout in seconds.
    #[serde(default = "PipelineConfig::default_model_call_timeout_secs")]
    pub model_call_timeout_secs: u64,

    /// Validator-call timeout in seconds.
    #[serde(default = "PipelineConfig::default_validator_call_timeout_secs")]
    pub validator_call_timeout_secs: u64,

    /// Per-stage wall-clock budget in seconds.
    #[serde(default = "PipelineConfig::default_stage_wall_clock_secs")]
    pub stage_wall_clock_secs: u64,

    /// Per-job wall-clock budget in seconds.
    #[serde(default = "PipelineConfig::default_job_wall_clock_secs")]
    pub job_wall_clock_secs: u64,

    /// Status-record TTL in hours.
    #[serde(default = "PipelineConfig::default_status_ttl_hours")]
    pub status_ttl_hours: u64,

    /// Global concurrency cap on simultaneous generative-model calls.
    #[serde(default = "PipelineConfig::default_global_model_concurrency")]
    pub global_model_concurrency: usize,
}

impl PipelineConfig {
    fn default_max_attempts_per_stage() -> u32 {
        3
    }
    fn default_gate_minimum_signals() -> usize {
        2
    }
    fn default_high_confidence_threshold() -> f64 {
        0.9
    }
    fn default_true() -> bool {
        true
    }
    fn default_window_detector_percentile() -> f64 {
        0.95
    }
    fn default_block_mode() -> ValidatorMode {
        ValidatorMode::Block
    }
    fn default_model_call_timeout_secs() -> u64 {
        90
    }
    fn default_validator_call_timeout_secs() -> u64 {
        30
    }
    fn default_stage_wall_clock_secs() -> u64 {
        360
    }
    fn default_job_wall_clock_secs() -> u64 {
        1_800
    }
    fn default_status_ttl_hours() -> u64 {
        24
    }
    fn default_global_model_concurrency() -> usize {
        8
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_stage: Self::default_max_attempts_per_stage(),
            gate_minimum_signals: Self::default_gate_minimum_signals(),
            high_confidence_threshold: Self::default_high_confidence_threshold(),
            fail_closed_on_parse_error: Self::default_true(),
            fail_closed_on_semantic_failure: Self::default_true(),
            window_detector_percentile: Self::default_window_detector_percentile(),
            local_validator_mode: Self::default_block_mode(),
            semantic_validator_mode: Self::default_block_mode(),
            placement_validator_mode: Self::default_block_mode(),
            model_call_timeout_secs: Self::default_model_call_timeout_secs(),
            validator_call_timeout_secs: Self::default_validator_call_timeout_secs(),
            stage_wall_clock_secs: Self::default_stage_wall_clock_secs(),
            job_wall_clock_secs: Self::default_job_wall_clock_secs(),
            status_ttl_hours: Self::default_status_ttl_hours(),
            global_model_concurrency: Self::default_global_model_concurrency(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`PipelineConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`PipelineConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] or [`ConfigError::ParseError`].
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => PipelineConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`PipelineConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `content` is not valid TOML or does
/// not match the expected shape.
pub fn parse_toml(content: &str) -> Result<PipelineConfig, ConfigError> {
    toml::from_str::<PipelineConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

fn env_u32(name: &str, target: &mut u32) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

fn env_u64(name: &str, target: &mut u64) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

fn env_usize(name: &str, target: &mut usize) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

fn env_f64(name: &str, target: &mut f64) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

fn env_bool(name: &str, target: &mut bool) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

fn env_validator_mode(name: &str, target: &mut ValidatorMode) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

/// Apply environment variable overrides, `IMGPIPE_`-prefixed and
/// SCREAMING_SNAKE_CASE (spec §6 "env-overridable").
pub fn apply_env_overrides(config: &mut PipelineConfig) {
    env_u32("IMGPIPE_MAX_ATTEMPTS_PER_STAGE", &mut config.max_attempts_per_stage);
    env_usize("IMGPIPE_GATE_MINIMUM_SIGNALS", &mut config.gate_minimum_signals);
    env_f64(
        "IMGPIPE_HIGH_CONFIDENCE_THRESHOLD",
        &mut config.high_confidence_threshold,
    );
    env_bool(
        "IMGPIPE_FAIL_CLOSED_ON_PARSE_ERROR",
        &mut config.fail_closed_on_parse_error,
    );
    env_bool(
        "IMGPIPE_FAIL_CLOSED_ON_SEMANTIC_FAILURE",
        &mut config.fail_closed_on_semantic_failure,
    );
    env_f64(
        "IMGPIPE_WINDOW_DETECTOR_PERCENTILE",
        &mut config.window_detector_percentile,
    );
    env_validator_mode("IMGPIPE_LOCAL_VALIDATOR_MODE", &mut config.local_validator_mode);
    env_validator_mode("IMGPIPE_SEMANTIC_VALIDATOR_MODE", &mut config.semantic_validator_mode);
    env_validator_mode("IMGPIPE_PLACEMENT_VALIDATOR_MODE", &mut config.placement_validator_mode);
    env_u64("IMGPIPE_MODEL_CALL_TIMEOUT_SECS", &mut config.model_call_timeout_secs);
    env_u64(
        "IMGPIPE_VALIDATOR_CALL_TIMEOUT_SECS",
        &mut config.validator_call_timeout_secs,
    );
    env_u64("IMGPIPE_STAGE_WALL_CLOCK_SECS", &mut config.stage_wall_clock_secs);
    env_u64("IMGPIPE_JOB_WALL_CLOCK_SECS", &mut config.job_wall_clock_secs);
    env_u64("IMGPIPE_STATUS_TTL_HOURS", &mut config.status_ttl_hours);
    env_usize(
        "IMGPIPE_GLOBAL_MODEL_CONCURRENCY",
        &mut config.global_model_concurrency,
    );
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero/out-of-range thresholds) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] if any threshold is out of its
/// valid range.
pub fn validate_config(config: &PipelineConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.max_attempts_per_stage == 0 {
        errors.push("max_attempts_per_stage must be >= 1".into());
    }
    if !(0.0..=1.0).contains(&config.high_confidence_threshold) {
        errors.push("high_confidence_threshold must be in [0, 1]".into());
    } else if config.high_confidence_threshold < 0.5 {
        warnings.push(ConfigWarning::PermissiveThreshold {
            field: "high_confidence_threshold".into(),
            value: config.high_confidence_threshold.to_string(),
        });
    }
    if !(0.0..=1.0).contains(&config.window_detector_percentile) {
        errors.push("window_detector_percentile must be in [0, 1]".into());
    }
    if config.global_model_concurrency == 0 {
        errors.push("global_model_concurrency must be >= 1".into());
    }
    if config.model_call_timeout_secs == 0 {
        errors.push("model_call_timeout_secs must be >= 1".into());
    }
    if config.stage_wall_clock_secs > 0 && config.model_call_timeout_secs > config.stage_wall_clock_secs {
        errors.push("model_call_timeout_secs must not exceed stage_wall_clock_secs".into());
    }
    if config.job_wall_clock_secs > 21_600 {
        warnings.push(ConfigWarning::LargeTimeout {
            name: "job_wall_clock_secs".into(),
            secs: config.job_wall_clock_secs,
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let cfg = PipelineConfig::default();
        assert!(validate_config(&cfg).unwrap().is_empty());
    }

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_attempts_per_stage, 3);
        assert_eq!(cfg.model_call_timeout_secs, 90);
        assert_eq!(cfg.stage_wall_clock_secs, 360);
        assert_eq!(cfg.job_wall_clock_secs, 1_800);
    }

    #[test]
    fn parse_valid_toml_overrides_some_fields() {
        let toml = r#"
            max_attempts_per_stage = 5
            high_confidence_threshold = 0.95
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.max_attempts_per_stage, 5);
        assert_eq!(cfg.high_confidence_threshold, 0.95);
        assert_eq!(cfg.model_call_timeout_secs, 90);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let err = parse_toml("this is [not valid toml =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_zero_max_attempts() {
        let cfg = PipelineConfig {
            max_attempts_per_stage: 0,
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&cfg).unwrap_err(),
            ConfigError::ValidationError { .. }
        ));
    }

    #[test]
    fn validation_catches_out_of_range_confidence() {
        let cfg = PipelineConfig {
            high_confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn validation_catches_model_timeout_exceeding_stage_budget() {
        let cfg = PipelineConfig {
            model_call_timeout_secs: 400,
            stage_wall_clock_secs: 360,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn permissive_confidence_threshold_warns() {
        let cfg = PipelineConfig {
            high_confidence_threshold: 0.3,
            ..Default::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::PermissiveThreshold { .. })));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imgpipe.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "max_attempts_per_stage = 4").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.max_attempts_per_stage, 4);
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/imgpipe.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = PipelineConfig {
            max_attempts_per_stage: 7,
            ..Default::default()
        };
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: PipelineConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }
}
