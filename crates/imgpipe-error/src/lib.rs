//! Unified error taxonomy with stable error codes for the image pipeline core.
//!
//! Every pipeline error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag matching the job-facing status API), a human-readable message,
//! an optional cause chain, and arbitrary key-value context. Use the builder
//! returned by [`PipelineError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// FailureClass
// ---------------------------------------------------------------------------

/// Which of the three propagation taxonomies an error belongs to.
///
/// See spec §7: transient errors are retried inside the HTTP layer of a
/// single attempt, attempt failures consume a retry slot, terminal errors
/// move the job to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network / 5xx / rate-limit / parse-transient — retried with backoff
    /// inside the same attempt.
    Transient,
    /// Validator block, model timeout, exhausted transport retries,
    /// fail-closed parse error, uncorrectable dimension violation.
    AttemptFailure,
    /// Retry slots exhausted, credit failure, source image unavailable,
    /// explicit cancel.
    Terminal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::AttemptFailure => "attempt_failure",
            Self::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code surfaced on terminal jobs.
///
/// Variants serialise to the exact literal strings listed in spec §6 —
/// casing is intentionally inconsistent (`QUOTA_EXCEEDED` vs
/// `image_not_found`) because it mirrors the external status contract
/// verbatim; do not "fix" the casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Credit balance insufficient to cover the requested batch.
    #[serde(rename = "QUOTA_EXCEEDED")]
    QuotaExceeded,
    /// Every retry attempt on a single-job retry request failed structurally.
    #[serde(rename = "RETRY_COMPLIANCE_FAILED")]
    RetryComplianceFailed,
    /// Original image referenced by a retry request no longer exists.
    #[serde(rename = "image_not_found")]
    ImageNotFound,
    /// Job sat in `queued` past the scheduling liveness bound.
    #[serde(rename = "stuck_queued")]
    StuckQueued,
    /// Stage 1A exhausted its retry budget under local/model validation.
    #[serde(rename = "structural_stage1A_rejected")]
    StructuralStage1ARejected,
    /// Stage 1B exhausted its retry budget under local/model validation.
    #[serde(rename = "structural_stage1B_rejected")]
    StructuralStage1BRejected,
    /// Stage 2 exhausted its retry budget under local/model validation.
    #[serde(rename = "structural_stage2_rejected")]
    StructuralStage2Rejected,
    /// Model semantic judge rejected the candidate on the final attempt.
    #[serde(rename = "gemini_semantic")]
    GeminiSemantic,
    /// Placement judge returned `hard_fail` on the final attempt.
    #[serde(rename = "gemini_placement")]
    GeminiPlacement,
    /// Judge response could not be parsed under fail-closed policy.
    #[serde(rename = "gemini_parse_error")]
    GeminiParseError,
    /// A local validator raised an internal error (decode/Sobel failure).
    #[serde(rename = "validator_error")]
    ValidatorError,
    /// A bounded operation (model call, validator call, stage, job) timed out.
    #[serde(rename = "timeout")]
    Timeout,
    /// The job or batch was explicitly cancelled.
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl ErrorCode {
    /// Stable string representation, identical to the wire/status-API value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::RetryComplianceFailed => "RETRY_COMPLIANCE_FAILED",
            Self::ImageNotFound => "image_not_found",
            Self::StuckQueued => "stuck_queued",
            Self::StructuralStage1ARejected => "structural_stage1A_rejected",
            Self::StructuralStage1BRejected => "structural_stage1B_rejected",
            Self::StructuralStage2Rejected => "structural_stage2_rejected",
            Self::GeminiSemantic => "gemini_semantic",
            Self::GeminiPlacement => "gemini_placement",
            Self::GeminiParseError => "gemini_parse_error",
            Self::ValidatorError => "validator_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// The taxonomy (§7) this code's failure belongs to when it is first
    /// raised during stage execution, before it is possibly retried away.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Timeout => FailureClass::AttemptFailure,
            Self::ValidatorError => FailureClass::AttemptFailure,
            Self::QuotaExceeded
            | Self::RetryComplianceFailed
            | Self::ImageNotFound
            | Self::StuckQueued
            | Self::StructuralStage1ARejected
            | Self::StructuralStage1BRejected
            | Self::StructuralStage2Rejected
            | Self::GeminiSemantic
            | Self::GeminiPlacement
            | Self::GeminiParseError
            | Self::Cancelled => FailureClass::Terminal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Unified pipeline error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// ```
/// use imgpipe_error::{PipelineError, ErrorCode};
///
/// let err = PipelineError::new(ErrorCode::Timeout, "model call exceeded 90s")
///     .with_context("stage", "1A")
///     .with_context("attempt", 2);
/// ```
pub struct PipelineError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PipelineError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.failure_class()`.
    pub fn failure_class(&self) -> FailureClass {
        self.code.failure_class()
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PipelineError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`PipelineError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&PipelineError> for PipelineErrorDto {
    fn from(err: &PipelineError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<PipelineErrorDto> for PipelineError {
    fn from(dto: PipelineErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::QuotaExceeded,
        ErrorCode::RetryComplianceFailed,
        ErrorCode::ImageNotFound,
        ErrorCode::StuckQueued,
        ErrorCode::StructuralStage1ARejected,
        ErrorCode::StructuralStage1BRejected,
        ErrorCode::StructuralStage2Rejected,
        ErrorCode::GeminiSemantic,
        ErrorCode::GeminiPlacement,
        ErrorCode::GeminiParseError,
        ErrorCode::ValidatorError,
        ErrorCode::Timeout,
        ErrorCode::Cancelled,
    ];

    #[test]
    fn basic_construction() {
        let err = PipelineError::new(ErrorCode::Timeout, "boom");
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = PipelineError::new(ErrorCode::ImageNotFound, "original missing");
        assert_eq!(err.to_string(), "[image_not_found] original missing");
    }

    #[test]
    fn display_with_context() {
        let err = PipelineError::new(ErrorCode::Timeout, "timed out")
            .with_context("timeout_ms", 90_000);
        let s = err.to_string();
        assert!(s.starts_with("[timeout] timed out"));
        assert!(s.contains("timeout_ms"));
        assert!(s.contains("90000"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err =
            PipelineError::new(ErrorCode::ValidatorError, "decode failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn failure_class_mapping() {
        assert_eq!(ErrorCode::Timeout.failure_class(), FailureClass::AttemptFailure);
        assert_eq!(
            ErrorCode::ValidatorError.failure_class(),
            FailureClass::AttemptFailure
        );
        assert_eq!(ErrorCode::QuotaExceeded.failure_class(), FailureClass::Terminal);
        assert_eq!(ErrorCode::Cancelled.failure_class(), FailureClass::Terminal);
    }

    #[test]
    fn builder_with_context_multiple_keys() {
        let err = PipelineError::new(ErrorCode::Timeout, "timeout")
            .with_context("stage", "1A")
            .with_context("attempt", 2)
            .with_context("retries", 3);
        assert_eq!(err.context.len(), 3);
        assert_eq!(err.context["stage"], serde_json::json!("1A"));
        assert_eq!(err.context["attempt"], serde_json::json!(2));
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = PipelineError::new(ErrorCode::ValidatorError, "decode").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }

    #[test]
    fn error_code_serde_roundtrip_mixed_case() {
        let code = ErrorCode::StructuralStage1ARejected;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""structural_stage1A_rejected""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);

        let code = ErrorCode::QuotaExceeded;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""QUOTA_EXCEEDED""#);
    }

    #[test]
    fn dto_roundtrip_without_source() {
        let err = PipelineError::new(ErrorCode::GeminiParseError, "bad judge output")
            .with_context("stage", "2");
        let dto: PipelineErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: PipelineErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        assert!(back.source_message.is_none());
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate as_str: {code}");
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn all_codes_display_matches_as_str() {
        for code in ALL_CODES {
            assert_eq!(code.to_string(), code.as_str());
        }
    }

    #[test]
    fn error_code_count() {
        assert_eq!(ALL_CODES.len(), 13);
    }
}
