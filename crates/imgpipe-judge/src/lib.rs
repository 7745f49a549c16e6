// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-judge
#![deny(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Result;
use async_trait::async_trait;
use imgpipe_core::{CheckResult, PlacementResult, PlacementVerdict, SemanticVerdict};
use imgpipe_json_guard::{JsonGuardLimits, validate_json_object};
use std::collections::BTreeMap;
use std::time::Duration;

/// Guardrail limits applied to every judge response before it is parsed.
const JUDGE_RESPONSE_LIMITS: JsonGuardLimits = JsonGuardLimits::new(6, 64_000);

/// One semantic-judge call.
#[derive(Debug, Clone)]
pub struct SemanticJudgeRequest {
    /// Baseline image bytes.
    pub baseline_image: Vec<u8>,
    /// Candidate image bytes.
    pub candidate_image: Vec<u8>,
    /// Human-readable description of what changes were allowed.
    pub allowed_changes: String,
    /// Call timeout.
    pub timeout: Duration,
}

/// One placement-judge call (stage 2 only).
#[derive(Debug, Clone)]
pub struct PlacementJudgeRequest {
    /// Candidate image bytes (post stage-2 generation).
    pub candidate_image: Vec<u8>,
    /// Call timeout.
    pub timeout: Duration,
}

/// A model-based judge backend returning raw (unparsed) JSON text; parsing
/// is handled separately by [`parse_semantic_response`]/
/// [`parse_placement_response`] so the client trait itself stays pure I/O.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Stable name for telemetry and error messages.
    fn name(&self) -> &str;

    /// Run the semantic-judge rubric, returning the raw JSON response text.
    async fn judge_semantic(&self, request: SemanticJudgeRequest) -> Result<String>;

    /// Run the placement-judge rubric, returning the raw JSON response text.
    async fn judge_placement(&self, request: PlacementJudgeRequest) -> Result<String>;
}

/// Parse a semantic-judge response, never panicking on malformed input.
///
/// Fail-closed: any structural problem (not JSON, not an object, missing
/// `pass`) sets `parse_error = true` and `pass = false` rather than
/// defaulting to an optimistic verdict.
#[must_use]
pub fn parse_semantic_response(raw: &str) -> SemanticVerdict {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return parse_error_semantic_verdict("response was not valid JSON");
    };
    if !validate_json_object(&value, JUDGE_RESPONSE_LIMITS).is_empty() {
        return parse_error_semantic_verdict("response exceeded size/depth guardrails");
    }
    let Some(obj) = value.as_object() else {
        return parse_error_semantic_verdict("response was not a JSON object");
    };

    let Some(pass) = obj.get("pass").and_then(serde_json::Value::as_bool) else {
        return parse_error_semantic_verdict("missing required boolean field 'pass'");
    };

    let confidence = obj
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let allowed_changes_only = obj
        .get("allowedChangesOnly")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let reason = obj
        .get("reason")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
        .to_string();
    let fail_reasons = obj
        .get("failReasons")
        .and_then(serde_json::Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let checks = obj
        .get("checks")
        .and_then(serde_json::Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| {
                    let result = match v.as_str()? {
                        "pass" => CheckResult::Pass,
                        "fail" => CheckResult::Fail,
                        _ => CheckResult::Unclear,
                    };
                    Some((k.clone(), result))
                })
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    SemanticVerdict {
        pass,
        confidence,
        allowed_changes_only,
        reason,
        fail_reasons,
        checks,
        parse_error: false,
    }
}

fn parse_error_semantic_verdict(reason: &str) -> SemanticVerdict {
    SemanticVerdict {
        pass: false,
        confidence: 0.0,
        allowed_changes_only: false,
        reason: reason.to_string(),
        fail_reasons: vec![reason.to_string()],
        checks: BTreeMap::new(),
        parse_error: true,
    }
}

/// Parse a placement-judge response. Unparseable or malformed responses are
/// treated as `hard_fail` — placement is a stage-2-only gate and the spec
/// requires fail-closed behavior on judge parse errors (§4.D, §9 "soft_fail
/// stays warning-only").
#[must_use]
pub fn parse_placement_response(raw: &str) -> PlacementVerdict {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return parse_error_placement_verdict("response was not valid JSON");
    };
    let Some(obj) = value.as_object() else {
        return parse_error_placement_verdict("response was not a JSON object");
    };
    let verdict = match obj.get("verdict").and_then(serde_json::Value::as_str) {
        Some("pass") => PlacementResult::Pass,
        Some("soft_fail") => PlacementResult::SoftFail,
        Some("hard_fail") => PlacementResult::HardFail,
        _ => return parse_error_placement_verdict("missing or invalid 'verdict' field"),
    };
    let reasons = obj
        .get("reasons")
        .and_then(serde_json::Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    PlacementVerdict { verdict, reasons }
}

fn parse_error_placement_verdict(reason: &str) -> PlacementVerdict {
    PlacementVerdict {
        verdict: PlacementResult::HardFail,
        reasons: vec![reason.to_string()],
    }
}

/// A [`JudgeClient`] for local development and tests. Never calls any real
/// vendor API; always returns a passing verdict for both rubrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockJudgeClient;

impl MockJudgeClient {
    /// A judge that passes everything.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JudgeClient for MockJudgeClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn judge_semantic(&self, _request: SemanticJudgeRequest) -> Result<String> {
        Ok(r#"{"pass": true, "confidence": 0.95, "allowedChangesOnly": true, "checks": {}}"#.to_string())
    }

    async fn judge_placement(&self, _request: PlacementJudgeRequest) -> Result<String> {
        Ok(r#"{"verdict": "pass", "reasons": []}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_semantic_response() {
        let raw = r#"{"pass": true, "confidence": 0.92, "allowedChangesOnly": true,
            "reason": "ok", "failReasons": [], "checks": {"geometry": "pass"}}"#;
        let verdict = parse_semantic_response(raw);
        assert!(verdict.pass);
        assert!(!verdict.parse_error);
        assert_eq!(verdict.checks.get("geometry"), Some(&CheckResult::Pass));
    }

    #[test]
    fn non_json_response_is_fail_closed() {
        let verdict = parse_semantic_response("not json at all");
        assert!(verdict.parse_error);
        assert!(!verdict.pass);
    }

    #[test]
    fn missing_pass_field_is_fail_closed() {
        let verdict = parse_semantic_response(r#"{"confidence": 0.5}"#);
        assert!(verdict.parse_error);
    }

    #[test]
    fn confidence_is_clamped() {
        let verdict = parse_semantic_response(r#"{"pass": true, "confidence": 5.0}"#);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn parses_placement_hard_fail() {
        let verdict = parse_placement_response(r#"{"verdict": "hard_fail", "reasons": ["blocks door"]}"#);
        assert_eq!(verdict.verdict, PlacementResult::HardFail);
        assert_eq!(verdict.reasons, vec!["blocks door".to_string()]);
    }

    #[test]
    fn malformed_placement_response_is_hard_fail() {
        let verdict = parse_placement_response("garbage");
        assert_eq!(verdict.verdict, PlacementResult::HardFail);
    }

    #[tokio::test]
    async fn mock_judge_client_passes_both_rubrics() {
        let judge = MockJudgeClient::new();
        let semantic = judge
            .judge_semantic(SemanticJudgeRequest {
                baseline_image: vec![1],
                candidate_image: vec![2],
                allowed_changes: "stage 1A".into(),
                timeout: Duration::from_secs(1),
            })
            .await
            .unwrap();
        assert!(parse_semantic_response(&semantic).pass);

        let placement = judge
            .judge_placement(PlacementJudgeRequest { candidate_image: vec![2], timeout: Duration::from_secs(1) })
            .await
            .unwrap();
        assert_eq!(parse_placement_response(&placement).verdict, PlacementResult::Pass);
    }
}
