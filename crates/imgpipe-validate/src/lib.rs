// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-validate
#![deny(unsafe_code)]
#![warn(missing_docs)]

use image::GenericImageView;
use imgpipe_config::PipelineConfig;
use imgpipe_core::{LocalVerdict, LocalVerdictKind, SceneType, Stage, Trigger};
use imgpipe_store::StructuralMaskCache;

/// Relative brightness delta (mean luminance, normalized to `[0, 1]`) beyond
/// which an exterior landcover shift is flagged. Not in the spec's literal
/// threshold table, which names the trigger but not its tolerance; chosen
/// loosely enough that ordinary seasonal/lighting variation won't trip it.
const LANDCOVER_DELTA_TOLERANCE: f64 = 0.15;

/// Minimum count of newly-created or newly-closed structural openings
/// before `masked_edge_openings_created`/`_closed` fires, per stage. Stage
/// 2's min-delta is higher than 1B's (spec §4.C.4: "stage 2 min-delta is
/// higher than stage 1B"); neither number is given literally, so these are
/// picked to tolerate a handful of sub-pixel mask-edge flickers.
const MIN_OPENING_DELTA_1B: u64 = 3;
const MIN_OPENING_DELTA_2: u64 = 6;

fn env_override_f64(name: &str, default: f64) -> f64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_override_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Fixed, per-stage/scene thresholds the local validator lane checks a
/// candidate against (spec §4.C's threshold table). These never move with
/// retry tighten level — tightening only affects prompt assembly and
/// sampling knobs (spec §4.F), never local validator thresholds. Every field
/// is overridable by an `IMGPIPE_THRESH_*` environment variable so rollout
/// can tune strictness without a redeploy (spec §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalValidatorThresholds {
    /// Minimum global edge IoU this row requires, if any.
    pub min_global_edge_iou: Option<f64>,
    /// Whether a global-edge-IoU miss is fatal on this row (spec §4.C.2:
    /// "fatal in stage 1A interior" — the 1A exterior row still checks the
    /// metric, but only contributes a non-fatal signal).
    pub global_edge_iou_fatal: bool,
    /// Minimum masked structural edge IoU this row requires, if any.
    pub min_structural_edge_iou: Option<f64>,
    /// Minimum newly-created/closed structural-mask openings before the
    /// edge-drift trigger fires, when structural IoU is enforced.
    pub min_opening_delta: u64,
    /// Maximum acceptable brightness delta, if this row enforces one.
    pub max_brightness_delta: Option<f64>,
    /// Whether the exterior-only landcover-delta check runs on this row.
    pub enforce_landcover: bool,
    /// Whether the window-count-delta check runs on this row, and whether a
    /// mismatch is fatal (1B/2) or would be advisory (1A never enforces it
    /// per the table, so this is always `true` when `Some`).
    pub enforce_windows: bool,
}

impl LocalValidatorThresholds {
    /// Look up the fixed threshold row for `(stage, scene)`. There is no
    /// distinct "1B exterior" row in the table; exterior 1B reuses the 1B
    /// interior row's values.
    #[must_use]
    pub fn for_stage_scene(stage: Stage, scene: SceneType) -> Self {
        match (stage, scene) {
            (Stage::OneA, SceneType::Interior) => Self {
                min_global_edge_iou: Some(env_override_f64("IMGPIPE_THRESH_1A_INTERIOR_MIN_EDGE_IOU", 0.65)),
                global_edge_iou_fatal: true,
                min_structural_edge_iou: None,
                min_opening_delta: 0,
                max_brightness_delta: Some(env_override_f64("IMGPIPE_THRESH_1A_INTERIOR_MAX_BRIGHTNESS_DELTA", 0.50)),
                enforce_landcover: false,
                enforce_windows: false,
            },
            (Stage::OneA, SceneType::Exterior) => Self {
                min_global_edge_iou: Some(env_override_f64("IMGPIPE_THRESH_1A_EXTERIOR_MIN_EDGE_IOU", 0.70)),
                global_edge_iou_fatal: false,
                min_structural_edge_iou: None,
                min_opening_delta: 0,
                max_brightness_delta: None,
                enforce_landcover: true,
                enforce_windows: false,
            },
            (Stage::OneB, SceneType::Interior | SceneType::Exterior) => Self {
                min_global_edge_iou: None,
                global_edge_iou_fatal: false,
                min_structural_edge_iou: Some(env_override_f64("IMGPIPE_THRESH_1B_MIN_STRUCTURAL_IOU", 0.85)),
                min_opening_delta: env_override_u64("IMGPIPE_THRESH_1B_MIN_OPENING_DELTA", MIN_OPENING_DELTA_1B),
                max_brightness_delta: Some(env_override_f64("IMGPIPE_THRESH_1B_MAX_BRIGHTNESS_DELTA", 0.40)),
                enforce_landcover: false,
                enforce_windows: true,
            },
            (Stage::Two, SceneType::Interior) => Self {
                min_global_edge_iou: None,
                global_edge_iou_fatal: false,
                min_structural_edge_iou: Some(env_override_f64("IMGPIPE_THRESH_2_INTERIOR_MIN_STRUCTURAL_IOU", 0.30)),
                min_opening_delta: env_override_u64("IMGPIPE_THRESH_2_MIN_OPENING_DELTA", MIN_OPENING_DELTA_2),
                max_brightness_delta: Some(env_override_f64("IMGPIPE_THRESH_2_INTERIOR_MAX_BRIGHTNESS_DELTA", 0.60)),
                enforce_landcover: false,
                enforce_windows: true,
            },
            (Stage::Two, SceneType::Exterior) => Self {
                min_global_edge_iou: None,
                global_edge_iou_fatal: false,
                min_structural_edge_iou: Some(env_override_f64("IMGPIPE_THRESH_2_EXTERIOR_MIN_STRUCTURAL_IOU", 0.30)),
                min_opening_delta: env_override_u64("IMGPIPE_THRESH_2_MIN_OPENING_DELTA", MIN_OPENING_DELTA_2),
                max_brightness_delta: Some(env_override_f64("IMGPIPE_THRESH_2_EXTERIOR_MAX_BRIGHTNESS_DELTA", 0.60)),
                enforce_landcover: true,
                enforce_windows: false,
            },
        }
    }
}

async fn structural_mask_for(mask_cache: &StructuralMaskCache, content_hash: &str, baseline: &image::DynamicImage) -> image::GrayImage {
    let (w, h) = baseline.dimensions();
    if let Some(cached) = mask_cache.get(content_hash).await {
        if let Some(mask) = image::GrayImage::from_raw(w, h, (*cached).clone()) {
            return mask;
        }
    }
    let mask = imgpipe_image::structural_mask(baseline);
    mask_cache.insert(content_hash.to_string(), mask.clone().into_raw()).await;
    mask
}

fn push_trigger(verdict: &mut LocalVerdict, id: &str, fatal: bool, value: f64, threshold: f64, message: String) {
    verdict.triggers.push(Trigger {
        id: id.to_string(),
        fatal,
        value,
        threshold,
        message,
    });
}

/// Run the full local validator lane on one stage attempt (spec §4.C): the
/// dimension check, global edge IoU, masked structural edge IoU, masked
/// edge drift, window-count delta, landcover delta (exterior only), and
/// brightness delta.
///
/// The validator never throws: a decode failure produces a single
/// non-fatal `validator_error` trigger and the lane fails open (marked
/// `risk`, not `fatal`), per spec §4.C.
pub async fn run_local_validators(
    baseline_bytes: &[u8],
    candidate_bytes: &[u8],
    stage: Stage,
    scene: SceneType,
    config: &PipelineConfig,
    mask_cache: &StructuralMaskCache,
) -> LocalVerdict {
    let mut verdict = LocalVerdict::default();

    let (baseline, candidate_raw) = match (imgpipe_image::decode(baseline_bytes), imgpipe_image::decode(candidate_bytes)) {
        (Ok(b), Ok(c)) => (b, c),
        (base, cand) => {
            let message = base.err().or(cand.err()).map_or_else(String::new, |e| e.to_string());
            push_trigger(
                &mut verdict,
                "validator_error",
                false,
                0.0,
                0.0,
                format!("failed to decode image for local validation: {message}"),
            );
            verdict.verdict = Some(LocalVerdictKind::Risk);
            return verdict;
        }
    };

    let thresholds = LocalValidatorThresholds::for_stage_scene(stage, scene);

    let candidate = match imgpipe_image::resize_to_match(&candidate_raw, &baseline) {
        imgpipe_image::DimensionCheck::AspectMismatch { delta } => {
            push_trigger(
                &mut verdict,
                "dimension_change",
                true,
                delta,
                imgpipe_image::ASPECT_RATIO_TOLERANCE,
                format!("candidate aspect ratio drifted from baseline (delta {delta:.4} > {:.4})", imgpipe_image::ASPECT_RATIO_TOLERANCE),
            );
            verdict.verdict = Some(LocalVerdictKind::Fatal);
            return verdict;
        }
        imgpipe_image::DimensionCheck::Reconciled(img) => img,
    };

    let baseline_edges = imgpipe_image::edge_map(&baseline);
    let candidate_edges = imgpipe_image::edge_map(&candidate);

    if let Some(min_iou) = thresholds.min_global_edge_iou {
        let iou = imgpipe_image::edge_iou(&baseline_edges, &candidate_edges);
        verdict.metrics.insert("global_edge_iou".into(), iou);
        if iou < min_iou {
            push_trigger(
                &mut verdict,
                "low_global_edge_iou",
                thresholds.global_edge_iou_fatal,
                iou,
                min_iou,
                format!("candidate edge structure diverges from baseline (IoU {iou:.3} < {min_iou:.3})"),
            );
        }
    }

    if let Some(min_iou) = thresholds.min_structural_edge_iou {
        let content_hash = imgpipe_core::image_id_for(baseline_bytes);
        let mask = structural_mask_for(mask_cache, &content_hash, &baseline).await;

        let masked_iou = imgpipe_image::masked_edge_iou(&mask, &baseline_edges, &candidate_edges);
        verdict.metrics.insert("structural_edge_iou".into(), masked_iou);
        if masked_iou < min_iou {
            push_trigger(
                &mut verdict,
                "low_structural_iou",
                false,
                masked_iou,
                min_iou,
                format!("masked structural edge IoU dropped below threshold ({masked_iou:.3} < {min_iou:.3})"),
            );
        }

        let drift = imgpipe_image::masked_edge_drift(&mask, &baseline_edges, &candidate_edges);
        verdict.metrics.insert("masked_openings_created".into(), drift.created as f64);
        verdict.metrics.insert("masked_openings_closed".into(), drift.closed as f64);
        if drift.created >= thresholds.min_opening_delta {
            push_trigger(
                &mut verdict,
                "masked_edge_openings_created",
                false,
                drift.created as f64,
                thresholds.min_opening_delta as f64,
                format!("{} structural openings newly appeared (>= {})", drift.created, thresholds.min_opening_delta),
            );
        }
        if drift.closed >= thresholds.min_opening_delta {
            push_trigger(
                &mut verdict,
                "masked_edge_openings_closed",
                false,
                drift.closed as f64,
                thresholds.min_opening_delta as f64,
                format!("{} structural openings newly closed (>= {})", drift.closed, thresholds.min_opening_delta),
            );
        }
    }

    if thresholds.enforce_windows {
        let percentile = config.window_detector_percentile;
        let base_windows = imgpipe_image::detect_windows(&baseline, percentile).len();
        let candidate_windows = imgpipe_image::detect_windows(&candidate, percentile).len();
        verdict.metrics.insert("window_count_delta".into(), (candidate_windows as i64 - base_windows as i64) as f64);
        if base_windows != candidate_windows {
            push_trigger(
                &mut verdict,
                "semantic_window_count_change",
                true,
                candidate_windows as f64,
                base_windows as f64,
                format!("window count changed from {base_windows} to {candidate_windows}"),
            );
        }
    }

    if thresholds.enforce_landcover {
        let base_ratio = imgpipe_image::landcover_ratio(&baseline);
        let candidate_ratio = imgpipe_image::landcover_ratio(&candidate);
        let delta = (candidate_ratio - base_ratio).abs();
        verdict.metrics.insert("landcover_delta".into(), delta);
        if delta > LANDCOVER_DELTA_TOLERANCE {
            push_trigger(
                &mut verdict,
                "landcover_change",
                false,
                delta,
                LANDCOVER_DELTA_TOLERANCE,
                format!("green-cover ratio shifted more than expected (delta {delta:.3} > {LANDCOVER_DELTA_TOLERANCE:.3})"),
            );
        }
    }

    if let Some(max_delta) = thresholds.max_brightness_delta {
        let base_luminance = imgpipe_image::mean_luminance(&baseline) / 255.0;
        let candidate_luminance = imgpipe_image::mean_luminance(&candidate) / 255.0;
        let delta = (candidate_luminance - base_luminance).abs();
        verdict.metrics.insert("brightness_delta".into(), delta);
        if delta > max_delta {
            push_trigger(
                &mut verdict,
                "brightness_out_of_range",
                false,
                delta,
                max_delta,
                format!("mean luminance shifted more than expected (delta {delta:.3} > {max_delta:.3})"),
            );
        }
    }

    verdict.verdict = Some(if verdict.is_fatal() {
        LocalVerdictKind::Fatal
    } else if verdict.is_risk(config.gate_minimum_signals) {
        LocalVerdictKind::Risk
    } else {
        LocalVerdictKind::Pass
    });

    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn solid_png(w: u32, h: u32, value: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([value, value, value])));
        imgpipe_image::encode_png(&img).unwrap()
    }

    fn cache() -> StructuralMaskCache {
        StructuralMaskCache::new()
    }

    #[tokio::test]
    async fn identical_images_pass_with_no_triggers() {
        let bytes = solid_png(16, 16, 100);
        let verdict = run_local_validators(&bytes, &bytes, Stage::OneA, SceneType::Interior, &PipelineConfig::default(), &cache()).await;
        assert_eq!(verdict.verdict, Some(LocalVerdictKind::Pass));
        assert!(verdict.triggers.is_empty());
    }

    #[tokio::test]
    async fn drastic_brightness_shift_triggers_non_fatal() {
        let baseline = solid_png(16, 16, 10);
        let candidate = solid_png(16, 16, 250);
        let verdict =
            run_local_validators(&baseline, &candidate, Stage::OneA, SceneType::Interior, &PipelineConfig::default(), &cache()).await;
        assert!(verdict.triggers.iter().any(|t| t.id == "brightness_out_of_range"));
    }

    #[tokio::test]
    async fn decode_failure_fails_open_as_risk() {
        let verdict =
            run_local_validators(b"not an image", b"also not an image", Stage::OneA, SceneType::Interior, &PipelineConfig::default(), &cache())
                .await;
        assert_eq!(verdict.verdict, Some(LocalVerdictKind::Risk));
        assert!(verdict.triggers.iter().any(|t| t.id == "validator_error" && !t.fatal));
    }

    #[tokio::test]
    async fn aspect_mismatch_is_fatal_and_skips_other_checks() {
        let baseline = solid_png(8, 8, 50);
        let candidate = solid_png(4, 8, 50);
        let verdict =
            run_local_validators(&baseline, &candidate, Stage::OneA, SceneType::Interior, &PipelineConfig::default(), &cache()).await;
        assert_eq!(verdict.verdict, Some(LocalVerdictKind::Fatal));
        assert_eq!(verdict.triggers.len(), 1);
        assert_eq!(verdict.triggers[0].id, "dimension_change");
    }

    #[tokio::test]
    async fn stage_1b_enforces_structural_iou_not_global_iou() {
        let thresholds = LocalValidatorThresholds::for_stage_scene(Stage::OneB, SceneType::Interior);
        assert!(thresholds.min_global_edge_iou.is_none());
        assert!(thresholds.min_structural_edge_iou.is_some());
        assert!(thresholds.enforce_windows);
    }

    #[tokio::test]
    async fn exterior_rows_enforce_landcover_not_windows() {
        let one_a = LocalValidatorThresholds::for_stage_scene(Stage::OneA, SceneType::Exterior);
        let two = LocalValidatorThresholds::for_stage_scene(Stage::Two, SceneType::Exterior);
        assert!(one_a.enforce_landcover && !one_a.enforce_windows);
        assert!(two.enforce_landcover && !two.enforce_windows);
    }

    #[tokio::test]
    async fn structural_mask_is_cached_across_calls() {
        let baseline = solid_png(16, 16, 80);
        let candidate = solid_png(16, 16, 90);
        let cache = cache();
        let content_hash = imgpipe_core::image_id_for(&baseline);
        assert!(cache.get(&content_hash).await.is_none());
        let _ = run_local_validators(&baseline, &candidate, Stage::OneB, SceneType::Interior, &PipelineConfig::default(), &cache).await;
        assert!(cache.get(&content_hash).await.is_some());
    }
}
