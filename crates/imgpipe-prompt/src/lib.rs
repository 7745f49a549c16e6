// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-prompt
#![deny(unsafe_code)]
#![warn(missing_docs)]

use imgpipe_core::{DeclutterMode, FurnishedState, SceneType, Stage, StageConfig, StageTwoVariant, TightenLevel};

/// Build the prompt text for one stage attempt.
///
/// `failure_reasons` carries the prior attempt's rejection reasons, if any
/// (spec §4.F: a tightened retry includes what went wrong last time so the
/// model can correct for it rather than repeat the same mistake).
#[must_use]
pub fn build_prompt(
    stage: Stage,
    variant: Option<StageTwoVariant>,
    config: &StageConfig,
    tighten_level: TightenLevel,
    failure_reasons: &[String],
) -> String {
    let mut sections = vec![base_instruction(stage, variant, config)];

    if let Some(room_type) = &config.room_type {
        sections.push(format!("This is a {room_type}."));
    }

    if tighten_level.value() >= 1 {
        sections.push(
            "Preserve every structural element exactly: walls, windows, doorways, \
             ceiling lines, and camera perspective must not change."
                .to_string(),
        );
    }
    if tighten_level.value() >= 2 {
        sections.push(
            "Make the smallest possible change that satisfies the instruction above. \
             Do not add, remove, or relocate anything not explicitly requested."
                .to_string(),
        );
    }
    if tighten_level.value() >= 3 {
        sections.push(
            "This is a final attempt. Prioritize exact structural fidelity over \
             aesthetic improvement."
                .to_string(),
        );
    }

    if !failure_reasons.is_empty() {
        sections.push(format!(
            "The previous attempt was rejected for: {}. Correct for this specifically.",
            failure_reasons.join("; ")
        ));
    }

    sections.join(" ")
}

fn base_instruction(stage: Stage, variant: Option<StageTwoVariant>, config: &StageConfig) -> String {
    match stage {
        Stage::OneA => match config.scene_type {
            SceneType::Interior => {
                "Correct exposure, white balance, and color cast for this interior photo. \
                 Do not alter geometry or contents."
                    .to_string()
            }
            SceneType::Exterior => {
                let sky = config.replace_sky.unwrap_or(false);
                if sky {
                    "Correct exposure and color for this exterior photo, and replace an \
                     overcast or blown-out sky with a clear blue sky matching the lighting \
                     direction. Do not alter the building or landscape."
                        .to_string()
                } else {
                    "Correct exposure, white balance, and color cast for this exterior photo. \
                     Do not alter geometry, landscaping, or the sky."
                        .to_string()
                }
            }
        },
        Stage::OneB => match config.scene_type {
            SceneType::Interior if matches!(config.furnished_state, Some(FurnishedState::Empty)) => {
                "Remove all furniture and decor to present an empty room. Preserve all \
                 architectural elements exactly."
                    .to_string()
            }
            _ => "Tidy visible clutter (cables, small objects, personal items) while keeping \
                  all furniture in place. Preserve all architectural elements exactly."
                .to_string(),
        },
        Stage::Two => {
            let style = config.staging_style.as_deref().unwrap_or("neutral contemporary");
            match variant {
                Some(StageTwoVariant::TwoA) => format!(
                    "Refresh the existing furniture and decor in a {style} style, keeping \
                     every piece in its current position. Do not change the room's structure."
                ),
                Some(StageTwoVariant::TwoB) | None => format!(
                    "Stage this empty room with {style} furniture appropriate to its type. \
                     Keep all furniture clear of windows, doors, and walkways."
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgpipe_core::SamplingKnobs;

    fn config(scene: SceneType) -> StageConfig {
        StageConfig {
            scene_type: scene,
            room_type: Some("living room".into()),
            furnished_state: None,
            staging_style: None,
            replace_sky: None,
            sampling: SamplingKnobs::base(),
        }
    }

    #[test]
    fn stage_1a_interior_mentions_exposure() {
        let prompt = build_prompt(Stage::OneA, None, &config(SceneType::Interior), TightenLevel::new(0), &[]);
        assert!(prompt.contains("exposure"));
        assert!(prompt.contains("living room"));
    }

    #[test]
    fn tighten_level_adds_structural_clause() {
        let relaxed = build_prompt(Stage::OneA, None, &config(SceneType::Interior), TightenLevel::new(0), &[]);
        let strict = build_prompt(Stage::OneA, None, &config(SceneType::Interior), TightenLevel::new(1), &[]);
        assert!(!relaxed.contains("Preserve every structural element"));
        assert!(strict.contains("Preserve every structural element"));
    }

    #[test]
    fn failure_reasons_are_included() {
        let prompt = build_prompt(
            Stage::Two,
            Some(StageTwoVariant::TwoB),
            &config(SceneType::Interior),
            TightenLevel::new(1),
            &["furniture blocked doorway".to_string()],
        );
        assert!(prompt.contains("furniture blocked doorway"));
    }

    #[test]
    fn stage_two_variant_changes_instruction() {
        let refresh = build_prompt(
            Stage::Two,
            Some(StageTwoVariant::TwoA),
            &config(SceneType::Interior),
            TightenLevel::new(0),
            &[],
        );
        let empty_room = build_prompt(
            Stage::Two,
            Some(StageTwoVariant::TwoB),
            &config(SceneType::Interior),
            TightenLevel::new(0),
            &[],
        );
        assert!(refresh.contains("Refresh"));
        assert!(empty_room.contains("Stage this empty room"));
    }
}
