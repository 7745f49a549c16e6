// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request validation for the daemon API.

use crate::api::UploadRequest;

/// Maximum images accepted in a single upload request.
const MAX_IMAGES_PER_BATCH: usize = 200;

/// Maximum allowed length for a free-form settings string field.
const MAX_FREEFORM_LENGTH: usize = 4_000;

/// Validates incoming API requests before processing.
pub struct RequestValidator;

impl RequestValidator {
    /// Validate all fields of an [`UploadRequest`], accumulating every error found.
    pub fn validate_upload(req: &UploadRequest) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if req.images.is_empty() {
            errors.push("images must not be empty".into());
        } else if req.images.len() > MAX_IMAGES_PER_BATCH {
            errors.push(format!("images exceeds maximum batch size of {MAX_IMAGES_PER_BATCH}"));
        }

        for (idx, image) in req.images.iter().enumerate() {
            if image.input_image_url.trim().is_empty() {
                errors.push(format!("images[{idx}].input_image_url must not be empty"));
            }
        }

        if let Some(goal) = &req.settings.goal {
            if goal.len() > MAX_FREEFORM_LENGTH {
                errors.push(format!("settings.goal exceeds maximum length of {MAX_FREEFORM_LENGTH}"));
            }
        }
        if let Some(style) = &req.settings.staging_style {
            if style.len() > MAX_FREEFORM_LENGTH {
                errors.push(format!("settings.staging_style exceeds maximum length of {MAX_FREEFORM_LENGTH}"));
            }
        }
        if req.settings.declutter && req.settings.declutter_mode.is_none() {
            // Resolved to `Light` downstream (spec §3 `StagePlan` derivation), but
            // surfaced as an advisory so submitters notice the implicit default.
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
