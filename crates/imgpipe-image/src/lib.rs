// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-image
#![deny(unsafe_code)]
#![warn(missing_docs)]

use image::{DynamicImage, GenericImageView, ImageFormat};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::sobel_gradients;
use imageproc::morphology::{dilate, erode};
use std::io::Cursor;

/// Errors from decode/encode operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// The bytes could not be decoded as a supported image format.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Aspect-ratio delta beyond which a base/candidate dimension mismatch is
/// treated as a fatal `dimension_change` trigger rather than reconciled
/// (spec §4.C.1).
pub const ASPECT_RATIO_TOLERANCE: f64 = 0.005;

/// Decode raw bytes (PNG or JPEG) into an in-memory image.
///
/// # Errors
///
/// Returns [`ImageError::Decode`] if the bytes are not a supported format.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Encode an image to PNG bytes.
///
/// # Errors
///
/// Returns [`ImageError::Decode`] if encoding fails.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Outcome of checking `img`'s dimensions against a `target` baseline
/// (spec §4.C.1, the dimension check).
#[derive(Debug, Clone)]
pub enum DimensionCheck {
    /// Dimensions matched exactly, or aspect ratio was within tolerance and
    /// the image has been center-cropped/resized to `target`'s dimensions.
    Reconciled(DynamicImage),
    /// Aspect ratio diverged beyond [`ASPECT_RATIO_TOLERANCE`]. No resize was
    /// performed; the caller should raise a fatal `dimension_change` trigger.
    AspectMismatch {
        /// Relative aspect-ratio delta that tripped the check.
        delta: f64,
    },
}

/// Check `img`'s dimensions against `target` and, if reconcilable, resize it
/// to match.
///
/// If the dimensions already match, returns the image unchanged. If they
/// differ but the aspect ratio is within [`ASPECT_RATIO_TOLERANCE`], the
/// image is center-cropped then resized to `target`'s exact dimensions. If
/// the aspect ratio has drifted beyond tolerance, no resize is performed —
/// the mismatch itself is the signal (spec §4.C.1 "no resize").
#[must_use]
pub fn resize_to_match(img: &DynamicImage, target: &DynamicImage) -> DimensionCheck {
    let (tw, th) = target.dimensions();
    let (iw, ih) = img.dimensions();
    if (iw, ih) == (tw, th) {
        return DimensionCheck::Reconciled(img.clone());
    }

    let target_ratio = f64::from(tw) / f64::from(th);
    let img_ratio = f64::from(iw) / f64::from(ih);
    let delta = (img_ratio - target_ratio).abs() / target_ratio;
    if delta > ASPECT_RATIO_TOLERANCE {
        return DimensionCheck::AspectMismatch { delta };
    }

    DimensionCheck::Reconciled(img.resize_to_fill(tw, th, image::imageops::FilterType::Lanczos3))
}

/// Convert to 8-bit grayscale.
#[must_use]
pub fn to_grayscale(img: &DynamicImage) -> image::GrayImage {
    img.to_luma8()
}

/// Compute a Canny edge map at a fixed low/high threshold pair, suitable for
/// structural-preservation comparisons (spec §4.C "global edge IoU").
#[must_use]
pub fn edge_map(img: &DynamicImage) -> image::GrayImage {
    canny(&to_grayscale(img), 20.0, 50.0)
}

/// Intersection-over-union of two binary edge maps (0/255 pixel values),
/// the core metric behind the structural-preservation triggers.
///
/// Returns `1.0` if both maps are entirely empty (trivially identical).
#[must_use]
pub fn edge_iou(a: &image::GrayImage, b: &image::GrayImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut intersection = 0u64;
    let mut union = 0u64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let ea = pa[0] > 0;
        let eb = pb[0] > 0;
        if ea || eb {
            union += 1;
        }
        if ea && eb {
            intersection += 1;
        }
    }
    if union == 0 { 1.0 } else { intersection as f64 / union as f64 }
}

/// Mean Sobel gradient magnitude, used by local validators to detect
/// over-smoothing (a sign the model hallucinated rather than enhanced).
#[must_use]
pub fn mean_gradient_magnitude(img: &DynamicImage) -> f64 {
    let gray = to_grayscale(img);
    let grad = sobel_gradients(&gray);
    let count = (grad.width() as u64) * (grad.height() as u64);
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = grad.pixels().map(|p| u64::from(p[0])).sum();
    sum as f64 / count as f64
}

/// A 256-bucket luminance histogram.
#[must_use]
pub fn luminance_histogram(img: &DynamicImage) -> [u32; 256] {
    let gray = to_grayscale(img);
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    hist
}

/// Mean absolute difference between two histograms, normalized to `[0, 1]`
/// by total pixel count — a cheap proxy for "did exposure/contrast shift
/// more than expected".
#[must_use]
pub fn histogram_delta(a: &[u32; 256], b: &[u32; 256]) -> f64 {
    let total: u64 = a.iter().map(|&v| v as u64).sum::<u64>().max(1);
    let diff: u64 = a.iter().zip(b.iter()).map(|(&x, &y)| x.abs_diff(y) as u64).sum();
    diff as f64 / (2 * total) as f64
}

/// Derive a structural mask from a base image: edges that survive mild blur
/// and morphological closing, intended to capture walls, windows, door
/// frames, and built-ins while excluding decor (spec §4.C.3).
#[must_use]
pub fn structural_mask(img: &DynamicImage) -> image::GrayImage {
    let blurred = gaussian_blur_f32(&to_grayscale(img), 1.5);
    let edges = canny(&blurred, 20.0, 50.0);
    erode(&dilate(&edges, Norm::LInf, 2), Norm::LInf, 2)
}

/// Intersection-over-union of `a` and `b` restricted to pixels where `mask`
/// is set — the masked structural edge IoU (spec §4.C.3).
///
/// Returns `1.0` if the mask covers no pixels with an edge in either map.
#[must_use]
pub fn masked_edge_iou(mask: &image::GrayImage, a: &image::GrayImage, b: &image::GrayImage) -> f64 {
    debug_assert_eq!(mask.dimensions(), a.dimensions());
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut intersection = 0u64;
    let mut union = 0u64;
    for ((pm, pa), pb) in mask.pixels().zip(a.pixels()).zip(b.pixels()) {
        if pm[0] == 0 {
            continue;
        }
        let ea = pa[0] > 0;
        let eb = pb[0] > 0;
        if ea || eb {
            union += 1;
        }
        if ea && eb {
            intersection += 1;
        }
    }
    if union == 0 { 1.0 } else { intersection as f64 / union as f64 }
}

/// Count of newly-present (`created`) and newly-absent (`closed`) edge
/// pixels among structural-mask pixels between a baseline and candidate edge
/// map (spec §4.C.4, "masked edge drift").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeDrift {
    /// Structural-mask pixels with no baseline edge but a candidate edge.
    pub created: u64,
    /// Structural-mask pixels with a baseline edge but no candidate edge.
    pub closed: u64,
}

/// Compute [`EdgeDrift`] restricted to pixels where `mask` is set.
#[must_use]
pub fn masked_edge_drift(
    mask: &image::GrayImage,
    baseline_edges: &image::GrayImage,
    candidate_edges: &image::GrayImage,
) -> EdgeDrift {
    debug_assert_eq!(mask.dimensions(), baseline_edges.dimensions());
    debug_assert_eq!(baseline_edges.dimensions(), candidate_edges.dimensions());
    let mut drift = EdgeDrift::default();
    for ((pm, pb), pc) in mask.pixels().zip(baseline_edges.pixels()).zip(candidate_edges.pixels()) {
        if pm[0] == 0 {
            continue;
        }
        let base_edge = pb[0] > 0;
        let candidate_edge = pc[0] > 0;
        if !base_edge && candidate_edge {
            drift.created += 1;
        }
        if base_edge && !candidate_edge {
            drift.closed += 1;
        }
    }
    drift
}

/// Mean luminance of an image on a `[0, 255]` scale.
#[must_use]
pub fn mean_luminance(img: &DynamicImage) -> f64 {
    let gray = to_grayscale(img);
    let count = gray.pixels().len() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = gray.pixels().map(|p| u64::from(p[0])).sum();
    sum as f64 / count as f64
}

/// One window-sized region found by [`detect_windows`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedWindow {
    /// Pixel area of the region.
    pub area: u32,
    /// Bounding-box width / height.
    pub aspect_ratio: f64,
}

/// Detect bright, window-sized rectangular regions (spec §4.C.Windows):
/// grayscale → percentile-threshold to binary → one pass of majority
/// smoothing → 4-connectivity flood fill → discard regions outside
/// `[2%, 40%]` of image area or aspect ratio outside `[0.25, 6.0]` → sort by
/// area, keep the top 6.
#[must_use]
pub fn detect_windows(img: &DynamicImage, percentile: f64) -> Vec<DetectedWindow> {
    let gray = to_grayscale(img);
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let threshold = percentile_threshold(&gray, percentile);
    let mut binary = vec![false; (w * h) as usize];
    for (i, p) in gray.pixels().enumerate() {
        binary[i] = u32::from(p[0]) >= threshold;
    }
    majority_smooth(&mut binary, w, h);

    let image_area = f64::from(w) * f64::from(h);
    let mut windows: Vec<DetectedWindow> = flood_fill_regions(&binary, w, h)
        .into_iter()
        .filter_map(|region| {
            let area_fraction = f64::from(region.area) / image_area;
            if !(0.02..=0.40).contains(&area_fraction) {
                return None;
            }
            let aspect_ratio = f64::from(region.bbox_w) / f64::from(region.bbox_h.max(1));
            if !(0.25..=6.0).contains(&aspect_ratio) {
                return None;
            }
            Some(DetectedWindow { area: region.area, aspect_ratio })
        })
        .collect();

    windows.sort_by(|a, b| b.area.cmp(&a.area));
    windows.truncate(6);
    windows
}

fn percentile_threshold(gray: &image::GrayImage, percentile: f64) -> u32 {
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    let total: u32 = hist.iter().sum();
    if total == 0 {
        return 255;
    }
    let target = ((f64::from(total) * percentile.clamp(0.0, 1.0)).round() as u32).min(total - 1);
    let mut cumulative = 0u32;
    for (level, count) in hist.iter().enumerate() {
        cumulative += count;
        if cumulative > target {
            return level as u32;
        }
    }
    255
}

/// One pass of majority smoothing: each pixel becomes the majority value of
/// its 3x3 neighborhood (edges use whatever neighbors exist).
fn majority_smooth(binary: &mut [bool], w: u32, h: u32) {
    let original = binary.to_vec();
    let idx = |x: i64, y: i64| -> usize { (y as u32 * w + x as u32) as usize };
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut on = 0u32;
            let mut total = 0u32;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    total += 1;
                    if original[idx(nx, ny)] {
                        on += 1;
                    }
                }
            }
            binary[idx(x, y)] = on * 2 >= total;
        }
    }
}

struct Region {
    area: u32,
    bbox_w: u32,
    bbox_h: u32,
}

/// 4-connectivity flood fill over a binary raster, returning each connected
/// "on" region's area and bounding-box dimensions.
fn flood_fill_regions(binary: &[bool], w: u32, h: u32) -> Vec<Region> {
    let mut visited = vec![false; binary.len()];
    let idx = |x: u32, y: u32| -> usize { (y * w + x) as usize };
    let mut regions = Vec::new();

    for start_y in 0..h {
        for start_x in 0..w {
            let start = idx(start_x, start_y);
            if visited[start] || !binary[start] {
                continue;
            }
            let mut stack = vec![(start_x, start_y)];
            visited[start] = true;
            let (mut min_x, mut max_x, mut min_y, mut max_y) = (start_x, start_x, start_y, start_y);
            let mut area = 0u32;

            while let Some((x, y)) = stack.pop() {
                area += 1;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);

                let neighbors = [
                    (x.checked_sub(1), Some(y)),
                    (Some(x + 1).filter(|&v| v < w), Some(y)),
                    (Some(x), y.checked_sub(1)),
                    (Some(x), Some(y + 1).filter(|&v| v < h)),
                ];
                for (nx, ny) in neighbors {
                    let (Some(nx), Some(ny)) = (nx, ny) else { continue };
                    let n = idx(nx, ny);
                    if !visited[n] && binary[n] {
                        visited[n] = true;
                        stack.push((nx, ny));
                    }
                }
            }

            regions.push(Region { area, bbox_w: max_x - min_x + 1, bbox_h: max_y - min_y + 1 });
        }
    }

    regions
}

/// Green-band ratio of the central horizontal band of an image, used by the
/// exterior-only landcover delta validator (spec §4.C.6): HSV hue in the
/// green band, with a brightness floor to exclude near-black pixels from
/// the denominator.
#[must_use]
pub fn landcover_ratio(img: &DynamicImage) -> f64 {
    const BRIGHTNESS_FLOOR: f64 = 0.08;
    const GREEN_HUE_RANGE: std::ops::RangeInclusive<f64> = 70.0..=170.0;
    const MIN_SATURATION: f64 = 0.15;

    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let band_top = h / 3;
    let band_bottom = (2 * h / 3).max(band_top + 1);

    let mut green = 0u64;
    let mut sampled = 0u64;
    for y in band_top..band_bottom.min(h) {
        for x in 0..w {
            let p = rgb.get_pixel(x, y);
            let (hue, saturation, value) = rgb_to_hsv(p[0], p[1], p[2]);
            if value < BRIGHTNESS_FLOOR {
                continue;
            }
            sampled += 1;
            if GREEN_HUE_RANGE.contains(&hue) && saturation >= MIN_SATURATION {
                green += 1;
            }
        }
    }
    if sampled == 0 { 0.0 } else { green as f64 / sampled as f64 }
}

/// Convert 8-bit RGB to `(hue_degrees, saturation, value)`, each of
/// saturation/value in `[0, 1]` and hue in `[0, 360)`.
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let (r, g, b) = (f64::from(r) / 255.0, f64::from(g) / 255.0, f64::from(b) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};

    fn solid(w: u32, h: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([value, value, value])))
    }

    #[test]
    fn encode_decode_roundtrip_preserves_dimensions() {
        let img = solid(4, 4, 128);
        let bytes = encode_png(&img).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (4, 4));
    }

    #[test]
    fn resize_to_match_noop_when_same_size() {
        let a = solid(8, 8, 10);
        let b = solid(8, 8, 200);
        let DimensionCheck::Reconciled(resized) = resize_to_match(&a, &b) else {
            panic!("expected reconciled");
        };
        assert_eq!(resized.dimensions(), (8, 8));
    }

    #[test]
    fn resize_to_match_reconciles_same_aspect_ratio() {
        let a = solid(4, 4, 10);
        let b = solid(8, 8, 10);
        let DimensionCheck::Reconciled(resized) = resize_to_match(&a, &b) else {
            panic!("expected reconciled");
        };
        assert_eq!(resized.dimensions(), (8, 8));
    }

    #[test]
    fn resize_to_match_flags_aspect_mismatch_as_fatal() {
        let a = solid(4, 8, 10);
        let b = solid(8, 8, 10);
        match resize_to_match(&a, &b) {
            DimensionCheck::AspectMismatch { delta } => assert!(delta > ASPECT_RATIO_TOLERANCE),
            DimensionCheck::Reconciled(_) => panic!("expected aspect mismatch"),
        }
    }

    #[test]
    fn structural_mask_of_flat_image_has_no_edges() {
        let img = solid(16, 16, 100);
        let mask = structural_mask(&img);
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn masked_edge_iou_ignores_pixels_outside_mask() {
        let mask = GrayImage::from_pixel(2, 2, Luma([0]));
        let mut a = GrayImage::from_pixel(2, 2, Luma([0]));
        let mut b = GrayImage::from_pixel(2, 2, Luma([0]));
        a.put_pixel(0, 0, Luma([255]));
        b.put_pixel(1, 1, Luma([255]));
        assert_eq!(masked_edge_iou(&mask, &a, &b), 1.0);
    }

    #[test]
    fn masked_edge_drift_counts_created_and_closed() {
        let mut mask = GrayImage::from_pixel(2, 2, Luma([0]));
        mask.put_pixel(0, 0, Luma([255]));
        mask.put_pixel(1, 1, Luma([255]));
        let mut baseline = GrayImage::from_pixel(2, 2, Luma([0]));
        baseline.put_pixel(0, 0, Luma([255]));
        let mut candidate = GrayImage::from_pixel(2, 2, Luma([0]));
        candidate.put_pixel(1, 1, Luma([255]));
        let drift = masked_edge_drift(&mask, &baseline, &candidate);
        assert_eq!(drift.created, 1);
        assert_eq!(drift.closed, 1);
    }

    #[test]
    fn mean_luminance_of_solid_image_matches_value() {
        let img = solid(4, 4, 120);
        assert!((mean_luminance(&img) - 120.0).abs() < 0.01);
    }

    #[test]
    fn detect_windows_finds_bright_rectangle_on_dark_background() {
        let mut img = RgbImage::from_pixel(40, 40, image::Rgb([10, 10, 10]));
        for y in 10..30 {
            for x in 10..25 {
                img.put_pixel(x, y, image::Rgb([240, 240, 240]));
            }
        }
        let windows = detect_windows(&DynamicImage::ImageRgb8(img), 0.9);
        assert!(!windows.is_empty(), "expected at least one detected window");
    }

    #[test]
    fn landcover_ratio_of_green_band_is_high() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([40, 160, 40])));
        assert!(landcover_ratio(&img) > 0.5);
    }

    #[test]
    fn landcover_ratio_of_gray_band_is_low() {
        let img = solid(8, 8, 128);
        assert!(landcover_ratio(&img) < 0.1);
    }

    #[test]
    fn edge_iou_identical_empty_maps_is_one() {
        let a = GrayImage::from_pixel(4, 4, Luma([0]));
        let b = GrayImage::from_pixel(4, 4, Luma([0]));
        assert_eq!(edge_iou(&a, &b), 1.0);
    }

    #[test]
    fn edge_iou_disjoint_maps_is_zero() {
        let mut a = GrayImage::from_pixel(2, 2, Luma([0]));
        let mut b = GrayImage::from_pixel(2, 2, Luma([0]));
        a.put_pixel(0, 0, Luma([255]));
        b.put_pixel(1, 1, Luma([255]));
        assert_eq!(edge_iou(&a, &b), 0.0);
    }

    #[test]
    fn histogram_delta_identical_images_is_zero() {
        let img = solid(4, 4, 100);
        let h = luminance_histogram(&img);
        assert_eq!(histogram_delta(&h, &h), 0.0);
    }

    #[test]
    fn histogram_delta_bounded_by_one() {
        let black = luminance_histogram(&solid(4, 4, 0));
        let white = luminance_histogram(&solid(4, 4, 255));
        let delta = histogram_delta(&black, &white);
        assert!(delta > 0.9 && delta <= 1.0);
    }

    #[test]
    fn mean_gradient_magnitude_of_flat_image_is_low() {
        let img = solid(16, 16, 50);
        assert!(mean_gradient_magnitude(&img) < 1.0);
    }
}
