//! Cell differencing engine.
//!
//! Decides whether a grid cell contains an item by comparing the cell's
//! bright-pixel ratio in the current screenshot against the same cell in the
//! empty-inventory reference. The heuristic assumes the empty cell is mostly
//! dark background; an item icon adds bright pixels. It is intentionally a
//! single threshold pass (no feature matching) since it runs once per cell
//! per macro invocation.

use image::RgbaImage;

use crate::config::MacroConfig;
use crate::grid::CellRect;

/// Tunable detection constants. The values are empirical; see config.
#[derive(Clone, Copy, Debug)]
pub struct DetectionThresholds {
    /// Luma above this counts as a bright pixel (0-255).
    pub brightness: u8,
    /// Minimum bright ratio in the current cell.
    pub occupied_ratio: f32,
    /// Minimum increase over the reference cell's bright ratio.
    pub occupied_delta: f32,
}

impl DetectionThresholds {
    pub fn from_config(config: &MacroConfig) -> Self {
        Self {
            brightness: config.brightness_threshold,
            occupied_ratio: config.occupied_ratio,
            occupied_delta: config.occupied_delta,
        }
    }
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self::from_config(&MacroConfig::default())
    }
}

/// Verdict for a single cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellVerdict {
    Occupied,
    Empty,
}

/// ITU-R BT.601 luma: Y = 0.299*R + 0.587*G + 0.114*B.
fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Fraction of pixels in `rect` whose luma exceeds `threshold`.
///
/// Returns `None` when the rectangle is empty or falls outside the image,
/// which callers treat as an analysis failure.
pub fn bright_ratio(img: &RgbaImage, rect: CellRect, threshold: u8) -> Option<f32> {
    if rect.width() == 0 || rect.height() == 0 {
        return None;
    }
    if rect.x1 > img.width() || rect.y1 > img.height() {
        return None;
    }

    let mut bright: u32 = 0;
    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            let px = img.get_pixel(x, y);
            if luma(px[0], px[1], px[2]) > threshold as f32 {
                bright += 1;
            }
        }
    }

    let total = rect.width() * rect.height();
    Some(bright as f32 / total as f32)
}

/// Compares one cell of the reference screenshot against the same cell of the
/// current screenshot.
///
/// Occupied iff the current cell's bright ratio exceeds `occupied_ratio` AND
/// exceeds the reference cell's ratio by more than `occupied_delta`.
///
/// Any failure to read either cell yields `Empty`: the engine never clicks a
/// cell it could not analyze. This asymmetry is deliberate.
pub fn classify(
    reference: &RgbaImage,
    current: &RgbaImage,
    rect: CellRect,
    thresholds: &DetectionThresholds,
) -> CellVerdict {
    let reference_ratio = match bright_ratio(reference, rect, thresholds.brightness) {
        Some(r) => r,
        None => return CellVerdict::Empty,
    };
    let current_ratio = match bright_ratio(current, rect, thresholds.brightness) {
        Some(r) => r,
        None => return CellVerdict::Empty,
    };

    let diff = current_ratio - reference_ratio;
    if current_ratio > thresholds.occupied_ratio && diff > thresholds.occupied_delta {
        CellVerdict::Occupied
    } else {
        CellVerdict::Empty
    }
}
