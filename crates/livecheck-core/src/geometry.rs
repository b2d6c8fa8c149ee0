//! Coordinate transforms between the encoded still and the preview surface.
//!
//! The scoring service reports face boxes in the pixel space of the still it
//! was sent. The preview is rendered from the same source frame but at a
//! different width and possibly mirrored, so every box must pass through
//! [`project_to_preview`] before it is drawn.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in still-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Scoring verdict attached to a face box for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    ProbableLive,
    ProbableSpoof,
}

impl Classification {
    /// Overlay stroke colour as RGB.
    pub fn color(self) -> [u8; 3] {
        match self {
            Classification::ProbableLive => [0, 200, 0],
            Classification::ProbableSpoof => [0, 0, 255],
        }
    }
}

/// A face box as returned by the scorer, tagged with its classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    #[serde(flatten)]
    pub bbox: BoundingBox,
    pub classification: Classification,
}

/// Integer rectangle in preview-surface pixels, `right`/`bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Scale `(src_width, src_height)` to `target_width`, preserving aspect ratio.
///
/// Returns `None` when the source has no dimensions yet (stream not playing).
pub fn fit_to_width(src_width: u32, src_height: u32, target_width: u32) -> Option<(u32, u32)> {
    if src_width == 0 || src_height == 0 || target_width == 0 {
        return None;
    }
    let ratio = src_height as f64 / src_width as f64;
    let height = (ratio * target_width as f64).round().max(1.0) as u32;
    Some((target_width, height))
}

/// Re-project a box from still coordinates into preview coordinates.
///
/// The scale factor is `preview_width / still_width`. When `mirrored` is set
/// the box is reflected about the preview's vertical centre line, matching
/// the horizontal flip applied to the preview frame itself.
pub fn project_to_preview(
    bbox: &BoundingBox,
    still_width: u32,
    preview_width: u32,
    mirrored: bool,
) -> PixelRect {
    let scale = if still_width == 0 {
        0.0
    } else {
        preview_width as f32 / still_width as f32
    };

    let mut left = bbox.left * scale;
    let mut right = bbox.right * scale;
    if mirrored {
        let w = preview_width as f32;
        (left, right) = (w - right, w - left);
    }

    PixelRect {
        left: left.round() as i32,
        top: (bbox.top * scale).round() as i32,
        right: right.round() as i32,
        bottom: (bbox.bottom * scale).round() as i32,
    }
}
