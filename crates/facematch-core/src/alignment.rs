//! Face crop with a fixed border margin.
//!
//! The detected box is grown by a margin expressed in *output* pixels, so a
//! margin of 20 on a 160×160 crop leaves roughly 10 pixels of context on each
//! side regardless of how large the face is in the source frame.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Integer crop rectangle in source pixels, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Expand `face` by `margin` output pixels for a `size`×`size` crop.
///
/// Returns `None` when the clamped rectangle is empty (box entirely outside
/// the frame).
pub fn margin_rect(
    face: &BoundingBox,
    frame_width: u32,
    frame_height: u32,
    size: u32,
    margin: u32,
) -> Option<CropRect> {
    // size == margin would divide by zero; treat as no margin.
    let denom = size.saturating_sub(margin).max(1) as f32;
    let margin = if size > margin { margin as f32 } else { 0.0 };

    let pad_x = margin * face.width / denom / 2.0;
    let pad_y = margin * face.height / denom / 2.0;

    let x1 = (face.x - pad_x).max(0.0) as u32;
    let y1 = (face.y - pad_y).max(0.0) as u32;
    let x2 = ((face.x + face.width + pad_x).min(frame_width as f32)).max(0.0) as u32;
    let y2 = ((face.y + face.height + pad_y).min(frame_height as f32)).max(0.0) as u32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(CropRect {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

/// Crop `face` (plus margin) out of `frame` and resize to `size`×`size`.
pub fn crop_face(frame: &RgbImage, face: &BoundingBox, size: u32, margin: u32) -> Option<RgbImage> {
    let rect = margin_rect(face, frame.width(), frame.height(), size, margin)?;
    let crop = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
    Some(imageops::resize(&crop, size, size, FilterType::Triangle))
}
