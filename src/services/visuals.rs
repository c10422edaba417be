//! Visual-aid composition for the preview tools.
//!
//! Produces the images the model "sees": normalized coordinate grids, anchor
//! point markers, and labeled side-by-side monitor pairs. All drawing happens
//! on padded canvases so overlays and labels never cover frame content.

use ab_glyph::{FontVec, PxScale};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut};
use serde::{Deserialize, Serialize};

use crate::models::timeline::{Interpolation, SequenceProperties, TimelineClip};

pub const PADDING: u32 = 40;
pub const HEADER_HEIGHT: u32 = 50;
const FONT_SIZE_LARGE: f32 = 24.0;
const FONT_SIZE_SMALL: f32 = 14.0;

const COLOR_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const COLOR_TEXT_HEADER: Rgb<u8> = Rgb([255, 255, 255]);
const COLOR_TEXT_LABEL: Rgb<u8> = Rgb([204, 204, 204]);
const COLOR_GRID_MAJOR: Rgb<u8> = Rgb([85, 85, 85]);
const COLOR_GRID_MINOR: Rgb<u8> = Rgb([51, 51, 51]);
const COLOR_ANCHOR: Rgb<u8> = Rgb([255, 0, 255]);

/// Visual aids the preview tools can composite over frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overlay {
    CoordinateGrid,
    AnchorPoint,
}

/// Loads a usable TrueType font from well-known system locations.
///
/// Returns `None` when no font is available; text drawing is then skipped
/// rather than failing the whole visualization.
pub fn load_font() -> Option<FontVec> {
    const CANDIDATES: [&str; 6] = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "/System/Library/Fonts/Helvetica.ttc",
        "C:/Windows/Fonts/arial.ttf",
    ];
    for candidate in CANDIDATES {
        if let Ok(bytes) = std::fs::read(candidate) {
            if let Ok(font) = FontVec::try_from_vec(bytes) {
                return Some(font);
            }
        }
    }
    tracing::debug!(event = "font_unavailable", "No system font found; labels disabled");
    None
}

fn draw_label(img: &mut RgbImage, font: Option<&FontVec>, x: i32, y: i32, size: f32, color: Rgb<u8>, text: &str) {
    if let Some(font) = font {
        draw_text_mut(img, color, x, y, PxScale::from(size), font, text);
    }
}

/// Resizes a frame to the given dimensions (Lanczos).
pub fn resize_frame(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.width() == width && img.height() == height {
        img.clone()
    } else {
        imageops::resize(img, width, height, imageops::FilterType::Lanczos3)
    }
}

/// The interpolated normalized position of a clip at a clip-relative time,
/// honoring the same linear / ease / hold semantics as the renderer.
pub fn interpolated_position(clip: &TimelineClip, relative_sec: f64) -> (f64, f64) {
    const DEFAULT: (f64, f64) = (0.5, 0.5);

    let mut keyframes: Vec<(f64, (f64, f64), Interpolation)> = clip
        .transformations
        .iter()
        .filter_map(|kf| kf.position.map(|p| (kf.time_sec, p, kf.interpolation)))
        .collect();
    keyframes.sort_by(|a, b| a.0.total_cmp(&b.0));

    let Some(first) = keyframes.first() else {
        return DEFAULT;
    };
    if relative_sec <= first.0 {
        return first.1;
    }
    let last = keyframes.last().expect("non-empty");
    if relative_sec >= last.0 {
        return last.1;
    }

    for pair in keyframes.windows(2) {
        let (prev_t, prev_pos, prev_interp) = pair[0];
        let (next_t, next_pos, _) = pair[1];
        if relative_sec >= prev_t && relative_sec < next_t {
            if prev_interp == Interpolation::Hold || next_t - prev_t < 0.001 {
                return prev_pos;
            }
            let mut progress = (relative_sec - prev_t) / (next_t - prev_t);
            if prev_interp == Interpolation::EasyEase {
                progress = progress * progress * (3.0 - 2.0 * progress);
            }
            return (
                prev_pos.0 + (next_pos.0 - prev_pos.0) * progress,
                prev_pos.1 + (next_pos.1 - prev_pos.1) * progress,
            );
        }
    }
    DEFAULT
}

/// Applies the requested overlays to a frame, returning a padded canvas.
///
/// With a clip and timeline time, the anchor marker follows the clip's
/// interpolated position; otherwise it marks the default frame center.
pub fn apply_overlays(
    image: &RgbImage,
    overlays: &[Overlay],
    clip: Option<&TimelineClip>,
    timeline_sec: Option<f64>,
) -> RgbImage {
    if overlays.is_empty() {
        return image.clone();
    }

    let font = load_font();
    let (width, height) = (image.width(), image.height());
    let mut canvas = RgbImage::from_pixel(width + PADDING * 2, height + PADDING * 2, COLOR_BACKGROUND);
    imageops::overlay(&mut canvas, image, PADDING as i64, PADDING as i64);

    if overlays.contains(&Overlay::CoordinateGrid) {
        draw_coordinate_grid(&mut canvas, font.as_ref(), width, height);
    }

    if overlays.contains(&Overlay::AnchorPoint) {
        let normalized = match (clip, timeline_sec) {
            (Some(clip), Some(t)) => interpolated_position(clip, t - clip.timeline_start_sec),
            _ => (0.5, 0.5),
        };
        let x = PADDING as f32 + normalized.0 as f32 * width as f32;
        let y = PADDING as f32 + normalized.1 as f32 * height as f32;
        draw_anchor_marker(&mut canvas, x, y);
    }

    canvas
}

fn draw_coordinate_grid(canvas: &mut RgbImage, font: Option<&FontVec>, width: u32, height: u32) {
    let pad = PADDING as f32;
    let (w, h) = (width as f32, height as f32);

    for i in 1..10 {
        let x = pad + w * i as f32 / 10.0;
        let y = pad + h * i as f32 / 10.0;
        draw_line_segment_mut(canvas, (x, pad), (x, pad + h), COLOR_GRID_MINOR);
        draw_line_segment_mut(canvas, (pad, y), (pad + w, y), COLOR_GRID_MINOR);
    }

    for tick in [0.0f32, 0.25, 0.5, 0.75, 1.0] {
        let x = pad + w * tick;
        let y = pad + h * tick;
        draw_line_segment_mut(canvas, (x, pad), (x, pad + h), COLOR_GRID_MAJOR);
        draw_line_segment_mut(canvas, (pad, y), (pad + w, y), COLOR_GRID_MAJOR);
        let label = format!("{tick:.2}");
        draw_label(
            canvas,
            font,
            (x - 12.0).max(0.0) as i32,
            (pad - 18.0) as i32,
            FONT_SIZE_SMALL,
            COLOR_TEXT_LABEL,
            &label,
        );
        draw_label(
            canvas,
            font,
            2,
            (y - 7.0) as i32,
            FONT_SIZE_SMALL,
            COLOR_TEXT_LABEL,
            &label,
        );
    }
}

fn draw_anchor_marker(canvas: &mut RgbImage, x: f32, y: f32) {
    const SIZE: f32 = 10.0;
    // Two-pixel-wide cross, bright magenta.
    for offset in [0.0f32, 1.0] {
        draw_line_segment_mut(
            canvas,
            (x - SIZE, y + offset),
            (x + SIZE, y + offset),
            COLOR_ANCHOR,
        );
        draw_line_segment_mut(
            canvas,
            (x + offset, y - SIZE),
            (x + offset, y + SIZE),
            COLOR_ANCHOR,
        );
    }
}

/// Places two labeled frames side by side on one canvas.
pub fn compose_side_by_side(
    left: &RgbImage,
    label_left: &str,
    right: &RgbImage,
    label_right: &str,
) -> RgbImage {
    let right = if right.dimensions() != left.dimensions() {
        resize_frame(right, left.width(), left.height())
    } else {
        right.clone()
    };

    let (width, height) = left.dimensions();
    let total_width = width * 2 + PADDING * 3;
    let total_height = height + HEADER_HEIGHT + PADDING;
    let mut canvas = RgbImage::from_pixel(total_width, total_height, COLOR_BACKGROUND);
    let font = load_font();

    imageops::overlay(&mut canvas, left, PADDING as i64, HEADER_HEIGHT as i64);
    imageops::overlay(
        &mut canvas,
        &right,
        (width + PADDING * 2) as i64,
        HEADER_HEIGHT as i64,
    );

    draw_label(
        &mut canvas,
        font.as_ref(),
        PADDING as i32,
        (PADDING / 2) as i32,
        FONT_SIZE_LARGE,
        COLOR_TEXT_HEADER,
        label_left,
    );
    draw_label(
        &mut canvas,
        font.as_ref(),
        (width + PADDING * 2) as i32,
        (PADDING / 2) as i32,
        FONT_SIZE_LARGE,
        COLOR_TEXT_HEADER,
        label_right,
    );

    canvas
}

/// Resizes `img` to fit within the target box, preserving aspect ratio and
/// letterboxing with the background color.
pub fn letterbox(img: &RgbImage, target_width: u32, target_height: u32) -> RgbImage {
    if target_width == 0 || target_height == 0 {
        return RgbImage::from_pixel(1, 1, COLOR_BACKGROUND);
    }
    let scale = f64::min(
        target_width as f64 / img.width() as f64,
        target_height as f64 / img.height() as f64,
    );
    let new_width = ((img.width() as f64 * scale) as u32).max(1);
    let new_height = ((img.height() as f64 * scale) as u32).max(1);
    let resized = imageops::resize(img, new_width, new_height, imageops::FilterType::Lanczos3);

    let mut canvas = RgbImage::from_pixel(target_width, target_height, COLOR_BACKGROUND);
    let x = (target_width - new_width) / 2;
    let y = (target_height - new_height) / 2;
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
    canvas
}

/// The sequence-sized frame the preview tools normalize everything to.
pub fn frame_size(sequence: SequenceProperties) -> (u32, u32) {
    (sequence.width, sequence.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timeline::{Keyframe, TrackType};
    use std::path::PathBuf;

    fn clip_with_position_keyframes(keyframes: Vec<Keyframe>) -> TimelineClip {
        TimelineClip {
            clip_id: "c".to_string(),
            source_path: PathBuf::from("/assets/a.mp4"),
            source_in_sec: 0.0,
            source_out_sec: 10.0,
            source_total_duration_sec: 10.0,
            timeline_start_sec: 0.0,
            duration_sec: 10.0,
            track_type: TrackType::Video,
            track_number: 1,
            description: None,
            source_frame_rate: 24.0,
            source_width: 1920,
            source_height: 1080,
            has_audio: false,
            transformations: keyframes,
        }
    }

    #[test]
    fn test_interpolated_position_defaults_to_center() {
        let clip = clip_with_position_keyframes(vec![]);
        assert_eq!(interpolated_position(&clip, 1.0), (0.5, 0.5));
    }

    #[test]
    fn test_interpolated_position_linear() {
        let clip = clip_with_position_keyframes(vec![
            Keyframe {
                position: Some((0.0, 0.0)),
                interpolation: Interpolation::Linear,
                ..Keyframe::at(0.0)
            },
            Keyframe {
                position: Some((1.0, 1.0)),
                interpolation: Interpolation::Linear,
                ..Keyframe::at(2.0)
            },
        ]);
        let (x, y) = interpolated_position(&clip, 1.0);
        assert!((x - 0.5).abs() < 1e-9 && (y - 0.5).abs() < 1e-9);
        // Endpoints hold outside the keyframed range.
        assert_eq!(interpolated_position(&clip, -1.0), (0.0, 0.0));
        assert_eq!(interpolated_position(&clip, 5.0), (1.0, 1.0));
    }

    #[test]
    fn test_interpolated_position_hold() {
        let clip = clip_with_position_keyframes(vec![
            Keyframe {
                position: Some((0.1, 0.1)),
                interpolation: Interpolation::Hold,
                ..Keyframe::at(0.0)
            },
            Keyframe {
                position: Some((0.9, 0.9)),
                interpolation: Interpolation::Hold,
                ..Keyframe::at(2.0)
            },
        ]);
        assert_eq!(interpolated_position(&clip, 1.999), (0.1, 0.1));
        assert_eq!(interpolated_position(&clip, 2.0), (0.9, 0.9));
    }

    #[test]
    fn test_ease_is_midpoint_symmetric() {
        let clip = clip_with_position_keyframes(vec![
            Keyframe {
                position: Some((0.0, 0.0)),
                interpolation: Interpolation::EasyEase,
                ..Keyframe::at(0.0)
            },
            Keyframe {
                position: Some((1.0, 0.0)),
                interpolation: Interpolation::EasyEase,
                ..Keyframe::at(2.0)
            },
        ]);
        let (x, _) = interpolated_position(&clip, 1.0);
        assert!((x - 0.5).abs() < 1e-9);
        // Ease starts slower than linear.
        let (early, _) = interpolated_position(&clip, 0.4);
        assert!(early < 0.2);
    }

    #[test]
    fn test_apply_overlays_pads_canvas() {
        let frame = RgbImage::from_pixel(100, 50, Rgb([10, 10, 10]));
        let out = apply_overlays(&frame, &[Overlay::CoordinateGrid], None, None);
        assert_eq!(out.dimensions(), (100 + PADDING * 2, 50 + PADDING * 2));

        let untouched = apply_overlays(&frame, &[], None, None);
        assert_eq!(untouched.dimensions(), (100, 50));
    }

    #[test]
    fn test_compose_side_by_side_dimensions() {
        let left = RgbImage::from_pixel(100, 50, Rgb([10, 10, 10]));
        let right = RgbImage::from_pixel(200, 100, Rgb([20, 20, 20]));
        let out = compose_side_by_side(&left, "Source", &right, "Program");
        assert_eq!(
            out.dimensions(),
            (100 * 2 + PADDING * 3, 50 + HEADER_HEIGHT + PADDING)
        );
    }

    #[test]
    fn test_letterbox_preserves_aspect() {
        let img = RgbImage::from_pixel(200, 100, Rgb([200, 0, 0]));
        let boxed = letterbox(&img, 100, 100);
        assert_eq!(boxed.dimensions(), (100, 100));
        // Content is centered: top rows are background, middle rows are red.
        assert_eq!(boxed.get_pixel(50, 2), &Rgb([0, 0, 0]));
        assert_eq!(boxed.get_pixel(50, 50), &Rgb([200, 0, 0]));
    }
}
