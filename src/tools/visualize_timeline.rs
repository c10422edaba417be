//! Single-image timeline visualization: ruler, stacked track lanes, clip
//! thumbnails, and a legend.
//!
//! Lane stacking mirrors the compositing order: video lanes above audio, and
//! higher-numbered video lanes above lower-numbered ones.

use ab_glyph::{FontVec, PxScale};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::timeline::{TimelineClip, TrackType};
use crate::services::visuals::letterbox;
use crate::session::{MultimodalFile, MultimodalKind};
use crate::tools::{parse_args, worker_pool_size, Tool, ToolContext, ToolOutcome};
use crate::utils::ffmpeg::{extract_frame, is_image_source};
use crate::utils::time::{hms_to_seconds, TIME_PATTERN};

const CANVAS_WIDTH: u32 = 1920;
const RULER_HEIGHT: u32 = 40;
const TRACK_HEIGHT: u32 = 120;
const TRACK_LABEL_WIDTH: u32 = 60;
const LEGEND_LINE_HEIGHT: u32 = 30;
const MIN_VIEW_DURATION: f64 = 1.0;

const COLOR_BG: Rgb<u8> = Rgb([20, 20, 20]);
const COLOR_RULER_BG: Rgb<u8> = Rgb([30, 30, 30]);
const COLOR_TRACK_BG: Rgb<u8> = Rgb([40, 40, 40]);
const COLOR_TEXT: Rgb<u8> = Rgb([220, 220, 220]);
const COLOR_VIDEO_CLIP: Rgb<u8> = Rgb([80, 80, 120]);
const COLOR_AUDIO_CLIP: Rgb<u8> = Rgb([80, 120, 80]);
const COLOR_ERROR: Rgb<u8> = Rgb([220, 40, 40]);
const COLOR_LABEL_BG: Rgb<u8> = Rgb([255, 255, 255]);
const COLOR_LABEL_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Debug, Deserialize)]
struct VisualizeTimelineArgs {
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

pub struct VisualizeTimelineTool;

#[async_trait]
impl Tool for VisualizeTimelineTool {
    fn name(&self) -> &'static str {
        "visualize_timeline"
    }

    fn description(&self) -> &'static str {
        "Generates a single image of the timeline, showing all video and audio tracks. Clips \
         are displayed with thumbnails and are labeled with numbers that correspond to a \
         legend at the bottom of the image. Use this tool to get a high-level visual \
         understanding of the edit's structure, check for gaps, or identify specific clips by \
         sight."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "The timeline timestamp to start the visualization from (e.g., '00:01:00.000'). If omitted, starts from the beginning (0s)."
                },
                "end_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "The timeline timestamp to end the visualization at. If omitted, goes to the end of the entire timeline."
                }
            }
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: VisualizeTimelineArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        if ctx.state.timeline.is_empty() {
            return ToolOutcome::Continue(
                "Error: The timeline is empty. Cannot visualize an empty timeline.".into(),
            );
        }

        let start_sec = match &args.start_time {
            Some(t) => match hms_to_seconds(t) {
                Ok(t) => Some(t),
                Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
            },
            None => None,
        };
        let end_sec = match &args.end_time {
            Some(t) => match hms_to_seconds(t) {
                Ok(t) => Some(t),
                Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
            },
            None => None,
        };

        let visualizer = TimelineVisualizer::plan(ctx, start_sec, end_sec);
        let thumbnails = visualizer.extract_thumbnails(ctx).await;
        let canvas = visualizer.draw(&thumbnails);

        let out_path = ctx.scratch_dir.join("timeline_visualization.jpg");
        if let Err(e) = save_jpeg(&canvas, &out_path) {
            return ToolOutcome::Continue(format!(
                "Error: Failed to generate timeline visualization: {e}"
            ));
        }

        match ctx.provider.upload_file(&out_path, "vision").await {
            Ok(uploaded) => {
                ctx.state.queue_multimodal(MultimodalFile {
                    file_id: uploaded.id,
                    local_path: out_path,
                    kind: MultimodalKind::Image,
                });
                ToolOutcome::Continue(
                    "Successfully generated a visual representation of the timeline. The \
                     following image shows the current edit."
                        .into(),
                )
            }
            Err(e) => ToolOutcome::Continue(format!(
                "Error: Failed to upload the timeline visualization: {e}"
            )),
        }
    }
}

fn save_jpeg(canvas: &RgbImage, path: &std::path::Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, 85);
    canvas.write_with_encoder(encoder)?;
    Ok(())
}

/// One clip prepared for drawing.
struct PreparedClip {
    clip: TimelineClip,
    label: usize,
    x: f64,
    width: f64,
    thumbnail_count: usize,
}

struct ThumbnailJob {
    clip_index: usize,
    thumb_index: usize,
    source_path: PathBuf,
    source_time: f64,
    is_image: bool,
}

struct TimelineVisualizer {
    view_start_sec: f64,
    view_duration: f64,
    pixels_per_second: f64,
    prepared: Vec<PreparedClip>,
    jobs: Vec<ThumbnailJob>,
    lanes: Vec<(TrackType, u32)>,
}

impl TimelineVisualizer {
    /// Computes the view window, the visible clips with their layout, and
    /// the thumbnail extraction jobs.
    fn plan(ctx: &ToolContext<'_>, start_sec: Option<f64>, end_sec: Option<f64>) -> Self {
        let timeline = &ctx.state.timeline;
        let mut view_start = start_sec.unwrap_or(0.0);
        let mut view_end = end_sec.unwrap_or_else(|| timeline.duration());

        if view_end <= view_start {
            view_end = view_start + MIN_VIEW_DURATION;
        }
        let duration = view_end - view_start;
        if duration < MIN_VIEW_DURATION {
            let center = view_start + duration / 2.0;
            view_start = (center - MIN_VIEW_DURATION / 2.0).max(0.0);
            view_end = view_start + MIN_VIEW_DURATION;
        }
        let view_duration = view_end - view_start;
        let render_width = (CANVAS_WIDTH - TRACK_LABEL_WIDTH) as f64;
        let pixels_per_second = render_width / view_duration;

        let mut visible: Vec<TimelineClip> = timeline
            .clips()
            .iter()
            .filter(|c| c.timeline_start_sec.max(view_start) < c.end_sec().min(view_end))
            .cloned()
            .collect();
        visible.sort_by(|a, b| {
            a.timeline_start_sec
                .total_cmp(&b.timeline_start_sec)
                .then((a.track_type, std::cmp::Reverse(a.track_number)).cmp(&(
                    b.track_type,
                    std::cmp::Reverse(b.track_number),
                )))
        });

        let mut prepared = Vec::new();
        let mut jobs = Vec::new();
        for (clip_index, clip) in visible.into_iter().enumerate() {
            let visible_start = clip.timeline_start_sec.max(view_start);
            let visible_end = clip.end_sec().min(view_end);
            let x = TRACK_LABEL_WIDTH as f64 + (visible_start - view_start) * pixels_per_second;
            let width = (visible_end - visible_start) * pixels_per_second;

            let mut thumbnail_count = 0;
            if clip.track_type == TrackType::Video && width >= 1.0 {
                thumbnail_count =
                    ((width / (TRACK_HEIGHT as f64 * 1.1)).floor() as usize).max(1);
                let is_image = is_image_source(&clip.source_path);
                let offset_into_clip = visible_start - clip.timeline_start_sec;
                let visible_source_start = clip.source_in_sec + offset_into_clip;
                let visible_span = visible_end - visible_start;

                for thumb_index in 0..thumbnail_count {
                    let source_time = if is_image {
                        0.0
                    } else {
                        let segment = visible_span / thumbnail_count as f64;
                        visible_source_start + thumb_index as f64 * segment + segment / 2.0
                    };
                    jobs.push(ThumbnailJob {
                        clip_index,
                        thumb_index,
                        source_path: clip.source_path.clone(),
                        source_time,
                        is_image,
                    });
                }
            }

            prepared.push(PreparedClip {
                label: clip_index + 1,
                x,
                width,
                thumbnail_count,
                clip,
            });
        }

        // Lane stacking: video above audio, higher numbers above lower.
        let mut lanes: Vec<(TrackType, u32)> = prepared
            .iter()
            .map(|p| (p.clip.track_type, p.clip.track_number))
            .collect();
        lanes.sort_by_key(|&(track_type, number)| (track_type, std::cmp::Reverse(number)));
        lanes.dedup();

        Self {
            view_start_sec: view_start,
            view_duration,
            pixels_per_second,
            prepared,
            jobs,
            lanes,
        }
    }

    /// Runs all thumbnail extractions through the bounded worker pool.
    /// Failed extractions map to `None` and are drawn as error markers.
    async fn extract_thumbnails(
        &self,
        ctx: &ToolContext<'_>,
    ) -> HashMap<(usize, usize), Option<PathBuf>> {
        let semaphore = Arc::new(Semaphore::new(worker_pool_size()));
        let mut join_set: JoinSet<((usize, usize), Option<PathBuf>)> = JoinSet::new();

        for job in &self.jobs {
            let key = (job.clip_index, job.thumb_index);
            if job.is_image {
                join_set.spawn({
                    let path = job.source_path.clone();
                    async move { (key, Some(path)) }
                });
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let source = job.source_path.clone();
            let time = job.source_time;
            let out = ctx
                .scratch_dir
                .join(format!("thumb_{}_{}.png", job.clip_index, job.thumb_index));
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (key, None);
                };
                let result = tokio::task::spawn_blocking(move || {
                    extract_frame(&source, time, &out).map(|_| out)
                })
                .await;
                match result {
                    Ok(Ok(path)) => (key, Some(path)),
                    Ok(Err(e)) => {
                        tracing::warn!(event = "thumbnail_failed", error = %e, "Thumbnail extraction failed");
                        (key, None)
                    }
                    Err(e) => {
                        tracing::warn!(event = "thumbnail_task_panicked", error = %e, "Thumbnail task failed");
                        (key, None)
                    }
                }
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            if let Ok((key, path)) = joined {
                results.insert(key, path);
            }
        }
        results
    }

    fn draw(&self, thumbnails: &HashMap<(usize, usize), Option<PathBuf>>) -> RgbImage {
        let font = crate::services::visuals::load_font();
        let legend_height = LEGEND_LINE_HEIGHT * (self.prepared.len() as u32 + 1);
        let canvas_height =
            RULER_HEIGHT + self.lanes.len() as u32 * TRACK_HEIGHT + legend_height;
        let mut canvas = RgbImage::from_pixel(CANVAS_WIDTH, canvas_height, COLOR_BG);

        self.draw_ruler(&mut canvas, font.as_ref());

        let mut lane_tops: HashMap<(TrackType, u32), u32> = HashMap::new();
        let mut y = RULER_HEIGHT;
        for &(track_type, number) in &self.lanes {
            lane_tops.insert((track_type, number), y);
            self.draw_lane(&mut canvas, font.as_ref(), y, &format!("{}{number}", track_type.letter()));
            y += TRACK_HEIGHT;
        }

        for (clip_index, prep) in self.prepared.iter().enumerate() {
            let lane_y = lane_tops[&(prep.clip.track_type, prep.clip.track_number)];
            self.draw_clip(&mut canvas, font.as_ref(), clip_index, prep, lane_y, thumbnails);
        }

        self.draw_legend(&mut canvas, font.as_ref(), y);
        canvas
    }

    fn draw_ruler(&self, canvas: &mut RgbImage, font: Option<&FontVec>) {
        draw_filled_rect_mut(
            canvas,
            Rect::at(0, 0).of_size(CANVAS_WIDTH, RULER_HEIGHT),
            COLOR_RULER_BG,
        );
        let render_width = (CANVAS_WIDTH - TRACK_LABEL_WIDTH) as f64;
        for i in 0..=10 {
            let x = TRACK_LABEL_WIDTH as f64 + i as f64 / 10.0 * render_width;
            let time_sec = self.view_start_sec + i as f64 / 10.0 * self.view_duration;
            draw_line_segment_mut(
                canvas,
                (x as f32, (RULER_HEIGHT - 10) as f32),
                (x as f32, RULER_HEIGHT as f32),
                COLOR_TEXT,
            );
            if i < 10 {
                if let Some(font) = font {
                    let label = format!("{:02}:{:04.1}", (time_sec / 60.0) as u32, time_sec % 60.0);
                    draw_text_mut(
                        canvas,
                        COLOR_TEXT,
                        x as i32 + 3,
                        (RULER_HEIGHT - 25) as i32,
                        PxScale::from(14.0),
                        font,
                        &label,
                    );
                }
            }
        }
    }

    fn draw_lane(&self, canvas: &mut RgbImage, font: Option<&FontVec>, y: u32, label: &str) {
        draw_filled_rect_mut(
            canvas,
            Rect::at(0, y as i32).of_size(CANVAS_WIDTH, TRACK_HEIGHT),
            COLOR_TRACK_BG,
        );
        if let Some(font) = font {
            draw_text_mut(
                canvas,
                COLOR_TEXT,
                10,
                (y + TRACK_HEIGHT / 2 - 12) as i32,
                PxScale::from(24.0),
                font,
                label,
            );
        }
    }

    fn draw_clip(
        &self,
        canvas: &mut RgbImage,
        font: Option<&FontVec>,
        clip_index: usize,
        prep: &PreparedClip,
        lane_y: u32,
        thumbnails: &HashMap<(usize, usize), Option<PathBuf>>,
    ) {
        if prep.width < 1.0 {
            return;
        }
        let x = prep.x as i32;
        let width = prep.width as u32;

        let base_color = if prep.clip.track_type == TrackType::Video {
            COLOR_VIDEO_CLIP
        } else {
            COLOR_AUDIO_CLIP
        };
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, lane_y as i32).of_size(width.max(1), TRACK_HEIGHT),
            base_color,
        );

        if prep.clip.track_type == TrackType::Video && prep.thumbnail_count > 0 {
            let thumb_width = prep.width / prep.thumbnail_count as f64;
            for thumb_index in 0..prep.thumbnail_count {
                let thumb_x = prep.x + thumb_index as f64 * thumb_width;
                match thumbnails.get(&(clip_index, thumb_index)) {
                    Some(Some(path)) => match image::open(path) {
                        Ok(img) => {
                            let boxed =
                                letterbox(&img.to_rgb8(), thumb_width as u32, TRACK_HEIGHT);
                            image::imageops::overlay(
                                canvas,
                                &boxed,
                                thumb_x as i64,
                                lane_y as i64,
                            );
                        }
                        Err(_) => {
                            draw_error_cross(canvas, thumb_x, lane_y, thumb_width);
                        }
                    },
                    _ => draw_error_cross(canvas, thumb_x, lane_y, thumb_width),
                }
            }
        } else if prep.clip.track_type == TrackType::Audio {
            if let Some(font) = font {
                draw_text_mut(
                    canvas,
                    COLOR_TEXT,
                    (prep.x + prep.width / 2.0 - 25.0) as i32,
                    (lane_y + TRACK_HEIGHT / 2 - 10) as i32,
                    PxScale::from(20.0),
                    font,
                    "AUDIO",
                );
            }
        }

        // Truncated clip id along the top edge, then the numbered badge.
        if let Some(font) = font {
            let label = truncate_to_width(&prep.clip.clip_id, prep.width - 8.0, 14.0);
            if !label.is_empty() {
                draw_text_mut(
                    canvas,
                    COLOR_TEXT,
                    x + 4,
                    lane_y as i32 + 4,
                    PxScale::from(14.0),
                    font,
                    &label,
                );
            }
        }

        let center_x = (prep.x + prep.width / 2.0) as i32;
        let center_y = (lane_y + TRACK_HEIGHT / 2) as i32;
        draw_filled_circle_mut(canvas, (center_x, center_y), 12, COLOR_LABEL_BG);
        if let Some(font) = font {
            let text = prep.label.to_string();
            draw_text_mut(
                canvas,
                COLOR_LABEL_TEXT,
                center_x - 5 * text.len() as i32,
                center_y - 9,
                PxScale::from(18.0),
                font,
                &text,
            );
        }
    }

    fn draw_legend(&self, canvas: &mut RgbImage, font: Option<&FontVec>, y_start: u32) {
        let Some(font) = font else { return };
        draw_text_mut(
            canvas,
            COLOR_TEXT,
            10,
            y_start as i32 + 5,
            PxScale::from(24.0),
            font,
            "Legend:",
        );
        let mut y = y_start + LEGEND_LINE_HEIGHT + 5;
        for prep in &self.prepared {
            draw_filled_circle_mut(canvas, (20, y as i32), 10, COLOR_LABEL_BG);
            let label = prep.label.to_string();
            draw_text_mut(
                canvas,
                COLOR_LABEL_TEXT,
                20 - 4 * label.len() as i32,
                y as i32 - 7,
                PxScale::from(14.0),
                font,
                &label,
            );
            let source = prep
                .clip
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            draw_text_mut(
                canvas,
                COLOR_TEXT,
                45,
                y as i32 - 8,
                PxScale::from(20.0),
                font,
                &format!("{} (Source: {source})", prep.clip.clip_id),
            );
            y += LEGEND_LINE_HEIGHT;
        }
    }
}

fn draw_error_cross(canvas: &mut RgbImage, x: f64, y: u32, width: f64) {
    let (x0, y0) = ((x + 5.0) as f32, (y + 5) as f32);
    let (x1, y1) = ((x + width - 5.0) as f32, (y + TRACK_HEIGHT - 5) as f32);
    draw_line_segment_mut(canvas, (x0, y0), (x1, y1), COLOR_ERROR);
    draw_line_segment_mut(canvas, (x0, y1), (x1, y0), COLOR_ERROR);
}

/// Truncates a label to fit `max_width` pixels at the given font size,
/// appending an ellipsis when anything was cut.
fn truncate_to_width(label: &str, max_width: f64, font_size: f64) -> String {
    let char_width = font_size * 0.55;
    let max_chars = (max_width / char_width).floor() as usize;
    if label.chars().count() <= max_chars {
        return label.to_string();
    }
    if max_chars <= 1 {
        return String::new();
    }
    let truncated: String = label.chars().take(max_chars - 1).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width("intro", 200.0, 14.0), "intro");
        let truncated = truncate_to_width("a_very_long_clip_identifier", 60.0, 14.0);
        assert!(truncated.ends_with('…'));
        assert!(truncated.chars().count() <= 7);
        assert_eq!(truncate_to_width("abc", 5.0, 14.0), "");
    }
}
