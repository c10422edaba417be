//! Sampling fully composited frames from the timeline.
//!
//! Every sampled frame goes through the same MLT rendering path as the final
//! export, so what the model sees is exactly what would be rendered. The
//! side-by-side mode pairs each timeline frame with the corresponding source
//! frame of the topmost visible clip (or a caller-chosen clip).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::timeline::{SequenceProperties, Timeline, TrackType};
use crate::services::visuals::{self, Overlay};
use crate::services::renderer;
use crate::session::{MultimodalFile, MultimodalKind};
use crate::tools::{parse_args, sample_midpoints, worker_pool_size, Tool, ToolContext, ToolOutcome};
use crate::utils::ffmpeg::extract_frame;
use crate::utils::time::{hms_to_seconds, seconds_to_hms, TIME_PATTERN};

fn default_num_frames() -> usize {
    8
}

#[derive(Debug, Default, Deserialize)]
struct SideBySideConfig {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    source_clip_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViewTimelineArgs {
    #[serde(default = "default_num_frames")]
    num_frames: usize,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    overlays: Vec<Overlay>,
    #[serde(default)]
    side_by_side: SideBySideConfig,
}

pub struct ViewTimelineTool;

#[async_trait]
impl Tool for ViewTimelineTool {
    fn name(&self) -> &'static str {
        "view_timeline"
    }

    fn description(&self) -> &'static str {
        "Extracts and displays fully rendered frames from the timeline to 'see' the current \
         edit. Supports visual overlays (like a coordinate grid) and a side-by-side view that \
         compares the composed timeline against the original source media. Use this to verify \
         transformations, check layering, and plan the next edit."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "num_frames": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "The total number of frames to extract for viewing from the timeline."
                },
                "start_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "The timestamp on the main timeline to start extracting frames from. If omitted, starts from the beginning of the timeline."
                },
                "end_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "The timestamp on the main timeline to stop extracting frames at. If omitted, uses the full timeline duration."
                },
                "overlays": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["coordinate_grid", "anchor_point"] },
                    "description": "Visual aids rendered on top of the frames in both the 'Timeline View' and the 'Source View' (if side_by_side is enabled). 'anchor_point' shows the current clip's interpolated anchor position."
                },
                "side_by_side": {
                    "type": "object",
                    "description": "When enabled, shows the 'Source View' on the left and the 'Timeline View' on the right, with overlays applied to both.",
                    "properties": {
                        "enabled": { "type": "boolean" },
                        "source_clip_id": {
                            "type": "string",
                            "description": "Optional. The clip_id of the source asset to display in the 'Source View'. If omitted, the topmost visible clip at each frame's timestamp is used."
                        }
                    }
                }
            }
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: ViewTimelineArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };
        if args.num_frames == 0 {
            return ToolOutcome::Continue("Error: num_frames must be at least 1.".into());
        }

        let has_video = ctx
            .state
            .timeline
            .clips()
            .iter()
            .any(|c| c.track_type == TrackType::Video);
        if !has_video {
            return ToolOutcome::Continue(
                "Error: The timeline contains no video clips. Cannot view the timeline.".into(),
            );
        }

        if let Some(clip_id) = &args.side_by_side.source_clip_id {
            if !ctx.state.timeline.clip_id_exists(clip_id) {
                return ToolOutcome::Continue(format!(
                    "Error: Clip with ID '{clip_id}' not found on the timeline."
                ));
            }
        }

        let start_sec = match &args.start_time {
            Some(t) => match hms_to_seconds(t) {
                Ok(t) => t,
                Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
            },
            None => 0.0,
        };
        let end_sec = match &args.end_time {
            Some(t) => match hms_to_seconds(t) {
                Ok(t) => t,
                Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
            },
            None => ctx.state.timeline.duration(),
        };
        if start_sec >= end_sec {
            return ToolOutcome::Continue("Error: The start_time must be before the end_time.".into());
        }

        let timestamps = sample_midpoints(start_sec, end_sec, args.num_frames);
        let sequence = ctx.state.timeline.sequence_properties();
        let timeline = Arc::new(ctx.state.timeline.clone());

        tracing::info!(
            event = "view_timeline_start",
            frames = timestamps.len(),
            "Rendering timeline frames in parallel"
        );

        let semaphore = Arc::new(Semaphore::new(worker_pool_size()));
        let overlays = Arc::new(args.overlays.clone());
        let side_enabled = args.side_by_side.enabled;
        let source_clip_id = Arc::new(args.side_by_side.source_clip_id.clone());
        let mut join_set: JoinSet<(usize, anyhow::Result<(String, PathBuf)>)> = JoinSet::new();

        for (index, &timestamp) in timestamps.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let overlays = Arc::clone(&overlays);
            let source_clip_id = Arc::clone(&source_clip_id);
            let timeline = Arc::clone(&timeline);
            let provider = ctx.provider.clone();
            let scratch = ctx.scratch_dir.to_path_buf();

            join_set.spawn(async move {
                let result = async {
                    let _permit = semaphore.acquire_owned().await?;
                    let processed = tokio::task::spawn_blocking(move || {
                        process_timeline_frame(
                            &timeline,
                            sequence,
                            timestamp,
                            &scratch,
                            &overlays,
                            side_enabled,
                            source_clip_id.as_deref(),
                        )
                    })
                    .await??;
                    let uploaded = provider
                        .upload_file(&processed, "vision")
                        .await
                        .map_err(|e| anyhow::anyhow!("upload failed: {e}"))?;
                    Ok::<_, anyhow::Error>((uploaded.id, processed))
                }
                .await;
                (index, result)
            });
        }

        let mut results: Vec<(usize, String, PathBuf)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, Ok((file_id, path)))) => results.push((index, file_id, path)),
                Ok((index, Err(e))) => {
                    tracing::warn!(
                        event = "view_timeline_frame_failed",
                        index = index,
                        error = %e,
                        "Failed to render timeline frame"
                    );
                }
                Err(e) => {
                    tracing::warn!(event = "view_timeline_task_panicked", error = %e, "Worker task failed");
                }
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        if results.is_empty() {
            return ToolOutcome::Continue(format!(
                "Error: Failed to extract any frames from the timeline between {start_sec:.2}s and {end_sec:.2}s."
            ));
        }

        let rendered = results.len();
        for (_, file_id, local_path) in results {
            ctx.state.queue_multimodal(MultimodalFile {
                file_id,
                local_path,
                kind: MultimodalKind::Image,
            });
        }

        ToolOutcome::Continue(format!(
            "Successfully rendered and processed {rendered} frames sampled between {} and {} of the timeline. The agent can now view them.",
            seconds_to_hms(start_sec),
            seconds_to_hms(end_sec),
        ))
    }
}

/// Blocking worker: render one composited frame, optionally pair it with the
/// matching source frame, apply overlays, and save the result.
fn process_timeline_frame(
    timeline: &Timeline,
    sequence: SequenceProperties,
    timeline_sec: f64,
    scratch_dir: &std::path::Path,
    overlays: &[Overlay],
    side_by_side: bool,
    source_clip_id: Option<&str>,
) -> anyhow::Result<PathBuf> {
    let frame_path = scratch_dir.join(format!("timeline_{timeline_sec:.3}.jpg"));
    renderer::render_preview_frame(timeline, sequence, timeline_sec, &frame_path, scratch_dir)?;
    let timeline_image = image::open(&frame_path)?.to_rgb8();

    let context_clip = match source_clip_id {
        Some(clip_id) => timeline.find_clip_by_id(clip_id),
        None => timeline.topmost_clip_at(timeline_sec),
    };

    let final_image = if side_by_side {
        let source_image = context_clip.and_then(|clip| {
            let source_time = clip.source_in_sec + (timeline_sec - clip.timeline_start_sec);
            let source_path =
                scratch_dir.join(format!("source_{}_{timeline_sec:.3}.png", clip.clip_id));
            match extract_frame(&clip.source_path, source_time, &source_path)
                .and_then(|_| Ok(image::open(&source_path)?.to_rgb8()))
            {
                Ok(img) => Some(visuals::resize_frame(
                    &img,
                    timeline_image.width(),
                    timeline_image.height(),
                )),
                Err(e) => {
                    tracing::error!(
                        event = "source_frame_extraction_failed",
                        clip_id = %clip.clip_id,
                        error = %e,
                        "Could not extract source frame; using placeholder"
                    );
                    None
                }
            }
        });
        // Black placeholder when no clip is active or extraction failed.
        let source_image = source_image.unwrap_or_else(|| {
            image::RgbImage::new(timeline_image.width(), timeline_image.height())
        });

        let timeline_overlaid =
            visuals::apply_overlays(&timeline_image, overlays, context_clip, Some(timeline_sec));
        let source_overlaid =
            visuals::apply_overlays(&source_image, overlays, context_clip, Some(timeline_sec));
        visuals::compose_side_by_side(
            &source_overlaid,
            "Source View",
            &timeline_overlaid,
            "Timeline View",
        )
    } else {
        visuals::apply_overlays(&timeline_image, overlays, context_clip, Some(timeline_sec))
    };

    let out_path = scratch_dir.join(format!("final_view_{timeline_sec:.3}.png"));
    final_image.save(&out_path)?;
    Ok(out_path)
}
