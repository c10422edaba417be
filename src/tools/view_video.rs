//! Sampling frames from a source file so the model can "see" it.
//!
//! Frames are extracted, processed, and uploaded through a bounded worker
//! pool; results are re-ordered by sample index before they are queued, so
//! the model always receives frames in chronological order.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::services::visuals::{self, Overlay};
use crate::session::{MultimodalFile, MultimodalKind};
use crate::tools::{parse_args, sample_midpoints, worker_pool_size, Tool, ToolContext, ToolOutcome};
use crate::utils::ffmpeg::{extract_frame, probe_media_file};
use crate::utils::time::{hms_to_seconds, seconds_to_hms, TIME_PATTERN};

fn default_num_frames() -> usize {
    8
}

#[derive(Debug, Deserialize)]
struct ViewVideoArgs {
    source_filename: String,
    #[serde(default = "default_num_frames")]
    num_frames: usize,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    overlays: Vec<Overlay>,
    #[serde(default)]
    side_by_side: bool,
}

pub struct ViewVideoTool;

#[async_trait]
impl Tool for ViewVideoTool {
    fn name(&self) -> &'static str {
        "view_video"
    }

    fn description(&self) -> &'static str {
        "Extracts and displays frames from a single source video file. Can add visual overlays \
         like a coordinate grid or anchor point to aid in positioning, and can display a \
         side-by-side comparison of the frame with and without overlays. Use this to get a \
         visual overview, find specific scenes, or plan transformations. To view the composed \
         timeline, use 'view_timeline'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_filename": {
                    "type": "string",
                    "description": "The exact name of the video file from the user's media library to be viewed (e.g., 'interview.mp4')."
                },
                "num_frames": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "The total number of frames to extract for viewing. This controls the granularity of the preview."
                },
                "start_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "The timestamp in the source video to start extracting frames from. If omitted, starts from the beginning."
                },
                "end_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "The timestamp in the source video to stop extracting frames at. If omitted, uses the full video duration."
                },
                "overlays": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["coordinate_grid", "anchor_point"] },
                    "description": "Visual aids rendered on top of the frames. 'coordinate_grid' shows a faithful, normalized (0.0 to 1.0) grid. 'anchor_point' shows the default anchor point (0.5, 0.5)."
                },
                "side_by_side": {
                    "type": "boolean",
                    "description": "If true, generates a side-by-side image showing the original frame next to the frame with overlays applied."
                }
            },
            "required": ["source_filename"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: ViewVideoArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };
        if args.num_frames == 0 {
            return ToolOutcome::Continue("Error: num_frames must be at least 1.".into());
        }

        let full_path = ctx.state.resolve_asset(&args.source_filename);
        if !full_path.exists() {
            return ToolOutcome::Continue(format!(
                "Error: The source file '{}' does not exist in the assets directory.",
                args.source_filename
            ));
        }

        let media_info = probe_media_file(&full_path);
        if let Some(error) = &media_info.error {
            return ToolOutcome::Continue(format!(
                "Error probing '{}': {error}",
                args.source_filename
            ));
        }
        if !media_info.has_video {
            return ToolOutcome::Continue(format!(
                "Error: Source file '{}' does not contain a video stream.",
                args.source_filename
            ));
        }
        if media_info.duration_sec <= 0.0 {
            return ToolOutcome::Continue(format!(
                "Error: Could not determine a valid duration for '{}'.",
                args.source_filename
            ));
        }

        let start_sec = match &args.start_time {
            Some(t) => match hms_to_seconds(t) {
                Ok(t) => t,
                Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
            },
            None => 0.0,
        };
        let mut end_sec = match &args.end_time {
            Some(t) => match hms_to_seconds(t) {
                Ok(t) => t,
                Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
            },
            None => media_info.duration_sec,
        };
        if start_sec >= end_sec {
            return ToolOutcome::Continue("Error: The start_time must be before the end_time.".into());
        }
        end_sec = end_sec.min(media_info.duration_sec);

        let timestamps = sample_midpoints(start_sec, end_sec, args.num_frames);
        let sequence = ctx.state.timeline.sequence_properties();

        tracing::info!(
            event = "view_video_start",
            source = %args.source_filename,
            frames = timestamps.len(),
            "Extracting source frames in parallel"
        );

        let semaphore = Arc::new(Semaphore::new(worker_pool_size()));
        let overlays = Arc::new(args.overlays.clone());
        let mut join_set: JoinSet<(usize, anyhow::Result<(String, PathBuf)>)> = JoinSet::new();

        for (index, &timestamp) in timestamps.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let overlays = Arc::clone(&overlays);
            let provider = ctx.provider.clone();
            let source = full_path.clone();
            let scratch = ctx.scratch_dir.to_path_buf();
            let side_by_side = args.side_by_side;

            join_set.spawn(async move {
                let result = async {
                    let _permit = semaphore.acquire_owned().await?;
                    let processed = tokio::task::spawn_blocking(move || {
                        process_frame(
                            &source,
                            timestamp,
                            &scratch,
                            &overlays,
                            side_by_side,
                            sequence.width,
                            sequence.height,
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
                        event = "view_video_frame_failed",
                        index = index,
                        error = %e,
                        "Failed to process frame"
                    );
                }
                Err(e) => {
                    tracing::warn!(event = "view_video_task_panicked", error = %e, "Worker task failed");
                }
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        if results.is_empty() {
            return ToolOutcome::Continue(format!(
                "Error: Failed to extract or upload any frames from '{}'.",
                args.source_filename
            ));
        }

        let uploaded = results.len();
        for (_, file_id, local_path) in results {
            ctx.state.queue_multimodal(MultimodalFile {
                file_id,
                local_path,
                kind: MultimodalKind::Image,
            });
        }

        ToolOutcome::Continue(format!(
            "Successfully extracted and processed {uploaded} frames from '{}' between {} and {}. The agent can now view them.",
            args.source_filename,
            seconds_to_hms(start_sec),
            seconds_to_hms(end_sec),
        ))
    }
}

/// Blocking worker: extract one frame, normalize its size, apply overlays
/// (optionally side-by-side with the original), and save the result.
fn process_frame(
    source: &std::path::Path,
    timestamp_sec: f64,
    scratch_dir: &std::path::Path,
    overlays: &[Overlay],
    side_by_side: bool,
    width: u32,
    height: u32,
) -> anyhow::Result<PathBuf> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "frame".to_string());
    let raw_path = scratch_dir.join(format!("raw_{stem}_{timestamp_sec:.3}.png"));
    extract_frame(source, timestamp_sec, &raw_path)?;

    let raw = image::open(&raw_path)?.to_rgb8();
    let raw = visuals::resize_frame(&raw, width, height);

    let final_image = if side_by_side {
        let overlaid = visuals::apply_overlays(&raw, overlays, None, None);
        visuals::compose_side_by_side(&raw, "Source View", &overlaid, "Source View (with Overlays)")
    } else {
        visuals::apply_overlays(&raw, overlays, None, None)
    };

    let out_path = scratch_dir.join(format!("processed_{stem}_{timestamp_sec:.3}.png"));
    final_image.save(&out_path)?;
    Ok(out_path)
}
