//! Keyframed affine transformations.
//!
//! Upserts keyframes on clips with a 1 ms identity tolerance. A property set
//! to JSON `null` is removed from the keyframe; a property left out is
//! untouched. A non-base keyframe that ends up with no properties is
//! deleted. After a successful application the tool renders a side-by-side
//! "Source Monitor vs Program Monitor" image for every affected clip so the
//! model can visually verify the change.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::models::timeline::{Interpolation, Keyframe, SequenceProperties, TimelineClip};
use crate::services::{renderer, visuals};
use crate::session::{MultimodalFile, MultimodalKind};
use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};
use crate::utils::ffmpeg::extract_frame;
use crate::utils::time::{hms_to_seconds, TIME_PATTERN};

/// Keyframe identity tolerance.
const UPSERT_TOLERANCE: f64 = 0.001;

/// Distinguishes "field absent" (outer `None`) from "field explicitly null"
/// (`Some(None)`), which means *remove this property*.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
struct TransformProperties {
    #[serde(default, deserialize_with = "double_option")]
    position: Option<Option<(f64, f64)>>,
    #[serde(default, deserialize_with = "double_option")]
    scale: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    rotation: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    opacity: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    anchor_point: Option<Option<(f64, f64)>>,
}

#[derive(Debug, Deserialize)]
struct Transformation {
    clip_id: String,
    properties: TransformProperties,
    #[serde(default)]
    at_time: Option<String>,
    #[serde(default)]
    interpolation: Interpolation,
}

#[derive(Debug, Deserialize)]
struct TransformArgs {
    transformations: Vec<Transformation>,
}

pub struct TransformTool;

#[async_trait]
impl Tool for TransformTool {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn description(&self) -> &'static str {
        "Applies one or more spatial transformations to one or more clips. This is the primary \
         tool for all layout, animation, and keyframing tasks. All coordinates for 'position' \
         and 'anchor_point' are normalized, where (0.0, 0.0) is the top-left corner and \
         (1.0, 1.0) is the bottom-right. To update an existing keyframe, call this tool again \
         with the same at_time. To delete a keyframe for a specific property, set that \
         property's value to null at the precise at_time. For accurate updates or deletions, \
         first use get_timeline_summary to find the exact timestamp of the keyframe you wish \
         to modify."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "transformations": {
                    "type": "array",
                    "minItems": 1,
                    "description": "A list of one or more transformation objects to apply.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "clip_id": {
                                "type": "string",
                                "description": "The unique identifier of the clip to transform."
                            },
                            "properties": {
                                "type": "object",
                                "description": "The properties to set for this keyframe. Set a property to null to remove it from an existing keyframe.",
                                "properties": {
                                    "position": {
                                        "type": ["array", "null"],
                                        "items": { "type": "number" },
                                        "minItems": 2,
                                        "maxItems": 2,
                                        "description": "The [x, y] position of the clip's anchor point in normalized coordinates. (0.0, 0.0) is the top-left corner of the sequence, (1.0, 1.0) is the bottom-right."
                                    },
                                    "scale": {
                                        "type": ["number", "null"],
                                        "description": "The scale of the clip as a multiplier. 1.0 is original size, 0.5 is half size, 2.0 is double size."
                                    },
                                    "rotation": {
                                        "type": ["number", "null"],
                                        "description": "The rotation of the clip in degrees. Positive values rotate clockwise."
                                    },
                                    "opacity": {
                                        "type": ["number", "null"],
                                        "description": "The opacity of the clip as a percentage, from 0 (transparent) to 100 (opaque)."
                                    },
                                    "anchor_point": {
                                        "type": ["array", "null"],
                                        "items": { "type": "number" },
                                        "minItems": 2,
                                        "maxItems": 2,
                                        "description": "The [x, y] anchor point within the clip itself in normalized coordinates, relative to its top-left corner. Defaults to the clip's center (0.5, 0.5)."
                                    }
                                }
                            },
                            "at_time": {
                                "type": "string",
                                "pattern": TIME_PATTERN,
                                "description": "The timeline timestamp for this keyframe. Omit for a static transform applied at the start of the clip."
                            },
                            "interpolation": {
                                "type": "string",
                                "enum": ["linear", "easy_ease", "hold"],
                                "description": "The interpolation method for this keyframe."
                            }
                        },
                        "required": ["clip_id", "properties"]
                    }
                }
            },
            "required": ["transformations"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: TransformArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };
        if args.transformations.is_empty() {
            return ToolOutcome::Continue(
                "Error: 'transformations' must contain at least one entry.".into(),
            );
        }

        let sequence = ctx.state.timeline.sequence_properties();

        // Phase 1: resolve targets and keyframe times without mutating.
        struct Planned<'a> {
            transformation: &'a Transformation,
            relative_sec: f64,
            timeline_sec: f64,
        }
        let mut planned: Vec<Planned<'_>> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for (i, transformation) in args.transformations.iter().enumerate() {
            let Some(clip) = ctx.state.timeline.find_clip_by_id(&transformation.clip_id) else {
                errors.push(format!(
                    "Transformation #{}: Clip with ID '{}' not found.",
                    i + 1,
                    transformation.clip_id
                ));
                continue;
            };

            let (timeline_sec, relative_sec) = match &transformation.at_time {
                Some(at_time) => match hms_to_seconds(at_time) {
                    Ok(t) => (t, t - clip.timeline_start_sec),
                    Err(e) => {
                        errors.push(format!("Transformation #{}: {e}", i + 1));
                        continue;
                    }
                },
                None => (clip.timeline_start_sec, 0.0),
            };

            if !(-UPSERT_TOLERANCE..=clip.duration_sec + UPSERT_TOLERANCE).contains(&relative_sec) {
                errors.push(format!(
                    "Transformation #{}: Keyframe time for clip '{}' ({relative_sec:.3}s) is outside its duration on the timeline (0.0s to {:.3}s).",
                    i + 1,
                    transformation.clip_id,
                    clip.duration_sec,
                ));
                continue;
            }

            planned.push(Planned {
                transformation,
                relative_sec: relative_sec.clamp(0.0, clip.duration_sec),
                timeline_sec,
            });
        }

        if !errors.is_empty() {
            return ToolOutcome::Continue(format!(
                "Operation failed with errors:\n- {}",
                errors.join("\n- ")
            ));
        }

        // Phase 2: commit all upserts.
        let mut modified: Vec<String> = Vec::new();
        let mut previews: Vec<(String, f64)> = Vec::new();
        for item in &planned {
            let clip = ctx
                .state
                .timeline
                .find_clip_by_id_mut(&item.transformation.clip_id)
                .expect("validated above");
            upsert_keyframe(
                clip,
                item.relative_sec,
                &item.transformation.properties,
                item.transformation.interpolation,
            );
            if !modified.contains(&item.transformation.clip_id) {
                modified.push(item.transformation.clip_id.clone());
            }
            previews.push((item.transformation.clip_id.clone(), item.timeline_sec));
        }
        modified.sort();

        // Phase 3: verification previews; failures are logged, not fatal.
        let mut preview_count = 0usize;
        for (clip_id, timeline_sec) in previews {
            let clip = ctx
                .state
                .timeline
                .find_clip_by_id(&clip_id)
                .cloned()
                .expect("clip still present");
            match generate_monitor_preview(ctx, &clip, timeline_sec, sequence).await {
                Ok(()) => preview_count += 1,
                Err(e) => {
                    tracing::error!(
                        event = "transform_preview_failed",
                        clip_id = %clip_id,
                        error = %e,
                        "Failed to generate transform preview"
                    );
                }
            }
        }

        let mut confirmation = format!(
            "Successfully applied {} transformations to {} clips: {}.",
            args.transformations.len(),
            modified.len(),
            modified.join(", ")
        );
        if preview_count > 0 {
            confirmation.push_str(&format!(
                " Generated {preview_count} side-by-side preview frames. On the left is the \
                 'Source Monitor' showing the original frame, and on the right is the 'Program \
                 Monitor' showing the fully transformed and composited result."
            ));
        }
        ToolOutcome::Continue(confirmation)
    }
}

/// Applies one property set to the keyframe at `relative_sec`, creating,
/// updating, or removing it as needed.
fn upsert_keyframe(
    clip: &mut TimelineClip,
    relative_sec: f64,
    properties: &TransformProperties,
    interpolation: Interpolation,
) {
    let existing = clip
        .transformations
        .iter_mut()
        .find(|kf| (kf.time_sec - relative_sec).abs() < UPSERT_TOLERANCE);

    match existing {
        Some(keyframe) => {
            if let Some(position) = properties.position {
                keyframe.position = position;
            }
            if let Some(scale) = properties.scale {
                keyframe.scale = scale;
            }
            if let Some(rotation) = properties.rotation {
                keyframe.rotation = rotation;
            }
            if let Some(opacity) = properties.opacity {
                keyframe.opacity = opacity;
            }
            if let Some(anchor_point) = properties.anchor_point {
                keyframe.anchor_point = anchor_point;
            }
            keyframe.interpolation = interpolation;

            let is_base = keyframe.time_sec.abs() < UPSERT_TOLERANCE;
            let empty = !keyframe.has_properties();
            if empty && !is_base {
                let time_sec = keyframe.time_sec;
                clip.transformations
                    .retain(|kf| (kf.time_sec - time_sec).abs() >= UPSERT_TOLERANCE);
            }
        }
        None => {
            let keyframe = Keyframe {
                time_sec: relative_sec,
                position: properties.position.flatten(),
                scale: properties.scale.flatten(),
                rotation: properties.rotation.flatten(),
                opacity: properties.opacity.flatten(),
                anchor_point: properties.anchor_point.flatten(),
                interpolation,
            };
            if keyframe.has_properties() {
                clip.transformations.push(keyframe);
            }
        }
    }

    clip.transformations
        .sort_by(|a, b| a.time_sec.total_cmp(&b.time_sec));
}

/// Renders the composited program frame and the raw source frame at the
/// affected time, composes them side by side, and queues the upload.
async fn generate_monitor_preview(
    ctx: &mut ToolContext<'_>,
    clip: &TimelineClip,
    timeline_sec: f64,
    sequence: SequenceProperties,
) -> anyhow::Result<()> {
    let program_path = ctx
        .scratch_dir
        .join(format!("program_{}_{timeline_sec:.3}.jpg", clip.clip_id));
    renderer::render_preview_frame(
        &ctx.state.timeline,
        sequence,
        timeline_sec,
        &program_path,
        ctx.scratch_dir,
    )?;

    let source_time = clip.source_in_sec + (timeline_sec - clip.timeline_start_sec);
    let source_path: PathBuf = ctx
        .scratch_dir
        .join(format!("source_{}_{timeline_sec:.3}.png", clip.clip_id));
    extract_frame(&clip.source_path, source_time, &source_path)?;

    let program = image::open(&program_path)?.to_rgb8();
    let source = image::open(&source_path)?.to_rgb8();
    let program = visuals::resize_frame(&program, sequence.width, sequence.height);
    let source = visuals::resize_frame(&source, sequence.width, sequence.height);

    let composite =
        visuals::compose_side_by_side(&source, "Source Monitor", &program, "Program Monitor");
    let composite_path = ctx
        .scratch_dir
        .join(format!("preview_{}_{timeline_sec:.3}_composite.png", clip.clip_id));
    composite.save(&composite_path)?;

    let uploaded = ctx
        .provider
        .upload_file(&composite_path, "vision")
        .await
        .map_err(|e| anyhow::anyhow!("upload failed: {e}"))?;
    ctx.state.queue_multimodal(MultimodalFile {
        file_id: uploaded.id,
        local_path: composite_path,
        kind: MultimodalKind::Image,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timeline::TrackType;

    fn clip() -> TimelineClip {
        TimelineClip {
            clip_id: "y".to_string(),
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
            transformations: Vec::new(),
        }
    }

    fn set_properties(position: Option<(f64, f64)>, scale: Option<f64>) -> TransformProperties {
        TransformProperties {
            position: position.map(Some),
            scale: scale.map(Some),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_then_remove_single_property() {
        let mut clip = clip();
        upsert_keyframe(
            &mut clip,
            0.0,
            &set_properties(Some((0.5, 0.5)), Some(1.0)),
            Interpolation::EasyEase,
        );
        assert_eq!(clip.transformations.len(), 1);

        // Explicit null removes only the scale; position survives.
        let remove_scale = TransformProperties {
            scale: Some(None),
            ..Default::default()
        };
        upsert_keyframe(&mut clip, 0.0, &remove_scale, Interpolation::EasyEase);
        assert_eq!(clip.transformations.len(), 1);
        let keyframe = &clip.transformations[0];
        assert_eq!(keyframe.position, Some((0.5, 0.5)));
        assert_eq!(keyframe.scale, None);
    }

    #[test]
    fn test_emptied_non_base_keyframe_is_removed() {
        let mut clip = clip();
        upsert_keyframe(
            &mut clip,
            2.0,
            &set_properties(None, Some(2.0)),
            Interpolation::Linear,
        );
        assert_eq!(clip.transformations.len(), 1);

        let remove_scale = TransformProperties {
            scale: Some(None),
            ..Default::default()
        };
        upsert_keyframe(&mut clip, 2.0, &remove_scale, Interpolation::Linear);
        assert!(clip.transformations.is_empty());
    }

    #[test]
    fn test_emptied_base_keyframe_is_kept() {
        let mut clip = clip();
        upsert_keyframe(
            &mut clip,
            0.0,
            &set_properties(None, Some(2.0)),
            Interpolation::Linear,
        );
        let remove_scale = TransformProperties {
            scale: Some(None),
            ..Default::default()
        };
        upsert_keyframe(&mut clip, 0.0, &remove_scale, Interpolation::Linear);
        assert_eq!(clip.transformations.len(), 1);
        assert!(!clip.transformations[0].has_properties());
    }

    #[test]
    fn test_upsert_within_tolerance_updates_in_place() {
        let mut clip = clip();
        upsert_keyframe(
            &mut clip,
            1.0,
            &set_properties(None, Some(1.5)),
            Interpolation::Linear,
        );
        upsert_keyframe(
            &mut clip,
            1.0005,
            &set_properties(Some((0.2, 0.2)), None),
            Interpolation::Hold,
        );
        assert_eq!(clip.transformations.len(), 1);
        let keyframe = &clip.transformations[0];
        assert_eq!(keyframe.scale, Some(1.5));
        assert_eq!(keyframe.position, Some((0.2, 0.2)));
        assert_eq!(keyframe.interpolation, Interpolation::Hold);
    }

    #[test]
    fn test_keyframes_stay_sorted() {
        let mut clip = clip();
        upsert_keyframe(&mut clip, 5.0, &set_properties(None, Some(2.0)), Interpolation::Linear);
        upsert_keyframe(&mut clip, 1.0, &set_properties(None, Some(0.5)), Interpolation::Linear);
        upsert_keyframe(&mut clip, 3.0, &set_properties(None, Some(1.0)), Interpolation::Linear);
        let times: Vec<f64> = clip.transformations.iter().map(|kf| kf.time_sec).collect();
        assert_eq!(times, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_double_option_distinguishes_null_from_absent() {
        let parsed: TransformProperties =
            serde_json::from_value(json!({ "scale": null, "rotation": 45.0 })).unwrap();
        assert_eq!(parsed.scale, Some(None));
        assert_eq!(parsed.rotation, Some(Some(45.0)));
        assert_eq!(parsed.position, None);
    }
}
