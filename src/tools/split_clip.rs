//! Splitting a clip at a precise timeline point.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::timeline::Keyframe;
use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};
use crate::utils::time::{hms_to_seconds, seconds_to_hms, TIME_PATTERN};

/// Tolerance for deciding whether a keyframe sits on the cut itself.
const KEYFRAME_TOLERANCE: f64 = 0.001;

#[derive(Debug, Deserialize)]
struct SplitClipArgs {
    clip_id: String,
    split_time: String,
}

pub struct SplitClipTool;

#[async_trait]
impl Tool for SplitClipTool {
    fn name(&self) -> &'static str {
        "split_clip"
    }

    fn description(&self) -> &'static str {
        "Splits a single clip on the timeline at a specific point in time. This removes the \
         original clip and replaces it with two new, smaller clips (e.g., 'my_clip' becomes \
         'my_clip_p1' and 'my_clip_p2'). Use this to create a new cut point on the timeline \
         before an 'insert' operation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "clip_id": {
                    "type": "string",
                    "description": "The unique identifier of the single clip to be split. This ID must exactly match a clip_id from the get_timeline_summary tool."
                },
                "split_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "The timeline timestamp where the cut should be made. This time must be strictly within the target clip's duration on the timeline. Format: HH:MM:SS.mmm"
                }
            },
            "required": ["clip_id", "split_time"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: SplitClipArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        let split_time_sec = match hms_to_seconds(&args.split_time) {
            Ok(t) => t,
            Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
        };

        let Some(original) = ctx.state.timeline.find_clip_by_id(&args.clip_id).cloned() else {
            return ToolOutcome::Continue(format!(
                "Error: Clip with ID '{}' not found on the timeline.",
                args.clip_id
            ));
        };

        let clip_start = original.timeline_start_sec;
        let clip_end = original.end_sec();
        if !(split_time_sec > clip_start && split_time_sec < clip_end) {
            return ToolOutcome::Continue(format!(
                "Error: The split time {} is not within the timeline range of clip '{}' (from {} to {}). Please provide a time that is strictly between the clip's start and end.",
                seconds_to_hms(split_time_sec),
                args.clip_id,
                seconds_to_hms(clip_start),
                seconds_to_hms(clip_end),
            ));
        }

        let p1_id = format!("{}_p1", original.clip_id);
        let p2_id = format!("{}_p2", original.clip_id);
        if ctx.state.timeline.clip_id_exists(&p1_id) || ctx.state.timeline.clip_id_exists(&p2_id) {
            return ToolOutcome::Continue(format!(
                "Error: The generated clip IDs '{p1_id}' or '{p2_id}' already exist. Please rename the original clip ('{}') before splitting.",
                args.clip_id
            ));
        }

        let p1_duration = split_time_sec - clip_start;
        let p2_duration = clip_end - split_time_sec;

        let mut p1 = original.clone();
        p1.clip_id = p1_id.clone();
        p1.duration_sec = p1_duration;
        p1.source_out_sec = original.source_in_sec + p1_duration;
        p1.description = Some(format!("Part 1 of split from '{}'", original.clip_id));
        p1.transformations = split_keyframes_first(&original.transformations, p1_duration);

        let mut p2 = original.clone();
        p2.clip_id = p2_id.clone();
        p2.timeline_start_sec = split_time_sec;
        p2.duration_sec = p2_duration;
        p2.source_in_sec = p1.source_out_sec;
        p2.description = Some(format!("Part 2 of split from '{}'", original.clip_id));
        p2.transformations = split_keyframes_second(&original.transformations, p1_duration);

        ctx.state.timeline.delete_clip(&args.clip_id);
        ctx.state.timeline.add_clip(p1);
        ctx.state.timeline.add_clip(p2);

        tracing::info!(
            event = "clip_split",
            clip_id = %args.clip_id,
            split_time_sec = split_time_sec,
            "Split clip into two parts"
        );
        ToolOutcome::Continue(format!(
            "Success: Split clip '{}' at {}. The original clip has been replaced by two new clips: '{p1_id}' and '{p2_id}'.",
            args.clip_id,
            seconds_to_hms(split_time_sec),
        ))
    }
}

/// Keyframes for the first half: everything at or before the cut, times
/// unchanged.
fn split_keyframes_first(keyframes: &[Keyframe], cut_sec: f64) -> Vec<Keyframe> {
    keyframes
        .iter()
        .filter(|kf| kf.time_sec <= cut_sec + KEYFRAME_TOLERANCE)
        .cloned()
        .collect()
}

/// Keyframes for the second half: everything at or after the cut, re-based
/// to the new clip's start.
fn split_keyframes_second(keyframes: &[Keyframe], cut_sec: f64) -> Vec<Keyframe> {
    keyframes
        .iter()
        .filter(|kf| kf.time_sec >= cut_sec - KEYFRAME_TOLERANCE)
        .map(|kf| {
            let mut shifted = kf.clone();
            shifted.time_sec = (kf.time_sec - cut_sec).max(0.0);
            shifted
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timeline::Interpolation;

    fn kf(time_sec: f64, scale: f64) -> Keyframe {
        Keyframe {
            scale: Some(scale),
            interpolation: Interpolation::Linear,
            ..Keyframe::at(time_sec)
        }
    }

    #[test]
    fn test_keyframe_distribution_across_halves() {
        let keyframes = vec![kf(0.0, 1.0), kf(2.0, 2.0), kf(5.0, 3.0)];

        let first = split_keyframes_first(&keyframes, 2.0);
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].time_sec, 2.0);

        let second = split_keyframes_second(&keyframes, 2.0);
        assert_eq!(second.len(), 2);
        // The cut keyframe becomes the base of the second half.
        assert_eq!(second[0].time_sec, 0.0);
        assert_eq!(second[0].scale, Some(2.0));
        assert_eq!(second[1].time_sec, 3.0);
        assert_eq!(second[1].scale, Some(3.0));
    }

    #[test]
    fn test_keyframes_outside_a_half_are_dropped() {
        let keyframes = vec![kf(4.0, 1.5)];
        assert!(split_keyframes_first(&keyframes, 2.0).is_empty());
        let second = split_keyframes_second(&keyframes, 2.0);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].time_sec, 2.0);
    }
}
