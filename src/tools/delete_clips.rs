//! Deleting clips, optionally closing the gap with a ripple.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};

#[derive(Debug, Deserialize)]
struct DeleteClipsArgs {
    clip_ids: Vec<String>,
    #[serde(default)]
    ripple: bool,
}

pub struct DeleteClipsTool;

#[async_trait]
impl Tool for DeleteClipsTool {
    fn name(&self) -> &'static str {
        "delete_clips"
    }

    fn description(&self) -> &'static str {
        "Deletes one or more clips from the timeline using their unique clip_ids. This action \
         is permanent for the current session. By default, this leaves a gap. To delete a clip \
         and have all subsequent clips on the same track move earlier to fill the gap, set \
         'ripple' to true (note: ripple delete is only supported when deleting a single clip). \
         To find the clip_ids, you must first use the get_timeline_summary tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "clip_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "A list of one or more unique clip identifiers to be deleted. These IDs must exactly match clip_ids from the get_timeline_summary tool."
                },
                "ripple": {
                    "type": "boolean",
                    "description": "If true, closes the gap left by the deleted clip by shifting all subsequent clips on the same track earlier. Only supported when deleting a single clip."
                }
            },
            "required": ["clip_ids"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: DeleteClipsArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        if args.clip_ids.is_empty() {
            return ToolOutcome::Continue("Error: No clip IDs were provided.".into());
        }
        if args.ripple && args.clip_ids.len() > 1 {
            return ToolOutcome::Continue(
                "Error: Ripple delete is not supported when deleting multiple clips at once. \
                 Please provide only one clip_id when ripple is true."
                    .into(),
            );
        }

        if args.ripple {
            let clip_id = &args.clip_ids[0];
            let Some(target) = ctx.state.timeline.find_clip_by_id(clip_id).cloned() else {
                return ToolOutcome::Continue(format!(
                    "Error: No clip with the ID '{clip_id}' was found on the timeline."
                ));
            };

            ctx.state.timeline.delete_clip(clip_id);

            let mut shifted = 0usize;
            for clip in ctx.state.timeline.clips_mut().iter_mut() {
                if clip.track_type == target.track_type
                    && clip.track_number == target.track_number
                    && clip.timeline_start_sec > target.timeline_start_sec
                {
                    clip.timeline_start_sec -= target.duration_sec;
                    shifted += 1;
                }
            }
            ctx.state.timeline.resort();

            tracing::info!(
                event = "clip_ripple_deleted",
                clip_id = %clip_id,
                shifted = shifted,
                "Ripple-deleted clip"
            );
            return ToolOutcome::Continue(format!(
                "Successfully ripple-deleted clip '{clip_id}', shifting {shifted} subsequent clips on track {}{}.",
                target.track_type.letter(),
                target.track_number,
            ));
        }

        let mut deleted: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        for clip_id in &args.clip_ids {
            if ctx.state.timeline.delete_clip(clip_id) {
                deleted.push(clip_id.clone());
            } else {
                failed.push(clip_id.clone());
            }
        }

        tracing::info!(
            event = "clips_deleted",
            deleted = deleted.len(),
            failed = failed.len(),
            "Batch delete finished"
        );

        let message = if deleted.is_empty() {
            format!(
                "Error: Could not find any of the requested clips to delete. Failed IDs: {}.",
                failed.join(", ")
            )
        } else if failed.is_empty() {
            format!(
                "Successfully deleted {} clips: {}.",
                deleted.len(),
                deleted.join(", ")
            )
        } else {
            format!(
                "Completed with mixed results. Successfully deleted {} clips: {}. Failed to find {} clips: {}.",
                deleted.len(),
                deleted.join(", "),
                failed.len(),
                failed.join(", ")
            )
        };
        ToolOutcome::Continue(message)
    }
}
