//! Rendering the timeline to a final MP4.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::services::renderer;
use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};

fn default_output_filename() -> String {
    "final_render.mp4".to_string()
}

#[derive(Debug, Deserialize)]
struct RenderVideoArgs {
    #[serde(default = "default_output_filename")]
    output_filename: String,
}

pub struct RenderVideoTool;

#[async_trait]
impl Tool for RenderVideoTool {
    fn name(&self) -> &'static str {
        "render_video"
    }

    fn description(&self) -> &'static str {
        "Renders the current timeline into a final video file (e.g., an MP4), applying all \
         transformations and layering. This is used to produce the final video deliverable. \
         After calling this, you should call finish_job and mention the returned filename."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "output_filename": {
                    "type": "string",
                    "description": "The desired filename for the final rendered video file. Should end in .mp4."
                }
            }
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: RenderVideoArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        if ctx.state.timeline.is_empty() {
            return ToolOutcome::Continue("Error: Cannot render because the timeline is empty.".into());
        }

        let output_dir = ctx.state.output_directory();
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            return ToolOutcome::Continue(format!(
                "Error: Could not create output directory '{}': {e}",
                output_dir.display()
            ));
        }
        let output_path = output_dir.join(&args.output_filename);

        let sequence = ctx.state.timeline.sequence_properties();
        let timeline = ctx.state.timeline.clone();
        let scratch = ctx.scratch_dir.to_path_buf();
        let render_target = output_path.clone();

        // The render can take minutes; keep it off the async runtime.
        let result = tokio::task::spawn_blocking(move || {
            renderer::render_final_video(&timeline, sequence, &render_target, &scratch)
        })
        .await;

        match result {
            Ok(Ok(())) => ToolOutcome::Continue(format!(
                "Successfully rendered video to '{}' in the output directory.",
                args.output_filename
            )),
            Ok(Err(e)) => ToolOutcome::Continue(format!("Error: Rendering failed: {e}")),
            Err(e) => ToolOutcome::Continue(format!("Error: Rendering task failed: {e}")),
        }
    }
}
