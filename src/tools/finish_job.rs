//! The terminal tool: every job ends here.
//!
//! Returns [`ToolOutcome::Finish`] carrying the final payload, which unwinds
//! the agent's run loop. Optionally exports the timeline as an exchange file
//! first; an export failure is reported inside the final message rather than
//! blocking completion.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::services::exchange;
use crate::tools::{parse_args, JobResult, Tool, ToolContext, ToolOutcome};

fn default_output_filename() -> String {
    "cutline_edit.otio".to_string()
}

fn default_consolidate() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FinishJobArgs {
    message: String,
    #[serde(default)]
    export_timeline: bool,
    #[serde(default = "default_output_filename")]
    output_filename: String,
    #[serde(default = "default_consolidate")]
    consolidate: bool,
}

pub struct FinishJobTool;

#[async_trait]
impl Tool for FinishJobTool {
    fn name(&self) -> &'static str {
        "finish_job"
    }

    fn description(&self) -> &'static str {
        "The single, final tool to end the editing job. Call this when the user's request is \
         fully addressed or when you cannot proceed. You MUST provide a final message for the \
         user. You can optionally export_timeline if you have created one."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "A final, user-facing message summarizing the work done, explaining the result, or detailing why the request could not be completed. Always required."
                },
                "export_timeline": {
                    "type": "boolean",
                    "description": "Set to true if a timeline has been created and should be exported. If false, the job finishes with only the message."
                },
                "output_filename": {
                    "type": "string",
                    "description": "If exporting, the desired filename for the timeline file. The extension determines the format: '.otio' (recommended) or '.xml' (legacy)."
                },
                "consolidate": {
                    "type": "boolean",
                    "description": "If exporting, creates a self-contained project folder with the timeline file and copies of all used media. Highly recommended."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: FinishJobArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        let mut output_path = None;
        let mut export_error = None;

        if args.export_timeline {
            if ctx.state.timeline.is_empty() {
                export_error =
                    Some("Agent requested export, but the timeline is empty.".to_string());
            } else {
                let sequence = ctx.state.timeline.sequence_properties();
                match exchange::export_timeline(
                    &ctx.state.timeline,
                    sequence,
                    &ctx.state.assets_directory,
                    &args.output_filename,
                    args.consolidate,
                ) {
                    Ok(path) => output_path = Some(path),
                    Err(e) => export_error = Some(e.to_string()),
                }
            }
        }

        let mut final_message = args.message;
        if let Some(error) = export_error {
            tracing::warn!(event = "finish_export_failed", error = %error, "Export failed during finish_job");
            final_message.push_str(&format!(
                "\n\n[System Note: An error occurred during the final export: {error}]"
            ));
        }

        tracing::info!(event = "job_finished", "finish_job called; ending the run loop");
        ToolOutcome::Finish(JobResult {
            status: "COMPLETE".to_string(),
            message: final_message,
            output_path: output_path.map(|p| p.display().to_string()),
        })
    }
}
