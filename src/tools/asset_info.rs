//! Batch metadata report for files in the assets directory.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;

use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};
use crate::utils::ffmpeg::probe_media_file;
use crate::utils::time::seconds_to_hms;

#[derive(Debug, Deserialize)]
struct AssetInfoArgs {
    filenames: Vec<String>,
}

pub struct AssetInfoTool;

#[async_trait]
impl Tool for AssetInfoTool {
    fn name(&self) -> &'static str {
        "get_asset_info"
    }

    fn description(&self) -> &'static str {
        "Probes one or more files from the media library and reports their technical metadata: \
         duration, resolution, frame rate, and which streams (video/audio) are present. \
         Problems with individual files are reported inline so a single bad file never hides \
         the others."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filenames": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "The exact names of files from the media library to inspect (e.g., ['interview.mp4', 'title_card.png'])."
                }
            },
            "required": ["filenames"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: AssetInfoArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };
        if args.filenames.is_empty() {
            return ToolOutcome::Continue("Error: 'filenames' must contain at least one entry.".into());
        }

        let mut report = String::from("ASSET INFO\n----------\n");
        for filename in &args.filenames {
            let path = ctx.state.resolve_asset(filename);
            let _ = writeln!(report, "\n- {filename}");
            if !path.exists() {
                report.push_str("  Error: file not found in the assets directory.\n");
                continue;
            }

            let info = probe_media_file(&path);
            if let Some(error) = &info.error {
                let _ = writeln!(report, "  Error: {error}");
                continue;
            }

            let _ = writeln!(
                report,
                "  Duration: {} ({:.3}s)",
                seconds_to_hms(info.duration_sec),
                info.duration_sec
            );
            let mut streams: Vec<&str> = Vec::new();
            if info.has_video {
                streams.push("video");
            }
            if info.has_audio {
                streams.push("audio");
            }
            let _ = writeln!(report, "  Streams: {}", streams.join(" + "));
            if info.has_video {
                let _ = writeln!(
                    report,
                    "  Resolution: {}x{} @ {:.2}fps",
                    info.width, info.height, info.frame_rate
                );
            }
        }

        ToolOutcome::Continue(report)
    }
}
