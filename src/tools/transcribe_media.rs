//! Speech-to-text for a source file, or a segment of one.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::transcription::transcribe_audio;
use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};
use crate::utils::ffmpeg::{extract_audio_segment, probe_media_file};
use crate::utils::time::{hms_to_seconds, seconds_to_hms, TIME_PATTERN};

#[derive(Debug, Deserialize)]
struct TranscribeMediaArgs {
    source_filename: String,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

pub struct TranscribeMediaTool;

#[async_trait]
impl Tool for TranscribeMediaTool {
    fn name(&self) -> &'static str {
        "transcribe_media"
    }

    fn description(&self) -> &'static str {
        "Transcribes the speech in a source media file (or a time range of it) and returns the \
         text. Use this to find spoken content, locate quotes, or decide where to cut \
         dialogue."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_filename": {
                    "type": "string",
                    "description": "The exact name of the audio or video file from the media library to transcribe."
                },
                "start_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "Optional. Transcribe starting from this timestamp in the source."
                },
                "end_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "Optional. Transcribe up to this timestamp in the source."
                }
            },
            "required": ["source_filename"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: TranscribeMediaArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        let source = ctx.state.resolve_asset(&args.source_filename);
        if !source.exists() {
            return ToolOutcome::Continue(format!(
                "Error: The source file '{}' does not exist in the assets directory.",
                args.source_filename
            ));
        }

        let info = probe_media_file(&source);
        if let Some(error) = &info.error {
            return ToolOutcome::Continue(format!(
                "Error probing '{}': {error}",
                args.source_filename
            ));
        }
        if !info.has_audio {
            return ToolOutcome::Continue(format!(
                "Error: Source file '{}' has no audio stream to transcribe.",
                args.source_filename
            ));
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
        if let (Some(start), Some(end)) = (start_sec, end_sec) {
            if start >= end {
                return ToolOutcome::Continue(
                    "Error: The start_time must be before the end_time.".into(),
                );
            }
        }

        let audio_path = ctx.scratch_dir.join("transcribe_audio.m4a");
        if let Err(e) = extract_audio_segment(&source, start_sec, end_sec, &audio_path) {
            return ToolOutcome::Continue(format!("Error: Failed to extract audio: {e}"));
        }

        tracing::info!(
            event = "transcription_start",
            source = %args.source_filename,
            "Transcribing audio segment"
        );
        match transcribe_audio(ctx.provider.api_key(), &audio_path).await {
            Ok(text) => {
                let range = match (start_sec, end_sec) {
                    (Some(s), Some(e)) => {
                        format!(" ({} -> {})", seconds_to_hms(s), seconds_to_hms(e))
                    }
                    (Some(s), None) => format!(" (from {})", seconds_to_hms(s)),
                    (None, Some(e)) => format!(" (until {})", seconds_to_hms(e)),
                    (None, None) => String::new(),
                };
                ToolOutcome::Continue(format!(
                    "Transcript of '{}'{range}:\n{text}",
                    args.source_filename
                ))
            }
            Err(e) => ToolOutcome::Continue(format!("Error: Transcription failed: {e}")),
        }
    }
}
