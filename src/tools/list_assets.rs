//! Listing the contents of the assets directory.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;

use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};

const MEDIA_EXTENSIONS: [&str; 12] = [
    "mp4", "mov", "mkv", "webm", "avi", "mp3", "wav", "m4a", "png", "jpg", "jpeg", "webp",
];

#[derive(Debug, Deserialize)]
struct ListAssetsArgs {}

pub struct ListAssetsTool;

#[async_trait]
impl Tool for ListAssetsTool {
    fn name(&self) -> &'static str {
        "list_assets"
    }

    fn description(&self) -> &'static str {
        "Lists every file in the user's media library with its size, flagging the files that \
         look like usable media. Use this first to discover what material is available for the \
         edit."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let _args: ListAssetsArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        let entries = match std::fs::read_dir(&ctx.state.assets_directory) {
            Ok(entries) => entries,
            Err(e) => {
                return ToolOutcome::Continue(format!(
                    "Error: Could not read the assets directory '{}': {e}",
                    ctx.state.assets_directory.display()
                ));
            }
        };

        let mut files: Vec<(String, u64, bool)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let is_media = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            files.push((name, size, is_media));
        }
        files.sort();

        if files.is_empty() {
            return ToolOutcome::Continue("The assets directory is empty.".into());
        }

        let mut report = String::from("ASSETS\n------\n");
        for (name, size, is_media) in &files {
            let _ = writeln!(
                report,
                "- {name} ({}){}",
                format_size(*size),
                if *is_media { "" } else { "  [not a media file]" }
            );
        }
        ToolOutcome::Continue(report)
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
