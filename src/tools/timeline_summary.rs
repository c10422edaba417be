//! Deterministic plain-text timeline report.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::timeline::{Keyframe, Timeline, TrackType};
use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};
use crate::utils::time::{hms_to_seconds, parse_track, seconds_to_hms, TIME_PATTERN, TRACK_PATTERN};

#[derive(Debug, Deserialize)]
struct TimelineSummaryArgs {
    #[serde(default)]
    track: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

pub struct TimelineSummaryTool;

#[async_trait]
impl Tool for TimelineSummaryTool {
    fn name(&self) -> &'static str {
        "get_timeline_summary"
    }

    fn description(&self) -> &'static str {
        "Provides a detailed text-based summary of the current editing timeline, including \
         every clip's placement, source range, and keyframes. By default it shows all clips \
         on all tracks. Use the optional parameters to filter the summary to a specific track \
         or time range."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "track": {
                    "type": "string",
                    "pattern": TRACK_PATTERN,
                    "description": "Optional. If provided, the summary only shows clips on this track (e.g., 'V1', 'A2')."
                },
                "start_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "Optional. Filters the summary to clips that start at or after this timeline timestamp. Format: HH:MM:SS.mmm"
                },
                "end_time": {
                    "type": "string",
                    "pattern": TIME_PATTERN,
                    "description": "Optional. Filters the summary to clips that end at or before this timeline timestamp. Format: HH:MM:SS.mmm"
                }
            }
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: TimelineSummaryArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };

        if ctx.state.timeline.is_empty() {
            return ToolOutcome::Continue("Timeline is currently empty.".into());
        }

        let track_filter = match &args.track {
            Some(spec) => match parse_track(spec) {
                Ok(track) => Some(track),
                Err(e) => return ToolOutcome::Continue(format!("Error: {e}")),
            },
            None => None,
        };
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

        let sequence = ctx.state.timeline.sequence_properties();
        let report = build_summary(&ctx.state.timeline, sequence.fps, sequence.width, sequence.height, track_filter, start_sec, end_sec);
        ToolOutcome::Continue(report)
    }
}

fn describe_keyframe(keyframe: &Keyframe, clip_start_sec: f64) -> String {
    let mut properties: Vec<String> = Vec::new();
    if let Some((x, y)) = keyframe.position {
        properties.push(format!("position=({x:.2}, {y:.2})"));
    }
    if let Some(scale) = keyframe.scale {
        properties.push(format!("scale={scale:.2}"));
    }
    if let Some(rotation) = keyframe.rotation {
        properties.push(format!("rotation={rotation:.1}"));
    }
    if let Some(opacity) = keyframe.opacity {
        properties.push(format!("opacity={opacity:.0}"));
    }
    if let Some((x, y)) = keyframe.anchor_point {
        properties.push(format!("anchor_point=({x:.2}, {y:.2})"));
    }
    let properties = if properties.is_empty() {
        "(no properties)".to_string()
    } else {
        properties.join(", ")
    };
    format!(
        "@ {} (+{:.3}s): {} [{}]",
        seconds_to_hms(clip_start_sec + keyframe.time_sec),
        keyframe.time_sec,
        properties,
        match keyframe.interpolation {
            crate::models::timeline::Interpolation::Linear => "linear",
            crate::models::timeline::Interpolation::EasyEase => "easy_ease",
            crate::models::timeline::Interpolation::Hold => "hold",
        }
    )
}

fn build_summary(
    timeline: &Timeline,
    fps: f64,
    width: u32,
    height: u32,
    track_filter: Option<(TrackType, u32)>,
    start_sec: Option<f64>,
    end_sec: Option<f64>,
) -> String {
    let is_filtered = track_filter.is_some() || start_sec.is_some() || end_sec.is_some();
    let mut output: Vec<String> = Vec::new();

    let header = if is_filtered {
        "TIMELINE SUMMARY (FILTERED)"
    } else {
        "TIMELINE SUMMARY"
    };
    output.push("=".repeat(40));
    output.push(format!("{header:^40}"));
    output.push("=".repeat(40));

    output.push(format!("Total Duration: {:.3}s", timeline.duration()));
    output.push(format!("Sequence: {width}x{height} @ {fps:.2}fps"));
    output.push(format!("Total Tracks: {}", timeline.occupied_tracks().len()));
    output.push(format!("Total Clips: {}", timeline.len()));

    if is_filtered {
        let mut filters: Vec<String> = Vec::new();
        if let Some((track_type, number)) = track_filter {
            filters.push(format!("Track: {}{}", track_type.letter(), number));
        }
        if start_sec.is_some() || end_sec.is_some() {
            let start = start_sec
                .map(|t| format!("{t:.3}s"))
                .unwrap_or_else(|| "start".to_string());
            let end = end_sec
                .map(|t| format!("{t:.3}s"))
                .unwrap_or_else(|| "end".to_string());
            filters.push(format!("Time Range: {start} -> {end}"));
        }
        output.push(format!("Filters Applied: {}", filters.join(", ")));
    }
    output.push("-".repeat(40));

    let tracks: Vec<(TrackType, u32)> = match track_filter {
        Some(track) => vec![track],
        None => timeline.occupied_tracks(),
    };

    for (track_type, track_number) in tracks {
        output.push(format!(
            "\n--- Track {}{track_number} ({track_type}) ---",
            track_type.letter()
        ));

        let clips: Vec<_> = timeline
            .clips_on_track(track_type, track_number)
            .into_iter()
            .filter(|c| start_sec.map_or(true, |s| c.timeline_start_sec >= s))
            .filter(|c| end_sec.map_or(true, |e| c.end_sec() <= e))
            .collect();

        if clips.is_empty() {
            output.push("  (No clips on this track match the specified filters)".to_string());
            continue;
        }

        let mut last_end = start_sec.unwrap_or(0.0);
        for clip in clips {
            let gap = clip.timeline_start_sec - last_end;
            if gap > 0.001 {
                output.push(format!(
                    "\n  [GAP from {last_end:.3}s to {:.3}s (duration: {gap:.3}s)]",
                    clip.timeline_start_sec
                ));
            }
            // Defensive: overlap means an engine invariant was violated.
            if clip.timeline_start_sec < last_end - 0.001 {
                output.push("\n  [!!! WARNING: OVERLAP DETECTED with previous clip !!!]".to_string());
            }

            output.push(format!("\n  - Clip ID: {}", clip.clip_id));
            output.push(format!(
                "    Timeline: {:.3}s -> {:.3}s (Duration: {:.3}s)",
                clip.timeline_start_sec,
                clip.end_sec(),
                clip.duration_sec
            ));
            output.push(format!(
                "    Source: {}",
                clip.source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| clip.source_path.display().to_string())
            ));
            output.push(format!(
                "    Description: {}",
                clip.description.as_deref().unwrap_or("N/A")
            ));
            output.push(format!(
                "    Source In/Out: {:.3}s -> {:.3}s",
                clip.source_in_sec, clip.source_out_sec
            ));
            if !clip.transformations.is_empty() {
                output.push("    Keyframes:".to_string());
                for keyframe in &clip.transformations {
                    output.push(format!(
                        "      {}",
                        describe_keyframe(keyframe, clip.timeline_start_sec)
                    ));
                }
            }
            last_end = clip.end_sec();
        }
    }

    output.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timeline::TimelineClip;
    use std::path::PathBuf;

    fn clip(id: &str, track_type: TrackType, n: u32, start: f64, dur: f64) -> TimelineClip {
        TimelineClip {
            clip_id: id.to_string(),
            source_path: PathBuf::from("/assets/interview.mp4"),
            source_in_sec: 1.0,
            source_out_sec: 1.0 + dur,
            source_total_duration_sec: 60.0,
            timeline_start_sec: start,
            duration_sec: dur,
            track_type,
            track_number: n,
            description: Some("talking head".to_string()),
            source_frame_rate: 24.0,
            source_width: 1920,
            source_height: 1080,
            has_audio: true,
            transformations: Vec::new(),
        }
    }

    #[test]
    fn test_summary_lists_clips_and_gaps() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("c1", TrackType::Video, 1, 0.0, 3.0));
        timeline.add_clip(clip("c2", TrackType::Video, 1, 5.0, 2.0));

        let report = build_summary(&timeline, 24.0, 1920, 1080, None, None, None);
        assert!(report.contains("TIMELINE SUMMARY"));
        assert!(report.contains("Total Duration: 7.000s"));
        assert!(report.contains("Sequence: 1920x1080 @ 24.00fps"));
        assert!(report.contains("--- Track V1 (video) ---"));
        assert!(report.contains("Clip ID: c1"));
        assert!(report.contains("[GAP from 3.000s to 5.000s (duration: 2.000s)]"));
        assert!(report.contains("Source: interview.mp4"));
        assert!(!report.contains("OVERLAP"));
    }

    #[test]
    fn test_summary_flags_overlap_defensively() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("c1", TrackType::Video, 1, 0.0, 4.0));
        timeline.add_clip(clip("c2", TrackType::Video, 1, 2.0, 2.0));

        let report = build_summary(&timeline, 24.0, 1920, 1080, None, None, None);
        assert!(report.contains("[!!! WARNING: OVERLAP DETECTED with previous clip !!!]"));
    }

    #[test]
    fn test_summary_filters() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("v", TrackType::Video, 1, 0.0, 3.0));
        timeline.add_clip(clip("a", TrackType::Audio, 1, 0.0, 3.0));

        let filtered = build_summary(
            &timeline,
            24.0,
            1920,
            1080,
            Some((TrackType::Audio, 1)),
            None,
            None,
        );
        assert!(filtered.contains("TIMELINE SUMMARY (FILTERED)"));
        assert!(filtered.contains("Filters Applied: Track: A1"));
        assert!(filtered.contains("Clip ID: a"));
        assert!(!filtered.contains("Clip ID: v"));

        let windowed = build_summary(&timeline, 24.0, 1920, 1080, None, Some(1.0), Some(2.0));
        assert!(windowed.contains("(No clips on this track match the specified filters)"));
    }

    #[test]
    fn test_summary_shows_keyframes() {
        let mut timeline = Timeline::new();
        let mut c = clip("c1", TrackType::Video, 1, 1.0, 3.0);
        c.transformations = vec![Keyframe {
            scale: Some(0.5),
            position: Some((0.25, 0.75)),
            ..Keyframe::at(1.0)
        }];
        timeline.add_clip(c);

        let report = build_summary(&timeline, 24.0, 1920, 1080, None, None, None);
        assert!(report.contains("Keyframes:"));
        assert!(report.contains("@ 00:00:02.000 (+1.000s)"));
        assert!(report.contains("position=(0.25, 0.75)"));
        assert!(report.contains("scale=0.50"));
        assert!(report.contains("[easy_ease]"));
    }
}
