//! Atomic clip placement: the primary tool for building an edit.
//!
//! A single definition can target a video track, an audio track, or both
//! (a linked A/V pair that becomes two internal clips suffixed `_v`/`_a`).
//! The whole request is validated before anything is committed, so a failed
//! request leaves the timeline exactly as it was.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::timeline::{SequenceProperties, TimelineClip, TrackType};
use crate::tools::{parse_args, Tool, ToolContext, ToolOutcome};
use crate::utils::ffmpeg::{is_image_source, probe_media_file};
use crate::utils::time::{hms_to_seconds, parse_track, TIME_PATTERN};

/// Upper-bound slack when `source_out` sits at the very end of the source.
const SOURCE_END_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum InsertionBehavior {
    #[default]
    Append,
    Insert,
    Replace,
}

#[derive(Debug, Deserialize)]
struct ClipToAdd {
    clip_id: String,
    source_filename: String,
    #[serde(default)]
    video_track: Option<String>,
    #[serde(default)]
    audio_track: Option<String>,
    source_in: String,
    source_out: String,
    #[serde(default = "default_timeline_start")]
    timeline_start: String,
    #[serde(default)]
    insertion_behavior: InsertionBehavior,
    #[serde(default)]
    description: Option<String>,
}

fn default_timeline_start() -> String {
    "00:00:00.000".to_string()
}

#[derive(Debug, Deserialize)]
struct AddClipsArgs {
    clips: Vec<ClipToAdd>,
}

/// Fully validated clip data held between the validation and commit phases.
#[derive(Debug, Clone)]
struct ValidatedClip {
    clip: TimelineClip,
    insertion_behavior: InsertionBehavior,
}

pub struct AddClipsTool;

#[async_trait]
impl Tool for AddClipsTool {
    fn name(&self) -> &'static str {
        "add_clips"
    }

    fn description(&self) -> &'static str {
        "Atomically adds one or more clips to the timeline. This is the main tool for \
         constructing the edit. It can add video-only, audio-only, or linked A/V clips. \
         Supports appending to track(s), inserting at a cut point, or replacing content. \
         The entire operation is all-or-nothing; if any single clip fails validation, no \
         changes are made."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "clips": {
                    "type": "array",
                    "minItems": 1,
                    "description": "A list of one or more logical clips to add to the timeline in a single, atomic operation. Each item can specify a video track, an audio track, or both to create a linked A/V clip.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "clip_id": {
                                "type": "string",
                                "description": "A unique name for the new clip (e.g., 'intro_scene', 'b-roll_1'). If adding both video and audio, this ID is used as a base for both (e.g., 'intro_scene_v', 'intro_scene_a')."
                            },
                            "source_filename": {
                                "type": "string",
                                "description": "The exact name of the video, image, or audio file from the media library that this clip will be cut from (e.g., 'interview.mp4', 'title_card.png')."
                            },
                            "video_track": {
                                "type": "string",
                                "pattern": "^[Vv]\\d+$",
                                "description": "The target video track for this clip (e.g., 'V1', 'V2'). Provide this to include the video component. Must be omitted for audio-only clips."
                            },
                            "audio_track": {
                                "type": "string",
                                "pattern": "^[Aa]\\d+$",
                                "description": "The target audio track for this clip (e.g., 'A1', 'A2'). Provide this to include the audio component. Must be omitted for images."
                            },
                            "source_in": {
                                "type": "string",
                                "pattern": TIME_PATTERN,
                                "description": "The timestamp where the clip begins in the source asset. For static images, this must be '00:00:00.000'."
                            },
                            "source_out": {
                                "type": "string",
                                "pattern": TIME_PATTERN,
                                "description": "The timestamp where the clip ends in the source asset. For static images, this defines the desired display duration."
                            },
                            "timeline_start": {
                                "type": "string",
                                "pattern": TIME_PATTERN,
                                "description": "The timestamp on the main timeline where this clip should be placed. When using 'insert' this must be at an existing cut point. Ignored when using 'append'."
                            },
                            "insertion_behavior": {
                                "type": "string",
                                "enum": ["append", "insert", "replace"],
                                "description": "Controls how the clip is added. 'append' adds to the end of the specified track(s). 'insert' shifts subsequent clips but requires placing at an existing cut. 'replace' overwrites existing content."
                            },
                            "description": {
                                "type": "string",
                                "description": "A description for organizational purposes. Use this to describe anything you want to remember about this clip."
                            }
                        },
                        "required": ["clip_id", "source_filename", "source_in", "source_out"]
                    }
                }
            },
            "required": ["clips"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome {
        let args: AddClipsArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(message) => return ToolOutcome::Continue(message),
        };
        if args.clips.is_empty() {
            return ToolOutcome::Continue("Error: 'clips' must contain at least one clip.".into());
        }

        let sequence = ctx.state.timeline.sequence_properties();

        // Phase 1: validate everything without touching the timeline.
        let mut validated: Vec<ValidatedClip> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut taken_ids: Vec<String> = ctx
            .state
            .timeline
            .clips()
            .iter()
            .map(|c| c.clip_id.clone())
            .collect();
        // Per-call scratch table of track end times so multiple appends in
        // one request stack correctly.
        let mut track_ends: HashMap<(TrackType, u32), f64> = HashMap::new();

        for (i, clip_def) in args.clips.iter().enumerate() {
            match validate_clip_group(clip_def, ctx, sequence, &taken_ids, &mut track_ends) {
                Ok(group) => {
                    for validated_clip in &group {
                        taken_ids.push(validated_clip.clip.clip_id.clone());
                    }
                    validated.extend(group);
                }
                Err(message) => {
                    errors.push(format!(
                        "Error in clip definition #{} ('{}'): {message}",
                        i + 1,
                        clip_def.clip_id
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return ToolOutcome::Continue(format!(
                "Operation failed. Please fix the following errors:\n- {}",
                errors.join("\n- ")
            ));
        }

        // Phase 2: commit.
        let definitions = args.clips.len();
        let added = commit(ctx, validated);

        tracing::info!(
            event = "clips_added",
            count = added,
            definitions = definitions,
            "Committed add_clips request"
        );
        ToolOutcome::Continue(format!(
            "Successfully added {added} clips to the timeline from {definitions} definitions."
        ))
    }
}

/// Validates a single definition, which yields one (V or A) or two (V+A)
/// internal clips.
fn validate_clip_group(
    clip_def: &ClipToAdd,
    ctx: &ToolContext<'_>,
    sequence: SequenceProperties,
    taken_ids: &[String],
    track_ends: &mut HashMap<(TrackType, u32), f64>,
) -> Result<Vec<ValidatedClip>, String> {
    if clip_def.video_track.is_none() && clip_def.audio_track.is_none() {
        return Err("At least one of 'video_track' or 'audio_track' must be provided.".into());
    }

    let video_track = match &clip_def.video_track {
        Some(spec) => {
            let (track_type, number) = parse_track(spec).map_err(|e| e.to_string())?;
            if track_type != TrackType::Video {
                return Err(format!("'{spec}' is not a video track specifier."));
            }
            Some(number)
        }
        None => None,
    };
    let audio_track = match &clip_def.audio_track {
        Some(spec) => {
            let (track_type, number) = parse_track(spec).map_err(|e| e.to_string())?;
            if track_type != TrackType::Audio {
                return Err(format!("'{spec}' is not an audio track specifier."));
            }
            Some(number)
        }
        None => None,
    };

    let source_path: PathBuf = ctx.state.resolve_asset(&clip_def.source_filename);
    if !source_path.exists() {
        return Err(format!(
            "Source file '{}' not found.",
            clip_def.source_filename
        ));
    }

    let media_info = probe_media_file(&source_path);
    if let Some(error) = &media_info.error {
        return Err(format!(
            "Error probing '{}': {error}",
            clip_def.source_filename
        ));
    }

    let source_in_sec = hms_to_seconds(&clip_def.source_in).map_err(|e| e.to_string())?;
    let source_out_sec = hms_to_seconds(&clip_def.source_out).map_err(|e| e.to_string())?;
    let is_image = is_image_source(&source_path);

    let (source_in_sec, source_out_sec, source_total_duration_sec, duration_sec) = if is_image {
        if audio_track.is_some() {
            return Err("Cannot add an audio track when the source is an image.".into());
        }
        if source_in_sec.abs() > f64::EPSILON {
            return Err("For images, 'source_in' must be '00:00:00.000'.".into());
        }
        if source_out_sec <= 0.0 {
            return Err("For images, 'source_out' must be a positive duration.".into());
        }
        (0.0, source_out_sec, source_out_sec, source_out_sec)
    } else {
        let total = media_info.duration_sec;
        if source_out_sec > total + SOURCE_END_TOLERANCE {
            return Err(format!(
                "source_out ({source_out_sec:.3}s) is beyond the source's duration ({total:.3}s)."
            ));
        }
        if source_in_sec >= source_out_sec {
            return Err("source_in must be before source_out.".into());
        }
        (
            source_in_sec,
            source_out_sec,
            total,
            source_out_sec - source_in_sec,
        )
    };

    let mut target_tracks: Vec<(TrackType, u32)> = Vec::new();
    if let Some(number) = video_track {
        target_tracks.push((TrackType::Video, number));
    }
    if let Some(number) = audio_track {
        target_tracks.push((TrackType::Audio, number));
    }

    // Placement. Append lands at the max end time across the targeted
    // tracks (so a linked pair stays in sync) and bumps the scratch table;
    // insert requires an existing cut point within half a frame.
    let mut timeline_start_sec = hms_to_seconds(&clip_def.timeline_start).map_err(|e| e.to_string())?;
    match clip_def.insertion_behavior {
        InsertionBehavior::Append => {
            timeline_start_sec =
                resolve_append_start(&ctx.state.timeline, track_ends, &target_tracks, duration_sec);
        }
        InsertionBehavior::Insert => {
            let tolerance = if sequence.fps > 0.0 {
                sequence.frame_duration() / 2.0
            } else {
                0.001
            };
            for &(track_type, number) in &target_tracks {
                let mut cut_points = vec![0.0f64];
                for clip in ctx.state.timeline.clips_on_track(track_type, number) {
                    cut_points.push(clip.end_sec());
                }
                if !cut_points
                    .iter()
                    .any(|p| (timeline_start_sec - p).abs() <= tolerance)
                {
                    cut_points.sort_by(f64::total_cmp);
                    cut_points.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
                    let points: Vec<String> =
                        cut_points.iter().map(|p| format!("{p:.3}s")).collect();
                    return Err(format!(
                        "'insert' requires placing at a valid cut point. '{:.3}s' is not a valid cut on track {}{}. Valid points are: [{}].",
                        timeline_start_sec,
                        track_type.letter(),
                        number,
                        points.join(", ")
                    ));
                }
            }
        }
        InsertionBehavior::Replace => {}
    }

    let is_linked = video_track.is_some() && audio_track.is_some();
    let mut group = Vec::new();

    if let Some(number) = video_track {
        if !media_info.has_video {
            return Err(format!(
                "Cannot place '{}' on a video track because it has no video stream.",
                clip_def.source_filename
            ));
        }
        let clip_id = if is_linked {
            format!("{}_v", clip_def.clip_id)
        } else {
            clip_def.clip_id.clone()
        };
        if taken_ids.iter().any(|id| id == &clip_id) {
            return Err(format!(
                "A clip with ID '{clip_id}' already exists or is duplicated in this request."
            ));
        }
        group.push(ValidatedClip {
            clip: TimelineClip {
                clip_id,
                source_path: source_path.clone(),
                source_in_sec,
                source_out_sec,
                source_total_duration_sec,
                timeline_start_sec,
                duration_sec,
                track_type: TrackType::Video,
                track_number: number,
                description: clip_def.description.clone(),
                source_frame_rate: if is_image {
                    sequence.fps
                } else {
                    media_info.frame_rate
                },
                source_width: media_info.width,
                source_height: media_info.height,
                has_audio: media_info.has_audio,
                transformations: Vec::new(),
            },
            insertion_behavior: clip_def.insertion_behavior,
        });
    }

    if let Some(number) = audio_track {
        if !media_info.has_audio {
            return Err(format!(
                "Cannot place '{}' on an audio track because it has no audio stream.",
                clip_def.source_filename
            ));
        }
        let clip_id = if is_linked {
            format!("{}_a", clip_def.clip_id)
        } else {
            clip_def.clip_id.clone()
        };
        if taken_ids.iter().any(|id| id == &clip_id) {
            return Err(format!(
                "A clip with ID '{clip_id}' already exists or is duplicated in this request."
            ));
        }
        group.push(ValidatedClip {
            clip: TimelineClip {
                clip_id,
                source_path: source_path.clone(),
                source_in_sec,
                source_out_sec,
                source_total_duration_sec,
                timeline_start_sec,
                duration_sec,
                track_type: TrackType::Audio,
                track_number: number,
                description: clip_def.description.clone(),
                source_frame_rate: 0.0,
                source_width: 0,
                source_height: 0,
                has_audio: true,
                transformations: Vec::new(),
            },
            insertion_behavior: clip_def.insertion_behavior,
        });
    }

    Ok(group)
}

/// Append placement: the clip lands at the current end of the targeted
/// track(s), taking the max end across both tracks of a linked pair, and the
/// per-call scratch table is bumped so later appends in the same request
/// stack behind this one.
fn resolve_append_start(
    timeline: &crate::models::timeline::Timeline,
    track_ends: &mut HashMap<(TrackType, u32), f64>,
    target_tracks: &[(TrackType, u32)],
    duration_sec: f64,
) -> f64 {
    let mut latest_end = 0.0f64;
    for &(track_type, number) in target_tracks {
        let end = *track_ends
            .entry((track_type, number))
            .or_insert_with(|| timeline.track_duration(track_type, number));
        latest_end = latest_end.max(end);
    }
    for &(track_type, number) in target_tracks {
        track_ends.insert((track_type, number), latest_end + duration_sec);
    }
    latest_end
}

/// Commit phase: replace-deletions first, then aggregated insert shifts to
/// the survivors, then the new clips (with sequential inserts at one cut
/// point stacking behind each other).
fn commit(ctx: &mut ToolContext<'_>, validated: Vec<ValidatedClip>) -> usize {
    // Clips wiped by 'replace': any overlap on the target track deletes the
    // whole existing clip.
    let mut ids_to_delete: Vec<String> = Vec::new();
    for item in &validated {
        if item.insertion_behavior != InsertionBehavior::Replace {
            continue;
        }
        let (start, end) = (item.clip.timeline_start_sec, item.clip.end_sec());
        for existing in ctx
            .state
            .timeline
            .clips_on_track(item.clip.track_type, item.clip.track_number)
        {
            if existing.timeline_start_sec.max(start) < existing.end_sec().min(end)
                && !ids_to_delete.contains(&existing.clip_id)
            {
                ids_to_delete.push(existing.clip_id.clone());
            }
        }
    }

    // Aggregate insert shifts per (track, cut point), keyed on the
    // millisecond grid so equal points merge.
    let mut shifts: HashMap<(TrackType, u32, i64), (f64, f64)> = HashMap::new();
    for item in &validated {
        if item.insertion_behavior == InsertionBehavior::Insert {
            let key = (
                item.clip.track_type,
                item.clip.track_number,
                (item.clip.timeline_start_sec * 1000.0).round() as i64,
            );
            let entry = shifts
                .entry(key)
                .or_insert((item.clip.timeline_start_sec, 0.0));
            entry.1 += item.clip.duration_sec;
        }
    }

    let timeline = &mut ctx.state.timeline;
    timeline
        .clips_mut()
        .retain(|c| !ids_to_delete.contains(&c.clip_id));
    for clip in timeline.clips_mut().iter_mut() {
        let mut total_shift = 0.0;
        for (&(track_type, track_number, _), &(point, duration)) in &shifts {
            if clip.track_type == track_type
                && clip.track_number == track_number
                && clip.timeline_start_sec >= point - 1e-9
            {
                total_shift += duration;
            }
        }
        clip.timeline_start_sec += total_shift;
    }

    // Sequential inserts at the same point stack behind each other.
    let mut insert_cursors: HashMap<(TrackType, u32, i64), f64> = HashMap::new();
    let added = validated.len();
    for item in validated {
        let mut clip = item.clip;
        if item.insertion_behavior == InsertionBehavior::Insert {
            let key = (
                clip.track_type,
                clip.track_number,
                (clip.timeline_start_sec * 1000.0).round() as i64,
            );
            let cursor = insert_cursors
                .entry(key)
                .or_insert(clip.timeline_start_sec);
            clip.timeline_start_sec = *cursor;
            *cursor += clip.duration_sec;
        }
        timeline.clips_mut().push(clip);
    }
    timeline.resort();
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderClient;
    use crate::models::timeline::Timeline;
    use crate::session::SessionState;

    fn clip(id: &str, track_type: TrackType, n: u32, start: f64, dur: f64) -> TimelineClip {
        TimelineClip {
            clip_id: id.to_string(),
            source_path: PathBuf::from("/assets/a.mp4"),
            source_in_sec: 0.0,
            source_out_sec: dur,
            source_total_duration_sec: 10.0,
            timeline_start_sec: start,
            duration_sec: dur,
            track_type,
            track_number: n,
            description: None,
            source_frame_rate: 24.0,
            source_width: 1920,
            source_height: 1080,
            has_audio: true,
            transformations: Vec::new(),
        }
    }

    fn validated(
        id: &str,
        track_type: TrackType,
        n: u32,
        start: f64,
        dur: f64,
        behavior: InsertionBehavior,
    ) -> ValidatedClip {
        ValidatedClip {
            clip: clip(id, track_type, n, start, dur),
            insertion_behavior: behavior,
        }
    }

    fn state_with(clips: Vec<TimelineClip>) -> SessionState {
        let mut state = SessionState::new(PathBuf::from("/jobs/j1/assets"), None);
        let mut timeline = Timeline::new();
        for c in clips {
            timeline.add_clip(c);
        }
        state.timeline = timeline;
        state
    }

    fn run_commit(state: &mut SessionState, validated_clips: Vec<ValidatedClip>) -> usize {
        let provider = ProviderClient::new("test-key");
        let scratch = tempfile::tempdir().unwrap();
        let mut ctx = ToolContext {
            state,
            provider: &provider,
            scratch_dir: scratch.path(),
        };
        commit(&mut ctx, validated_clips)
    }

    #[test]
    fn test_append_stacking_within_one_request() {
        // Two appends to the same empty track land back to back.
        let timeline = Timeline::new();
        let mut ends = HashMap::new();
        let v1 = [(TrackType::Video, 1)];

        let first = resolve_append_start(&timeline, &mut ends, &v1, 3.0);
        let second = resolve_append_start(&timeline, &mut ends, &v1, 2.0);
        assert_eq!(first, 0.0);
        assert_eq!(second, 3.0);
    }

    #[test]
    fn test_append_starts_at_existing_track_end() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("existing", TrackType::Video, 1, 0.0, 5.0));
        let mut ends = HashMap::new();
        let start = resolve_append_start(&timeline, &mut ends, &[(TrackType::Video, 1)], 2.0);
        assert_eq!(start, 5.0);
    }

    #[test]
    fn test_linked_append_uses_max_end_across_tracks() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("v", TrackType::Video, 1, 0.0, 3.0));
        timeline.add_clip(clip("a", TrackType::Audio, 1, 0.0, 7.0));

        let mut ends = HashMap::new();
        let targets = [(TrackType::Video, 1), (TrackType::Audio, 1)];
        let start = resolve_append_start(&timeline, &mut ends, &targets, 2.0);
        assert_eq!(start, 7.0);
        // Both tracks are bumped to the shared new end.
        assert_eq!(ends[&(TrackType::Video, 1)], 9.0);
        assert_eq!(ends[&(TrackType::Audio, 1)], 9.0);
    }

    #[test]
    fn test_insert_shifts_subsequent_clips() {
        // c1 [0,3) c2 [3,5); inserting 2s at 3.0 moves c2 to [5,7).
        let mut state = state_with(vec![
            clip("c1", TrackType::Video, 1, 0.0, 3.0),
            clip("c2", TrackType::Video, 1, 3.0, 2.0),
        ]);
        run_commit(
            &mut state,
            vec![validated("c3", TrackType::Video, 1, 3.0, 2.0, InsertionBehavior::Insert)],
        );

        let find = |id: &str| state.timeline.find_clip_by_id(id).unwrap().timeline_start_sec;
        assert_eq!(find("c1"), 0.0);
        assert_eq!(find("c3"), 3.0);
        assert_eq!(find("c2"), 5.0);
        assert_eq!(state.timeline.duration(), 7.0);
    }

    #[test]
    fn test_sequential_inserts_at_same_point_stack() {
        let mut state = state_with(vec![
            clip("c1", TrackType::Video, 1, 0.0, 3.0),
            clip("c2", TrackType::Video, 1, 3.0, 2.0),
        ]);
        run_commit(
            &mut state,
            vec![
                validated("i1", TrackType::Video, 1, 3.0, 1.0, InsertionBehavior::Insert),
                validated("i2", TrackType::Video, 1, 3.0, 1.0, InsertionBehavior::Insert),
            ],
        );

        let find = |id: &str| state.timeline.find_clip_by_id(id).unwrap().timeline_start_sec;
        assert_eq!(find("i1"), 3.0);
        assert_eq!(find("i2"), 4.0);
        // Existing c2 is shifted by the combined inserted duration.
        assert_eq!(find("c2"), 5.0);
    }

    #[test]
    fn test_replace_deletes_partial_overlaps_entirely() {
        // c1 [0,3) c2 [3,5); replacing [2,4) deletes both whole clips.
        let mut state = state_with(vec![
            clip("c1", TrackType::Video, 1, 0.0, 3.0),
            clip("c2", TrackType::Video, 1, 3.0, 2.0),
        ]);
        run_commit(
            &mut state,
            vec![validated("cR", TrackType::Video, 1, 2.0, 2.0, InsertionBehavior::Replace)],
        );

        assert!(state.timeline.find_clip_by_id("c1").is_none());
        assert!(state.timeline.find_clip_by_id("c2").is_none());
        let replacement = state.timeline.find_clip_by_id("cR").unwrap();
        assert_eq!(replacement.timeline_start_sec, 2.0);
        assert_eq!(state.timeline.len(), 1);
    }

    #[test]
    fn test_replace_leaves_other_tracks_alone() {
        let mut state = state_with(vec![
            clip("v", TrackType::Video, 1, 0.0, 3.0),
            clip("a", TrackType::Audio, 1, 0.0, 3.0),
        ]);
        run_commit(
            &mut state,
            vec![validated("cR", TrackType::Video, 1, 0.0, 3.0, InsertionBehavior::Replace)],
        );
        assert!(state.timeline.find_clip_by_id("a").is_some());
        assert!(state.timeline.find_clip_by_id("v").is_none());
    }
}
