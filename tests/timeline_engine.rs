//! End-to-end tests for the editing engine: tool mutations, invariants, and
//! the rendering/export translation layers.
//!
//! These tests exercise the pure engine only; no ffprobe, melt, or network.
//! Tools that need media probing are covered down to the validation boundary
//! (missing files, atomic failure), and their placement semantics are covered
//! by the unit tests next to the implementation.

use serde_json::json;
use std::path::PathBuf;

use cutline::llm::ProviderClient;
use cutline::models::timeline::{
    Keyframe, SequenceProperties, Timeline, TimelineClip, TrackType,
};
use cutline::services::mlt;
use cutline::session::SessionState;
use cutline::tools::{self, Tool, ToolContext, ToolOutcome};

fn clip(id: &str, track_type: TrackType, n: u32, start: f64, dur: f64) -> TimelineClip {
    TimelineClip {
        clip_id: id.to_string(),
        source_path: PathBuf::from("/jobs/j1/assets/a.mp4"),
        source_in_sec: 0.0,
        source_out_sec: dur,
        source_total_duration_sec: 60.0,
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

fn state_with(clips: Vec<TimelineClip>) -> SessionState {
    let mut state = SessionState::new(PathBuf::from("/jobs/j1/assets"), None);
    let mut timeline = Timeline::new();
    for c in clips {
        timeline.add_clip(c);
    }
    state.timeline = timeline;
    state
}

async fn run_tool(
    tool: &dyn Tool,
    state: &mut SessionState,
    args: serde_json::Value,
) -> ToolOutcome {
    let provider = ProviderClient::new("test-key");
    let scratch = tempfile::tempdir().unwrap();
    let mut ctx = ToolContext {
        state,
        provider: &provider,
        scratch_dir: scratch.path(),
    };
    tool.execute(&mut ctx, args).await
}

fn expect_continue(outcome: ToolOutcome) -> String {
    match outcome {
        ToolOutcome::Continue(text) => text,
        ToolOutcome::Finish(result) => panic!("unexpected finish outcome: {result:?}"),
    }
}

/// No per-track overlap and no duplicate clip ids.
fn assert_invariants(timeline: &Timeline) {
    let mut ids: Vec<&str> = timeline.clips().iter().map(|c| c.clip_id.as_str()).collect();
    ids.sort();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before, "duplicate clip ids");

    for (track_type, number) in timeline.occupied_tracks() {
        let clips = timeline.clips_on_track(track_type, number);
        for pair in clips.windows(2) {
            assert!(
                pair[0].end_sec() <= pair[1].timeline_start_sec + 1e-9,
                "overlap between '{}' and '{}'",
                pair[0].clip_id,
                pair[1].clip_id
            );
        }
    }
}

#[tokio::test]
async fn split_partitions_source_ranges_exactly() {
    // Clip "x" on V1 at [0, 6) with source_in 10s. Splitting at 2.0 yields
    // x_p1 [0, 2) with source 10..12 and x_p2 [2, 6) with source 12..16.
    let mut c = clip("x", TrackType::Video, 1, 0.0, 6.0);
    c.source_in_sec = 10.0;
    c.source_out_sec = 16.0;
    let mut state = state_with(vec![c]);

    let message = expect_continue(
        run_tool(
            &tools::split_clip::SplitClipTool,
            &mut state,
            json!({ "clip_id": "x", "split_time": "00:00:02.000" }),
        )
        .await,
    );
    assert!(message.starts_with("Success"), "unexpected: {message}");

    assert!(state.timeline.find_clip_by_id("x").is_none());
    let p1 = state.timeline.find_clip_by_id("x_p1").unwrap();
    let p2 = state.timeline.find_clip_by_id("x_p2").unwrap();

    assert_eq!(p1.timeline_start_sec, 0.0);
    assert_eq!(p1.duration_sec, 2.0);
    assert_eq!(p1.source_in_sec, 10.0);
    assert_eq!(p1.source_out_sec, 12.0);

    assert_eq!(p2.timeline_start_sec, 2.0);
    assert_eq!(p2.duration_sec, 4.0);
    assert_eq!(p2.source_in_sec, 12.0);
    assert_eq!(p2.source_out_sec, 16.0);

    // Durations sum exactly to the original.
    assert_eq!(p1.duration_sec + p2.duration_sec, 6.0);
    assert_eq!(p1.source_out_sec, p2.source_in_sec);
    assert_invariants(&state.timeline);
}

#[tokio::test]
async fn split_rejects_cut_at_clip_edges() {
    let mut state = state_with(vec![clip("x", TrackType::Video, 1, 1.0, 3.0)]);
    for bad_time in ["00:00:01.000", "00:00:04.000", "00:00:09.000"] {
        let message = expect_continue(
            run_tool(
                &tools::split_clip::SplitClipTool,
                &mut state,
                json!({ "clip_id": "x", "split_time": bad_time }),
            )
            .await,
        );
        assert!(message.starts_with("Error"), "accepted {bad_time}: {message}");
    }
    assert!(state.timeline.find_clip_by_id("x").is_some());
}

#[tokio::test]
async fn transform_upsert_then_null_removes_single_property() {
    // S-scenario: set position+scale at the clip start, then null the scale.
    let mut state = state_with(vec![clip("y", TrackType::Video, 1, 0.0, 5.0)]);

    expect_continue(
        run_tool(
            &tools::transform::TransformTool,
            &mut state,
            json!({ "transformations": [{
                "clip_id": "y",
                "at_time": "00:00:00.000",
                "properties": { "position": [0.5, 0.5], "scale": 1.0 }
            }]}),
        )
        .await,
    );
    expect_continue(
        run_tool(
            &tools::transform::TransformTool,
            &mut state,
            json!({ "transformations": [{
                "clip_id": "y",
                "at_time": "00:00:00.000",
                "properties": { "scale": null }
            }]}),
        )
        .await,
    );

    let y = state.timeline.find_clip_by_id("y").unwrap();
    assert_eq!(y.transformations.len(), 1);
    let keyframe = &y.transformations[0];
    assert_eq!(keyframe.time_sec, 0.0);
    assert_eq!(keyframe.position, Some((0.5, 0.5)));
    assert_eq!(keyframe.scale, None);
}

#[tokio::test]
async fn transform_rejects_time_outside_clip() {
    let mut state = state_with(vec![clip("y", TrackType::Video, 1, 0.0, 5.0)]);
    let message = expect_continue(
        run_tool(
            &tools::transform::TransformTool,
            &mut state,
            json!({ "transformations": [{
                "clip_id": "y",
                "at_time": "00:00:08.000",
                "properties": { "scale": 0.5 }
            }]}),
        )
        .await,
    );
    assert!(message.contains("outside its duration"));
    assert!(state
        .timeline
        .find_clip_by_id("y")
        .unwrap()
        .transformations
        .is_empty());
}

#[tokio::test]
async fn ripple_delete_closes_the_gap_on_one_track() {
    let mut state = state_with(vec![
        clip("c1", TrackType::Video, 1, 0.0, 3.0),
        clip("c2", TrackType::Video, 1, 3.0, 2.0),
        clip("c3", TrackType::Video, 1, 5.0, 1.0),
        clip("other", TrackType::Video, 2, 4.0, 2.0),
    ]);

    let message = expect_continue(
        run_tool(
            &tools::delete_clips::DeleteClipsTool,
            &mut state,
            json!({ "clip_ids": ["c2"], "ripple": true }),
        )
        .await,
    );
    assert!(message.contains("ripple-deleted"));

    let find = |id: &str| state.timeline.find_clip_by_id(id).unwrap().timeline_start_sec;
    assert_eq!(find("c1"), 0.0);
    assert_eq!(find("c3"), 3.0);
    // Clips on other tracks are untouched.
    assert_eq!(find("other"), 4.0);
    assert_invariants(&state.timeline);
}

#[tokio::test]
async fn ripple_with_multiple_targets_is_rejected() {
    let mut state = state_with(vec![
        clip("c1", TrackType::Video, 1, 0.0, 3.0),
        clip("c2", TrackType::Video, 1, 3.0, 2.0),
    ]);
    let message = expect_continue(
        run_tool(
            &tools::delete_clips::DeleteClipsTool,
            &mut state,
            json!({ "clip_ids": ["c1", "c2"], "ripple": true }),
        )
        .await,
    );
    assert!(message.starts_with("Error"));
    assert_eq!(state.timeline.len(), 2);
}

#[tokio::test]
async fn batch_delete_leaves_gaps_and_reports_mixed_results() {
    let mut state = state_with(vec![
        clip("c1", TrackType::Video, 1, 0.0, 3.0),
        clip("c2", TrackType::Video, 1, 3.0, 2.0),
    ]);
    let message = expect_continue(
        run_tool(
            &tools::delete_clips::DeleteClipsTool,
            &mut state,
            json!({ "clip_ids": ["c1", "ghost"] }),
        )
        .await,
    );
    assert!(message.contains("mixed results"));
    assert!(message.contains("ghost"));
    // c2 keeps its position: no ripple.
    assert_eq!(
        state.timeline.find_clip_by_id("c2").unwrap().timeline_start_sec,
        3.0
    );
}

#[tokio::test]
async fn failed_add_clips_leaves_the_timeline_untouched() {
    let assets = tempfile::tempdir().unwrap();
    let mut state = state_with(vec![clip("c1", TrackType::Video, 1, 0.0, 3.0)]);
    state.assets_directory = assets.path().to_path_buf();
    let before: Vec<String> = state
        .timeline
        .clips()
        .iter()
        .map(|c| format!("{}@{}", c.clip_id, c.timeline_start_sec))
        .collect();

    let message = expect_continue(
        run_tool(
            &tools::add_clips::AddClipsTool,
            &mut state,
            json!({ "clips": [
                { "clip_id": "ok", "source_filename": "missing.mp4", "video_track": "V1",
                  "source_in": "00:00:00.000", "source_out": "00:00:02.000" },
                { "clip_id": "also_bad", "source_filename": "gone.mp4", "video_track": "V1",
                  "source_in": "00:00:00.000", "source_out": "00:00:01.000" }
            ]}),
        )
        .await,
    );

    assert!(message.starts_with("Operation failed. Please fix the following errors:"));
    // Both failures are aggregated into one report.
    assert!(message.contains("#1 ('ok')"));
    assert!(message.contains("#2 ('also_bad')"));

    let after: Vec<String> = state
        .timeline
        .clips()
        .iter()
        .map(|c| format!("{}@{}", c.clip_id, c.timeline_start_sec))
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn add_clips_requires_a_target_track() {
    let assets = tempfile::tempdir().unwrap();
    let mut state = state_with(vec![]);
    state.assets_directory = assets.path().to_path_buf();

    let message = expect_continue(
        run_tool(
            &tools::add_clips::AddClipsTool,
            &mut state,
            json!({ "clips": [
                { "clip_id": "c", "source_filename": "a.mp4",
                  "source_in": "00:00:00.000", "source_out": "00:00:02.000" }
            ]}),
        )
        .await,
    );
    assert!(message.contains("At least one of 'video_track' or 'audio_track'"));
}

#[tokio::test]
async fn summary_reflects_engine_state() {
    let mut state = state_with(vec![
        clip("c1", TrackType::Video, 1, 0.0, 3.0),
        clip("c2", TrackType::Video, 1, 5.0, 2.0),
        clip("music", TrackType::Audio, 1, 0.0, 7.0),
    ]);

    let report = expect_continue(
        run_tool(&tools::timeline_summary::TimelineSummaryTool, &mut state, json!({})).await,
    );
    assert!(report.contains("Total Duration: 7.000s"));
    assert!(report.contains("Total Tracks: 2"));
    assert!(report.contains("[GAP from 3.000s to 5.000s"));
    assert!(report.contains("--- Track A1 (audio) ---"));
}

#[test]
fn topmost_clip_wins_by_track_number() {
    let mut timeline = Timeline::new();
    timeline.add_clip(clip("base", TrackType::Video, 1, 0.0, 10.0));
    timeline.add_clip(clip("overlay", TrackType::Video, 2, 2.0, 3.0));

    assert_eq!(timeline.topmost_clip_at(3.0).unwrap().clip_id, "overlay");
    assert_eq!(timeline.topmost_clip_at(6.0).unwrap().clip_id, "base");
}

#[test]
fn mlt_round_trip_preserves_every_placement() {
    let sequence = SequenceProperties::default();
    let mut timeline = Timeline::new();
    timeline.add_clip(clip("c1", TrackType::Video, 1, 1.0, 2.0));
    let mut c2 = clip("c2", TrackType::Video, 2, 0.5, 4.0);
    c2.source_in_sec = 3.0;
    c2.source_out_sec = 7.0;
    timeline.add_clip(c2);
    timeline.add_clip(clip("a1", TrackType::Audio, 1, 0.0, 5.0));

    let xml = mlt::timeline_to_mlt_xml(&timeline, sequence);
    let parsed = mlt::parse_mlt_clips(&xml).unwrap();
    assert_eq!(parsed.len(), timeline.len());

    for original in timeline.clips() {
        let matching = parsed
            .iter()
            .find(|p| {
                p.track_type == original.track_type
                    && p.track_number == original.track_number
                    && (p.timeline_start_sec - original.timeline_start_sec).abs() < 1e-6
            })
            .unwrap_or_else(|| panic!("missing {}", original.clip_id));
        assert_eq!(matching.source_path, original.source_path);
        assert!((matching.source_in_sec - original.source_in_sec).abs() < 1e-6);
        assert!((matching.duration_sec - original.duration_sec).abs() < 1e-6);
    }
}

#[test]
fn mlt_frame_math_matches_24fps_expectations() {
    // 24fps sequence, clip at 1.0s for 2.0s: blank of 24 frames then an
    // entry of 48; a preview at 1.5s renders frame 36.
    let sequence = SequenceProperties::default();
    let mut timeline = Timeline::new();
    timeline.add_clip(clip("c", TrackType::Video, 1, 1.0, 2.0));

    let xml = mlt::timeline_to_mlt_xml(&timeline, sequence);
    assert!(xml.contains("<blank length=\"24\"/>"));
    assert!(xml.contains("length=\"48\"/>"));

    assert_eq!((1.5f64 * sequence.fps).round() as i64, 36);
}

#[tokio::test]
async fn tool_catalog_survives_mutation_sequences() {
    // A small end-to-end battery: split, transform, delete, and verify the
    // invariants hold after every step.
    let mut c = clip("main", TrackType::Video, 1, 0.0, 8.0);
    c.transformations = vec![Keyframe {
        scale: Some(0.5),
        ..Keyframe::at(0.0)
    }];
    let mut state = state_with(vec![c, clip("tail", TrackType::Video, 1, 8.0, 2.0)]);

    expect_continue(
        run_tool(
            &tools::split_clip::SplitClipTool,
            &mut state,
            json!({ "clip_id": "main", "split_time": "00:00:04.000" }),
        )
        .await,
    );
    assert_invariants(&state.timeline);
    // Keyframes were copied onto both halves.
    assert!(!state
        .timeline
        .find_clip_by_id("main_p1")
        .unwrap()
        .transformations
        .is_empty());

    expect_continue(
        run_tool(
            &tools::transform::TransformTool,
            &mut state,
            json!({ "transformations": [{
                "clip_id": "main_p2",
                "properties": { "rotation": 90.0 },
                "interpolation": "hold"
            }]}),
        )
        .await,
    );
    assert_invariants(&state.timeline);

    expect_continue(
        run_tool(
            &tools::delete_clips::DeleteClipsTool,
            &mut state,
            json!({ "clip_ids": ["main_p1"], "ripple": true }),
        )
        .await,
    );
    assert_invariants(&state.timeline);
    assert_eq!(
        state
            .timeline
            .find_clip_by_id("main_p2")
            .unwrap()
            .timeline_start_sec,
        0.0
    );
    assert_eq!(state.timeline.duration(), 6.0);
}
