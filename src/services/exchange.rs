//! Exchange-format timeline export: OTIO JSON and FCP7 XML.
//!
//! One exchange track per `(track type, track number)` lane; gaps become
//! explicit `Gap` records (OTIO) or frame-accurate start/end placement
//! (FCP7). Consolidation produces a portable package directory with a
//! `media/` folder holding a copy of every referenced source, and all
//! target URLs rewritten to `media/<basename>`.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::models::timeline::{SequenceProperties, Timeline, TimelineClip, TrackType};
use crate::services::escape_xml;

/// Exports the timeline next to the job's assets directory and returns the
/// path of the written `.otio` / `.xml` file.
pub fn export_timeline(
    timeline: &Timeline,
    sequence: SequenceProperties,
    assets_directory: &Path,
    output_filename: &str,
    consolidate: bool,
) -> Result<PathBuf> {
    let job_dir = assets_directory
        .parent()
        .unwrap_or(assets_directory)
        .to_path_buf();
    let output_dir = job_dir.join("output");
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Could not create output directory '{}'", output_dir.display()))?;

    let filename = Path::new(output_filename);
    let extension = filename
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let (final_path, base_dir) = if consolidate {
        let stem = filename
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("timeline");
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let package_dir = output_dir.join(format!("{stem}_{timestamp}"));
        let media_dir = package_dir.join("media");
        std::fs::create_dir_all(&media_dir).context("Failed to create package media directory")?;

        tracing::info!(
            event = "consolidation_start",
            package_dir = %package_dir.display(),
            "Consolidating project media"
        );
        for source in timeline.unique_sources() {
            let basename = source
                .file_name()
                .with_context(|| format!("Source '{}' has no file name", source.display()))?;
            std::fs::copy(source, media_dir.join(basename))
                .with_context(|| format!("Failed to copy '{}' into the package", source.display()))?;
        }

        (package_dir.join(output_filename), package_dir)
    } else {
        (output_dir.join(output_filename), output_dir)
    };

    let content = match extension.as_str() {
        "otio" => {
            let document = build_otio_timeline(timeline, sequence, &base_dir, consolidate);
            serde_json::to_string_pretty(&document)?
        }
        "xml" => build_fcp7_xml(timeline, sequence, &base_dir, consolidate),
        other => bail!("Unsupported file extension '.{other}'. Please use '.otio' or '.xml'."),
    };

    std::fs::write(&final_path, content)
        .with_context(|| format!("Failed to write '{}'", final_path.display()))?;
    tracing::info!(
        event = "timeline_exported",
        path = %final_path.display(),
        "Exchange file written"
    );
    Ok(final_path)
}

fn target_url(clip: &TimelineClip, base_dir: &Path, consolidated: bool) -> String {
    if consolidated {
        let basename = clip
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("media/{basename}")
    } else {
        relative_path(base_dir, &clip.source_path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Relative path from `base` to `target` (both assumed absolute), walking up
/// with `..` where the prefixes diverge.
fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base_components: Vec<_> = base.components().collect();
    let target_components: Vec<_> = target.components().collect();

    let common = base_components
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component);
    }
    relative
}

fn is_ntsc_rate(fps: f64) -> bool {
    (fps - 23.976).abs() < 0.01 || (fps - 29.97).abs() < 0.01
}

// --- OTIO JSON ---

fn rational_time(seconds: f64, rate: f64) -> Value {
    json!({
        "OTIO_SCHEMA": "RationalTime.1",
        "rate": rate,
        "value": seconds * rate,
    })
}

fn time_range(start_sec: f64, duration_sec: f64, rate: f64) -> Value {
    json!({
        "OTIO_SCHEMA": "TimeRange.1",
        "start_time": rational_time(start_sec, rate),
        "duration": rational_time(duration_sec, rate),
    })
}

fn build_otio_timeline(
    timeline: &Timeline,
    sequence: SequenceProperties,
    base_dir: &Path,
    consolidated: bool,
) -> Value {
    let fps = sequence.fps;
    let mut tracks = Vec::new();

    for (track_type, track_number) in timeline.occupied_tracks() {
        let mut children = Vec::new();
        let mut cursor = 0.0f64;

        for clip in timeline.clips_on_track(track_type, track_number) {
            let gap = clip.timeline_start_sec - cursor;
            if gap > 0.001 {
                children.push(json!({
                    "OTIO_SCHEMA": "Gap.1",
                    "name": "Gap",
                    "metadata": {},
                    "effects": [],
                    "markers": [],
                    "source_range": time_range(0.0, gap, fps),
                }));
            }
            children.push(build_otio_clip(clip, fps, base_dir, consolidated));
            cursor = clip.end_sec();
        }

        tracks.push(json!({
            "OTIO_SCHEMA": "Track.1",
            "name": format!("{}{}", track_type.letter(), track_number),
            "kind": if track_type == TrackType::Video { "Video" } else { "Audio" },
            "metadata": {},
            "effects": [],
            "markers": [],
            "source_range": null,
            "children": children,
        }));
    }

    json!({
        "OTIO_SCHEMA": "Timeline.1",
        "name": "Cutline Edit",
        "global_start_time": null,
        "metadata": {
            "fcp_xml": {
                "rate": {
                    "timebase": format!("{}", fps.round() as i64),
                    "ntsc": if is_ntsc_rate(fps) { "TRUE" } else { "FALSE" },
                },
                "media": {
                    "video": {
                        "format": {
                            "samplecharacteristics": {
                                "width": format!("{}", sequence.width),
                                "height": format!("{}", sequence.height),
                                "pixelaspectratio": "square",
                                "anamorphic": "FALSE",
                                "fielddominance": "none",
                            }
                        }
                    }
                },
            }
        },
        "tracks": {
            "OTIO_SCHEMA": "Stack.1",
            "name": "tracks",
            "metadata": {},
            "effects": [],
            "markers": [],
            "source_range": null,
            "children": tracks,
        },
    })
}

fn build_otio_clip(clip: &TimelineClip, fps: f64, base_dir: &Path, consolidated: bool) -> Value {
    let mut media_metadata = json!({});
    if clip.source_width > 0 && clip.source_height > 0 {
        media_metadata["fcp_xml"]["media"]["video"] = json!({
            "samplecharacteristics": {
                "width": format!("{}", clip.source_width),
                "height": format!("{}", clip.source_height),
                "pixelaspectratio": "square",
            },
            "rate": {
                "timebase": format!("{}", clip.source_frame_rate.round() as i64),
                "ntsc": if is_ntsc_rate(clip.source_frame_rate) { "TRUE" } else { "FALSE" },
            },
        });
    }
    if clip.has_audio {
        media_metadata["fcp_xml"]["media"]["audio"] =
            json!({ "samplecharacteristics": { "samplerate": "48000" } });
    }

    let mut clip_metadata = json!({});
    if !clip.transformations.is_empty() {
        // Keyframes travel in clip metadata with unset fields omitted, so
        // other tools can parse them without schema knowledge.
        let transforms: Vec<Value> = clip
            .transformations
            .iter()
            .map(|kf| serde_json::to_value(kf).unwrap_or_else(|_| json!({})))
            .collect();
        clip_metadata["cutline_transforms"] = json!(transforms);
    }

    json!({
        "OTIO_SCHEMA": "Clip.1",
        "name": clip.clip_id,
        "metadata": clip_metadata,
        "effects": [],
        "markers": [],
        "source_range": time_range(clip.source_in_sec, clip.duration_sec, fps),
        "media_reference": {
            "OTIO_SCHEMA": "ExternalReference.1",
            "name": "",
            "target_url": target_url(clip, base_dir, consolidated),
            "available_range": time_range(0.0, clip.source_total_duration_sec, fps),
            "metadata": media_metadata,
        },
    })
}

// --- FCP7 XML (xmeml v4) ---

fn build_fcp7_xml(
    timeline: &Timeline,
    sequence: SequenceProperties,
    base_dir: &Path,
    consolidated: bool,
) -> String {
    let fps = sequence.fps;
    let timebase = fps.round() as i64;
    let ntsc = if is_ntsc_rate(fps) { "TRUE" } else { "FALSE" };
    let to_frames = |seconds: f64| (seconds * fps).round() as i64;

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE xmeml>\n");
    xml.push_str("<xmeml version=\"4\">\n  <sequence id=\"sequence-1\">\n");
    xml.push_str("    <name>Cutline Edit</name>\n");
    let _ = writeln!(xml, "    <duration>{}</duration>", to_frames(timeline.duration()));
    let _ = writeln!(
        xml,
        "    <rate>\n      <timebase>{timebase}</timebase>\n      <ntsc>{ntsc}</ntsc>\n    </rate>"
    );
    xml.push_str("    <media>\n");

    // Unique file definitions are emitted in full once and referenced by id
    // afterwards, as FCP expects.
    let mut file_ids: Vec<(PathBuf, String)> = Vec::new();
    for (i, source) in timeline.unique_sources().iter().enumerate() {
        file_ids.push((source.to_path_buf(), format!("file-{}", i + 1)));
    }
    let mut emitted_files: Vec<&str> = Vec::new();

    for kind in [TrackType::Video, TrackType::Audio] {
        let tag = if kind == TrackType::Video { "video" } else { "audio" };
        let _ = writeln!(xml, "      <{tag}>");
        if kind == TrackType::Video {
            xml.push_str(
                "        <format>\n          <samplecharacteristics>\n",
            );
            let _ = writeln!(
                xml,
                "            <rate>\n              <timebase>{timebase}</timebase>\n              <ntsc>{ntsc}</ntsc>\n            </rate>"
            );
            let _ = writeln!(xml, "            <width>{}</width>", sequence.width);
            let _ = writeln!(xml, "            <height>{}</height>", sequence.height);
            xml.push_str(
                "            <pixelaspectratio>square</pixelaspectratio>\n            <anamorphic>FALSE</anamorphic>\n            <fielddominance>none</fielddominance>\n          </samplecharacteristics>\n        </format>\n",
            );
        }

        for (track_type, track_number) in timeline.occupied_tracks() {
            if track_type != kind {
                continue;
            }
            xml.push_str("        <track>\n");
            for clip in timeline.clips_on_track(track_type, track_number) {
                let file_id = file_ids
                    .iter()
                    .find(|(path, _)| path == &clip.source_path)
                    .map(|(_, id)| id.as_str())
                    .unwrap_or("file-0");

                let _ = writeln!(
                    xml,
                    "          <clipitem id=\"{}\">",
                    escape_xml(&clip.clip_id)
                );
                let _ = writeln!(xml, "            <name>{}</name>", escape_xml(&clip.clip_id));
                let _ = writeln!(
                    xml,
                    "            <duration>{}</duration>",
                    to_frames(clip.duration_sec)
                );
                let _ = writeln!(
                    xml,
                    "            <rate>\n              <timebase>{timebase}</timebase>\n              <ntsc>{ntsc}</ntsc>\n            </rate>"
                );
                let _ = writeln!(
                    xml,
                    "            <start>{}</start>",
                    to_frames(clip.timeline_start_sec)
                );
                let _ = writeln!(xml, "            <end>{}</end>", to_frames(clip.end_sec()));
                let _ = writeln!(xml, "            <in>{}</in>", to_frames(clip.source_in_sec));
                let _ = writeln!(
                    xml,
                    "            <out>{}</out>",
                    to_frames(clip.source_out_sec)
                );

                if emitted_files.contains(&file_id) {
                    let _ = writeln!(xml, "            <file id=\"{file_id}\"/>");
                } else {
                    let basename = clip
                        .source_path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let _ = writeln!(xml, "            <file id=\"{file_id}\">");
                    let _ = writeln!(xml, "              <name>{}</name>", escape_xml(&basename));
                    let _ = writeln!(
                        xml,
                        "              <pathurl>{}</pathurl>",
                        escape_xml(&target_url(clip, base_dir, consolidated))
                    );
                    let _ = writeln!(
                        xml,
                        "              <duration>{}</duration>",
                        to_frames(clip.source_total_duration_sec)
                    );
                    xml.push_str("            </file>\n");
                    emitted_files.push(file_id);
                }
                xml.push_str("          </clipitem>\n");
            }
            xml.push_str("        </track>\n");
        }
        let _ = writeln!(xml, "      </{tag}>");
    }

    xml.push_str("    </media>\n  </sequence>\n</xmeml>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timeline::Keyframe;

    fn sequence() -> SequenceProperties {
        SequenceProperties {
            fps: 24.0,
            width: 1920,
            height: 1080,
        }
    }

    fn clip(id: &str, track_type: TrackType, n: u32, start: f64, dur: f64) -> TimelineClip {
        TimelineClip {
            clip_id: id.to_string(),
            source_path: PathBuf::from("/job/assets/a.mp4"),
            source_in_sec: 1.0,
            source_out_sec: 1.0 + dur,
            source_total_duration_sec: 30.0,
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

    #[test]
    fn test_otio_structure_with_gap() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("c1", TrackType::Video, 1, 2.0, 3.0));
        let document = build_otio_timeline(&timeline, sequence(), Path::new("/job/output"), true);

        assert_eq!(document["OTIO_SCHEMA"], "Timeline.1");
        let children = document["tracks"]["children"].as_array().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0]["name"], "V1");
        assert_eq!(children[0]["kind"], "Video");

        let items = children[0]["children"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["OTIO_SCHEMA"], "Gap.1");
        assert_eq!(items[0]["source_range"]["duration"]["value"], 48.0);
        assert_eq!(items[1]["OTIO_SCHEMA"], "Clip.1");
        assert_eq!(
            items[1]["media_reference"]["target_url"],
            "media/a.mp4"
        );
        assert_eq!(items[1]["source_range"]["start_time"]["value"], 24.0);
    }

    #[test]
    fn test_otio_serializes_keyframes_without_null_fields() {
        let mut timeline = Timeline::new();
        let mut c = clip("c1", TrackType::Video, 1, 0.0, 3.0);
        c.transformations = vec![Keyframe {
            scale: Some(0.5),
            ..Keyframe::at(0.0)
        }];
        timeline.add_clip(c);

        let document = build_otio_timeline(&timeline, sequence(), Path::new("/job/output"), true);
        let transforms =
            &document["tracks"]["children"][0]["children"][0]["metadata"]["cutline_transforms"];
        let kf = &transforms.as_array().unwrap()[0];
        assert_eq!(kf["scale"], 0.5);
        assert!(kf.get("position").is_none());
        assert!(kf.get("rotation").is_none());
    }

    #[test]
    fn test_fcp7_xml_places_clips_by_frame() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("v", TrackType::Video, 1, 1.0, 2.0));
        timeline.add_clip(clip("a", TrackType::Audio, 1, 0.0, 2.0));
        let xml = build_fcp7_xml(&timeline, sequence(), Path::new("/job/output"), true);

        assert!(xml.contains("<xmeml version=\"4\">"));
        assert!(xml.contains("<start>24</start>"));
        assert!(xml.contains("<end>72</end>"));
        assert!(xml.contains("<in>24</in>"));
        assert!(xml.contains("<pathurl>media/a.mp4</pathurl>"));
        // Second reference to the same file collapses to an id-only element.
        assert!(xml.contains("<file id=\"file-1\"/>"));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/job/output"), Path::new("/job/assets/a.mp4")),
            PathBuf::from("../assets/a.mp4")
        );
        assert_eq!(
            relative_path(Path::new("/job"), Path::new("/job/assets/a.mp4")),
            PathBuf::from("assets/a.mp4")
        );
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let timeline = Timeline::new();
        let scratch = tempfile::tempdir().unwrap();
        let assets = scratch.path().join("assets");
        std::fs::create_dir_all(&assets).unwrap();
        let err = export_timeline(&timeline, sequence(), &assets, "edit.edl", false).unwrap_err();
        assert!(err.to_string().contains("Unsupported file extension"));
    }

    #[test]
    fn test_export_writes_otio_file() {
        let scratch = tempfile::tempdir().unwrap();
        let assets = scratch.path().join("assets");
        std::fs::create_dir_all(&assets).unwrap();

        let timeline = Timeline::new();
        let path = export_timeline(&timeline, sequence(), &assets, "edit.otio", false).unwrap();
        assert!(path.exists());
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed["OTIO_SCHEMA"], "Timeline.1");
    }
}
