//! Timeline → MLT XML translation.
//!
//! The generated project drives both final renders and single-frame previews
//! through `melt`, so a preview is bit-faithful to the export. Structure:
//! one profile, one producer per unique source, one playlist per track (gaps
//! as exact-frame blanks), and a tractor whose multitrack orders video tracks
//! bottom-up before audio (MLT layers the last track on top). Keyframed
//! clips get an `affine` filter scoped to their frame range and track.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};

use crate::models::timeline::{Interpolation, SequenceProperties, Timeline, TimelineClip, TrackType};
use crate::services::escape_xml;

/// Normalized position/anchor/scale/opacity resolved for one keyframe time,
/// with every property carried forward so MLT keyframe strings are complete.
#[derive(Debug, Clone)]
struct MasterKeyframe {
    time_sec: f64,
    position: (f64, f64),
    scale: f64,
    rotation: f64,
    opacity: f64,
    anchor_point: (f64, f64),
    interpolation: Interpolation,
}

/// Frame rate as a rational, preferring exact NTSC fractions for the common
/// drop-frame rates.
pub fn frame_rate_fraction(fps: f64) -> (u32, u32) {
    for (rate, num) in [(23.976, 24000), (29.97, 30000), (59.94, 60000)] {
        if (fps - rate).abs() < 0.01 {
            return (num, 1001);
        }
    }
    if (fps - fps.round()).abs() < 1e-9 {
        (fps.round() as u32, 1)
    } else {
        ((fps * 1000.0).round() as u32, 1000)
    }
}

fn interpolation_keyword(interpolation: Interpolation) -> &'static str {
    match interpolation {
        Interpolation::EasyEase => "smooth",
        Interpolation::Linear => "linear",
        Interpolation::Hold => "discrete",
    }
}

/// Translates the timeline into a complete MLT XML project string.
pub fn timeline_to_mlt_xml(timeline: &Timeline, sequence: SequenceProperties) -> String {
    let SequenceProperties { fps, width, height } = sequence;
    let (fr_num, fr_den) = frame_rate_fraction(fps);

    let mut xml = String::from("<mlt>\n");
    let _ = writeln!(
        xml,
        "  <profile name=\"cutline-profile\" width=\"{width}\" height=\"{height}\" \
         frame_rate_num=\"{fr_num}\" frame_rate_den=\"{fr_den}\" \
         sample_aspect_num=\"1\" sample_aspect_den=\"1\" \
         display_aspect_num=\"{width}\" display_aspect_den=\"{height}\" colorspace=\"709\"/>"
    );

    // One producer per unique source file, addressed by absolute path.
    let sources = timeline.unique_sources();
    let mut producer_ids: HashMap<&std::path::Path, String> = HashMap::new();
    for (i, source) in sources.iter().enumerate() {
        let pid = format!("producer_{i}");
        let _ = writeln!(xml, "  <producer id=\"{pid}\">");
        let _ = writeln!(
            xml,
            "    <property name=\"resource\">{}</property>",
            escape_xml(&source.display().to_string())
        );
        xml.push_str("  </producer>\n");
        producer_ids.insert(*source, pid);
    }

    // One playlist per occupied track, video lanes first so that MLT's
    // last-track-on-top rule matches the compositing order.
    let tracks = timeline.occupied_tracks();
    let mut track_indices: HashMap<(TrackType, u32), usize> = HashMap::new();

    for (i, &(track_type, track_number)) in tracks.iter().enumerate() {
        track_indices.insert((track_type, track_number), i);
        let _ = writeln!(xml, "  <playlist id=\"playlist_{track_type}{track_number}\">");

        let mut last_end_frames: i64 = 0;
        for clip in timeline.clips_on_track(track_type, track_number) {
            let start_frames = (clip.timeline_start_sec * fps).round() as i64;
            let gap_frames = start_frames - last_end_frames;
            if gap_frames > 0 {
                let _ = writeln!(xml, "    <blank length=\"{gap_frames}\"/>");
            }

            let producer = &producer_ids[clip.source_path.as_path()];
            let in_frames = (clip.source_in_sec * fps).round() as i64;
            let duration_frames = (clip.duration_sec * fps).round() as i64;
            let _ = writeln!(
                xml,
                "    <entry producer=\"{producer}\" in=\"{in_frames}\" length=\"{duration_frames}\"/>"
            );
            last_end_frames = start_frames + duration_frames;
        }
        xml.push_str("  </playlist>\n");
    }

    xml.push_str("  <tractor id=\"main_tractor\">\n    <multitrack>\n");
    for &(track_type, track_number) in &tracks {
        let _ = writeln!(
            xml,
            "      <track producer=\"playlist_{track_type}{track_number}\"/>"
        );
    }
    xml.push_str("    </multitrack>\n");

    // Affine filters: applied to the tractor but constrained to one clip's
    // frame range and track index.
    for clip in timeline.clips() {
        if clip.track_type != TrackType::Video || clip.transformations.is_empty() {
            continue;
        }
        let Some(&track_index) = track_indices.get(&(clip.track_type, clip.track_number)) else {
            continue;
        };

        let master = master_keyframes(clip);
        if master.is_empty() {
            continue;
        }

        let start_frames = (clip.timeline_start_sec * fps).round() as i64;
        let end_frames = start_frames + (clip.duration_sec * fps).round() as i64 - 1;

        let _ = writeln!(xml, "    <filter in=\"{start_frames}\" out=\"{end_frames}\">");
        xml.push_str("      <property name=\"mlt_service\">affine</property>\n");
        let _ = writeln!(xml, "      <property name=\"track\">{track_index}</property>");
        let _ = writeln!(
            xml,
            "      <property name=\"transition.rect\">{}</property>",
            build_rect_keyframes(&master, clip, sequence)
        );
        let _ = writeln!(
            xml,
            "      <property name=\"transition.fix_rotate_z\">{}</property>",
            build_rotation_keyframes(&master, fps)
        );
        // Required for the affine filter to honor source alpha, which opacity
        // animation depends on.
        xml.push_str("      <property name=\"transition.b_alpha\">1</property>\n");
        xml.push_str("    </filter>\n");
    }

    xml.push_str("  </tractor>\n</mlt>\n");
    xml
}

/// Builds the unified keyframe list for a clip: the union of all distinct
/// keyframe times, each carrying a complete property set, with unspecified
/// properties inherited from the previous keyframe (or the defaults).
fn master_keyframes(clip: &TimelineClip) -> Vec<MasterKeyframe> {
    let mut times: Vec<f64> = clip.transformations.iter().map(|kf| kf.time_sec).collect();
    times.sort_by(f64::total_cmp);
    times.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let mut last = MasterKeyframe {
        time_sec: 0.0,
        position: (0.5, 0.5),
        scale: 1.0,
        rotation: 0.0,
        opacity: 100.0,
        anchor_point: (0.5, 0.5),
        interpolation: Interpolation::EasyEase,
    };

    let mut master = Vec::with_capacity(times.len());
    for t in times {
        let mut current = last.clone();
        current.time_sec = t;
        for kf in &clip.transformations {
            if (kf.time_sec - t).abs() < 1e-9 {
                if let Some(position) = kf.position {
                    current.position = position;
                }
                if let Some(scale) = kf.scale {
                    current.scale = scale;
                }
                if let Some(rotation) = kf.rotation {
                    current.rotation = rotation;
                }
                if let Some(opacity) = kf.opacity {
                    current.opacity = opacity;
                }
                if let Some(anchor) = kf.anchor_point {
                    current.anchor_point = anchor;
                }
                current.interpolation = kf.interpolation;
            }
        }
        master.push(current.clone());
        last = current;
    }
    master
}

/// Keyframe string for the affine `rect` property:
/// `frame=X/Y:WxH:opacity:interp;...`.
///
/// Positions and anchors are normalized throughout the engine; this is the
/// single place they become pixels. The rect X/Y is the top-left of the
/// transformed box: the anchor lands on the requested position, so
/// `x = pos_x·seq_w − anchor_x·src_w·scale`.
fn build_rect_keyframes(
    master: &[MasterKeyframe],
    clip: &TimelineClip,
    sequence: SequenceProperties,
) -> String {
    let parts: Vec<String> = master
        .iter()
        .map(|kf| {
            let frame = (kf.time_sec * sequence.fps).round() as i64;
            let w = clip.source_width as f64 * kf.scale;
            let h = clip.source_height as f64 * kf.scale;
            let x = kf.position.0 * sequence.width as f64
                - kf.anchor_point.0 * clip.source_width as f64 * kf.scale;
            let y = kf.position.1 * sequence.height as f64
                - kf.anchor_point.1 * clip.source_height as f64 * kf.scale;
            // MLT expects the rect opacity component normalized to [0, 1].
            let opacity = kf.opacity / 100.0;
            format!(
                "{frame}={x:.3}/{y:.3}:{w:.3}x{h:.3}:{opacity:.2}:{}",
                interpolation_keyword(kf.interpolation)
            )
        })
        .collect();
    format!("[{}]", parts.join(";"))
}

/// Keyframe string for the rotation property: `frame=value:interp;...`.
fn build_rotation_keyframes(master: &[MasterKeyframe], fps: f64) -> String {
    let parts: Vec<String> = master
        .iter()
        .map(|kf| {
            let frame = (kf.time_sec * fps).round() as i64;
            format!(
                "{frame}={}:{}",
                kf.rotation,
                interpolation_keyword(kf.interpolation)
            )
        })
        .collect();
    format!("[{}]", parts.join(";"))
}

/// One clip placement as read back from generated project XML.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClip {
    pub source_path: PathBuf,
    pub source_in_sec: f64,
    pub duration_sec: f64,
    pub timeline_start_sec: f64,
    pub track_type: TrackType,
    pub track_number: u32,
}

/// Parses clip placements back out of a generated MLT project.
///
/// Used to verify that the XML emitter preserves every placement exactly.
pub fn parse_mlt_clips(xml: &str) -> Result<Vec<ParsedClip>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fps = 0.0f64;
    let mut producers: HashMap<String, PathBuf> = HashMap::new();
    let mut clips = Vec::new();

    let mut current_producer: Option<String> = None;
    let mut reading_resource = false;
    let mut current_track: Option<(TrackType, u32)> = None;
    let mut position_frames: i64 = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let mut attrs: HashMap<String, String> = HashMap::new();
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    let value = attr.unescape_value()?.to_string();
                    attrs.insert(key, value);
                }
                match e.name().as_ref() {
                    b"profile" => {
                        let num: f64 = attrs
                            .get("frame_rate_num")
                            .and_then(|v| v.parse().ok())
                            .ok_or_else(|| anyhow!("profile missing frame_rate_num"))?;
                        let den: f64 = attrs
                            .get("frame_rate_den")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(1.0);
                        if den <= 0.0 {
                            bail!("profile has a zero frame rate denominator");
                        }
                        fps = num / den;
                    }
                    b"producer" => {
                        current_producer = attrs.get("id").cloned();
                    }
                    b"property" => {
                        reading_resource = current_producer.is_some()
                            && attrs.get("name").map(String::as_str) == Some("resource");
                    }
                    b"playlist" => {
                        let id = attrs
                            .get("id")
                            .ok_or_else(|| anyhow!("playlist missing id"))?;
                        current_track = Some(parse_playlist_track(id)?);
                        position_frames = 0;
                    }
                    b"blank" => {
                        let length: i64 = attrs
                            .get("length")
                            .and_then(|v| v.parse().ok())
                            .ok_or_else(|| anyhow!("blank missing length"))?;
                        position_frames += length;
                    }
                    b"entry" => {
                        if fps <= 0.0 {
                            bail!("entry encountered before profile frame rate");
                        }
                        let (track_type, track_number) = current_track
                            .ok_or_else(|| anyhow!("entry outside of a playlist"))?;
                        let producer = attrs
                            .get("producer")
                            .ok_or_else(|| anyhow!("entry missing producer"))?;
                        let source_path = producers
                            .get(producer)
                            .cloned()
                            .ok_or_else(|| anyhow!("entry references unknown producer '{producer}'"))?;
                        let in_frames: i64 = attrs
                            .get("in")
                            .and_then(|v| v.parse().ok())
                            .ok_or_else(|| anyhow!("entry missing in"))?;
                        let length: i64 = attrs
                            .get("length")
                            .and_then(|v| v.parse().ok())
                            .ok_or_else(|| anyhow!("entry missing length"))?;

                        clips.push(ParsedClip {
                            source_path,
                            source_in_sec: in_frames as f64 / fps,
                            duration_sec: length as f64 / fps,
                            timeline_start_sec: position_frames as f64 / fps,
                            track_type,
                            track_number,
                        });
                        position_frames += length;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if reading_resource {
                    if let Some(pid) = current_producer.clone() {
                        producers.insert(pid, PathBuf::from(t.unescape()?.to_string()));
                    }
                    reading_resource = false;
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"producer" => current_producer = None,
                b"playlist" => current_track = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed MLT XML: {e}"),
            _ => {}
        }
    }

    Ok(clips)
}

fn parse_playlist_track(playlist_id: &str) -> Result<(TrackType, u32)> {
    let rest = playlist_id
        .strip_prefix("playlist_")
        .ok_or_else(|| anyhow!("unexpected playlist id '{playlist_id}'"))?;
    if let Some(number) = rest.strip_prefix("video") {
        return Ok((TrackType::Video, number.parse()?));
    }
    if let Some(number) = rest.strip_prefix("audio") {
        return Ok((TrackType::Audio, number.parse()?));
    }
    bail!("unexpected playlist id '{playlist_id}'")
}
