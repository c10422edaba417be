//! Timeline data model.
//!
//! The timeline is a flat, sorted set of clips. Each clip is one placement of
//! a source-media region onto one `(track type, track number)` lane; keyframed
//! affine transformations hang off individual clips. Invariants (unique clip
//! ids, per-track non-overlap, valid source ranges) are enforced by the
//! mutation tools; the model keeps ordering and answers queries.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Track kind. Video lanes composite above each other (higher numbers on
/// top); audio lanes play in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
}

impl TrackType {
    /// Single-letter NLE prefix (`V` / `A`).
    pub fn letter(&self) -> char {
        match self {
            TrackType::Video => 'V',
            TrackType::Audio => 'A',
        }
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackType::Video => write!(f, "video"),
            TrackType::Audio => write!(f, "audio"),
        }
    }
}

/// Keyframe interpolation method, in the vocabulary the model uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Linear,
    #[default]
    EasyEase,
    Hold,
}

/// A time-stamped set of affine properties attached to a clip.
///
/// `time_sec` is relative to the clip's start on the timeline. All other
/// properties are independently optional; `position` and `anchor_point` are
/// normalized coordinates where `(0, 0)` is the top-left of the sequence
/// frame (or of the clip itself, for the anchor) and `(1, 1)` the
/// bottom-right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_point: Option<(f64, f64)>,
    #[serde(default)]
    pub interpolation: Interpolation,
}

impl Keyframe {
    pub fn at(time_sec: f64) -> Self {
        Self {
            time_sec,
            position: None,
            scale: None,
            rotation: None,
            opacity: None,
            anchor_point: None,
            interpolation: Interpolation::default(),
        }
    }

    /// True when at least one transformable property is set.
    pub fn has_properties(&self) -> bool {
        self.position.is_some()
            || self.scale.is_some()
            || self.rotation.is_some()
            || self.opacity.is_some()
            || self.anchor_point.is_some()
    }
}

/// One placement of a source-media region on one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineClip {
    /// Unique, human-meaningful identifier within the session.
    pub clip_id: String,

    /// Absolute path to the backing media file.
    pub source_path: PathBuf,

    /// Start of the used region within the source, in seconds.
    pub source_in_sec: f64,

    /// End of the used region within the source, in seconds.
    pub source_out_sec: f64,

    /// Probed total duration of the source file.
    pub source_total_duration_sec: f64,

    /// Placement on the composition, in seconds.
    pub timeline_start_sec: f64,

    pub duration_sec: f64,

    pub track_type: TrackType,

    /// 1-indexed track number.
    pub track_number: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub source_frame_rate: f64,

    pub source_width: u32,

    pub source_height: u32,

    /// Whether the source file carries an audio stream.
    pub has_audio: bool,

    /// Keyframes sorted ascending by `time_sec`; empty for untransformed
    /// clips.
    #[serde(default)]
    pub transformations: Vec<Keyframe>,
}

impl TimelineClip {
    /// End time of the clip on the timeline.
    pub fn end_sec(&self) -> f64 {
        self.timeline_start_sec + self.duration_sec
    }

    /// True when `t` falls within the clip's half-open `[start, end)` range.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.timeline_start_sec && t < self.end_sec()
    }
}

/// Composition-level frame rate and dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceProperties {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for SequenceProperties {
    fn default() -> Self {
        Self {
            fps: 24.0,
            width: 1920,
            height: 1080,
        }
    }
}

impl SequenceProperties {
    /// Duration of one frame, in seconds.
    pub fn frame_duration(&self) -> f64 {
        if self.fps > 0.0 {
            1.0 / self.fps
        } else {
            0.0
        }
    }
}

/// The in-memory composition: a flat clip set kept sorted by
/// `(track type, track number, start time)`, plus the derived sequence
/// properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    clips: Vec<TimelineClip>,
    sequence: Option<SequenceProperties>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a timeline with explicitly pinned sequence properties.
    pub fn with_sequence(sequence: SequenceProperties) -> Self {
        Self {
            clips: Vec::new(),
            sequence: Some(sequence),
        }
    }

    pub fn clips(&self) -> &[TimelineClip] {
        &self.clips
    }

    /// Direct mutable access for the mutation tools; callers must `resort`
    /// after changing placements.
    pub fn clips_mut(&mut self) -> &mut Vec<TimelineClip> {
        &mut self.clips
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    /// Restores the canonical `(track type, track number, start)` order.
    pub fn resort(&mut self) {
        self.clips.sort_by(|a, b| {
            (a.track_type, a.track_number)
                .cmp(&(b.track_type, b.track_number))
                .then(a.timeline_start_sec.total_cmp(&b.timeline_start_sec))
        });
    }

    pub fn add_clip(&mut self, clip: TimelineClip) {
        self.clips.push(clip);
        self.resort();
    }

    /// Removes a clip by id. Returns whether a clip was found and removed.
    pub fn delete_clip(&mut self, clip_id: &str) -> bool {
        let before = self.clips.len();
        self.clips.retain(|c| c.clip_id != clip_id);
        self.clips.len() != before
    }

    pub fn find_clip_by_id(&self, clip_id: &str) -> Option<&TimelineClip> {
        self.clips.iter().find(|c| c.clip_id == clip_id)
    }

    pub fn find_clip_by_id_mut(&mut self, clip_id: &str) -> Option<&mut TimelineClip> {
        self.clips.iter_mut().find(|c| c.clip_id == clip_id)
    }

    pub fn clip_id_exists(&self, clip_id: &str) -> bool {
        self.clips.iter().any(|c| c.clip_id == clip_id)
    }

    /// All clips on one specific track, in start order.
    pub fn clips_on_track(&self, track_type: TrackType, track_number: u32) -> Vec<&TimelineClip> {
        self.clips
            .iter()
            .filter(|c| c.track_type == track_type && c.track_number == track_number)
            .collect()
    }

    /// End time of the last clip on one specific track.
    pub fn track_duration(&self, track_type: TrackType, track_number: u32) -> f64 {
        self.clips
            .iter()
            .filter(|c| c.track_type == track_type && c.track_number == track_number)
            .map(|c| c.end_sec())
            .fold(0.0, f64::max)
    }

    /// Total timeline duration: the end point of the last clip across all
    /// tracks.
    pub fn duration(&self) -> f64 {
        self.clips.iter().map(|c| c.end_sec()).fold(0.0, f64::max)
    }

    /// The set of occupied `(track type, track number)` lanes.
    pub fn occupied_tracks(&self) -> Vec<(TrackType, u32)> {
        let mut tracks: Vec<(TrackType, u32)> = self
            .clips
            .iter()
            .map(|c| (c.track_type, c.track_number))
            .collect();
        tracks.sort();
        tracks.dedup();
        tracks
    }

    /// The unique source paths referenced by the timeline, sorted.
    pub fn unique_sources(&self) -> Vec<&Path> {
        let mut sources: Vec<&Path> = self.clips.iter().map(|c| c.source_path.as_path()).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Among all video clips active at `t`, the one on the highest-numbered
    /// track. Ties cannot occur because clips on one track never overlap.
    pub fn topmost_clip_at(&self, t: f64) -> Option<&TimelineClip> {
        self.clips
            .iter()
            .filter(|c| c.track_type == TrackType::Video && c.contains(t))
            .max_by_key(|c| c.track_number)
    }

    /// Returns the sequence properties, pinning them on first resolution.
    ///
    /// An explicit override wins. Otherwise the first clip with video
    /// dimensions and a positive frame rate establishes the sequence for the
    /// rest of the session. With no such clip yet, the default
    /// `(24.0, 1920x1080)` is returned without pinning, so a later video
    /// clip can still establish the sequence.
    pub fn sequence_properties(&mut self) -> SequenceProperties {
        if let Some(sequence) = self.sequence {
            return sequence;
        }
        let inferred = self.clips.iter().find_map(|c| {
            if c.source_width > 0 && c.source_height > 0 && c.source_frame_rate > 0.0 {
                Some(SequenceProperties {
                    fps: c.source_frame_rate,
                    width: c.source_width,
                    height: c.source_height,
                })
            } else {
                None
            }
        });
        match inferred {
            Some(sequence) => {
                self.sequence = Some(sequence);
                sequence
            }
            None => SequenceProperties::default(),
        }
    }

    /// The currently pinned sequence properties, if any, without inferring.
    pub fn pinned_sequence(&self) -> Option<SequenceProperties> {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(id: &str, track_type: TrackType, track_number: u32, start: f64, dur: f64) -> TimelineClip {
        TimelineClip {
            clip_id: id.to_string(),
            source_path: PathBuf::from("/assets/a.mp4"),
            source_in_sec: 0.0,
            source_out_sec: dur,
            source_total_duration_sec: 100.0,
            timeline_start_sec: start,
            duration_sec: dur,
            track_type,
            track_number,
            description: None,
            source_frame_rate: 24.0,
            source_width: 1920,
            source_height: 1080,
            has_audio: true,
            transformations: Vec::new(),
        }
    }

    #[test]
    fn test_sort_order_is_track_then_start() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("a2", TrackType::Audio, 2, 0.0, 1.0));
        timeline.add_clip(clip("v1_late", TrackType::Video, 1, 5.0, 1.0));
        timeline.add_clip(clip("v1_early", TrackType::Video, 1, 0.0, 1.0));
        timeline.add_clip(clip("v2", TrackType::Video, 2, 0.0, 1.0));

        let ids: Vec<&str> = timeline.clips().iter().map(|c| c.clip_id.as_str()).collect();
        assert_eq!(ids, vec!["v1_early", "v1_late", "v2", "a2"]);
    }

    #[test]
    fn test_durations() {
        let mut timeline = Timeline::new();
        assert_eq!(timeline.duration(), 0.0);
        timeline.add_clip(clip("c1", TrackType::Video, 1, 0.0, 3.0));
        timeline.add_clip(clip("c2", TrackType::Video, 1, 3.0, 2.0));
        timeline.add_clip(clip("c3", TrackType::Audio, 1, 0.0, 8.0));
        assert_eq!(timeline.track_duration(TrackType::Video, 1), 5.0);
        assert_eq!(timeline.track_duration(TrackType::Video, 2), 0.0);
        assert_eq!(timeline.duration(), 8.0);
    }

    #[test]
    fn test_topmost_clip_prefers_highest_track() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("low", TrackType::Video, 1, 0.0, 10.0));
        timeline.add_clip(clip("high", TrackType::Video, 3, 2.0, 4.0));
        timeline.add_clip(clip("audio", TrackType::Audio, 1, 0.0, 10.0));

        assert_eq!(timeline.topmost_clip_at(1.0).unwrap().clip_id, "low");
        assert_eq!(timeline.topmost_clip_at(3.0).unwrap().clip_id, "high");
        // Half-open range: the upper edge belongs to the next clip.
        assert_eq!(timeline.topmost_clip_at(6.0).unwrap().clip_id, "low");
        assert!(timeline.topmost_clip_at(12.0).is_none());
    }

    #[test]
    fn test_delete_clip() {
        let mut timeline = Timeline::new();
        timeline.add_clip(clip("c1", TrackType::Video, 1, 0.0, 3.0));
        assert!(timeline.delete_clip("c1"));
        assert!(!timeline.delete_clip("c1"));
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_sequence_inference_pins_on_first_video_clip() {
        let mut timeline = Timeline::new();
        // Nothing to infer from yet: default, not pinned.
        assert_eq!(timeline.sequence_properties(), SequenceProperties::default());
        assert!(timeline.pinned_sequence().is_none());

        let mut c = clip("c1", TrackType::Video, 1, 0.0, 3.0);
        c.source_frame_rate = 30.0;
        c.source_width = 1280;
        c.source_height = 720;
        timeline.add_clip(c);

        let props = timeline.sequence_properties();
        assert_eq!(props.fps, 30.0);
        assert_eq!((props.width, props.height), (1280, 720));

        // A later, different clip does not change the pinned sequence.
        let mut other = clip("c2", TrackType::Video, 1, 3.0, 3.0);
        other.source_frame_rate = 60.0;
        timeline.add_clip(other);
        assert_eq!(timeline.sequence_properties().fps, 30.0);
    }

    #[test]
    fn test_explicit_sequence_override_wins() {
        let mut timeline = Timeline::with_sequence(SequenceProperties {
            fps: 25.0,
            width: 1024,
            height: 576,
        });
        timeline.add_clip(clip("c1", TrackType::Video, 1, 0.0, 3.0));
        assert_eq!(timeline.sequence_properties().fps, 25.0);
    }
}
