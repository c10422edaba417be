use serde::{Deserialize, Serialize};

/// Probed media file metadata.
///
/// Probe failures are reported through the `error` field rather than a
/// `Result`, so callers that probe many files can batch-report problems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container or stream duration in seconds (0.0 when unknown).
    pub duration_sec: f64,

    /// Video width in pixels (0 when no video stream).
    pub width: u32,

    /// Video height in pixels (0 when no video stream).
    pub height: u32,

    /// Video frame rate (0.0 when no video stream).
    pub frame_rate: f64,

    pub has_video: bool,

    pub has_audio: bool,

    /// Set when probing failed; all other fields are then meaningless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MediaInfo {
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}
