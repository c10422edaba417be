//! External media I/O: ffprobe metadata extraction and ffmpeg frame grabs.
//!
//! Both binaries are expected on PATH. Probing never returns `Err`; failures
//! travel in [`MediaInfo::error`] so tools can batch-report them to the
//! model.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;

use crate::models::MediaInfo;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// True when the path looks like a still-image source (by extension).
pub fn is_image_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Probes a media file with ffprobe and returns structured metadata.
pub fn probe_media_file(file_path: &Path) -> MediaInfo {
    let output = match Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(file_path)
        .output()
    {
        Ok(output) => output,
        Err(e) => return MediaInfo::from_error(format!("Failed to execute ffprobe: {e}")),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return MediaInfo::from_error(format!(
            "FFprobe failed to read the file. It may be corrupt. Error: {}",
            stderr.trim()
        ));
    }

    let parsed: serde_json::Value = match serde_json::from_slice(&output.stdout) {
        Ok(v) => v,
        Err(e) => return MediaInfo::from_error(format!("Failed to parse ffprobe output: {e}")),
    };

    let empty = Vec::new();
    let streams = parsed["streams"].as_array().unwrap_or(&empty);
    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"));
    let audio_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("audio"));

    if video_stream.is_none() && audio_stream.is_none() {
        return MediaInfo::from_error("Not a valid media file (no video or audio streams).");
    }

    // Prefer the most relevant stream's duration, falling back to the
    // container entry.
    let primary = video_stream.or(audio_stream).expect("one stream exists");
    let duration_sec = primary["duration"]
        .as_str()
        .or_else(|| parsed["format"]["duration"].as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let mut info = MediaInfo {
        duration_sec,
        has_video: video_stream.is_some(),
        has_audio: audio_stream.is_some(),
        ..Default::default()
    };

    if let Some(video) = video_stream {
        info.width = video["width"].as_u64().unwrap_or(0) as u32;
        info.height = video["height"].as_u64().unwrap_or(0) as u32;
        info.frame_rate = video["r_frame_rate"]
            .as_str()
            .and_then(parse_rational_frame_rate)
            .unwrap_or(0.0);
    }

    info
}

/// Parses an ffprobe rational frame rate (`30000/1001`), guarding against a
/// zero denominator.
fn parse_rational_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

/// Extracts one frame from a source file at `at_sec` into `out_path` (PNG).
pub fn extract_frame(source: &Path, at_sec: f64, out_path: &Path) -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-ss")
        .arg(format!("{at_sec:.3}"))
        .arg("-i")
        .arg(source)
        .args(["-frames:v", "1", "-y"])
        .arg(out_path)
        .output()
        .context("Failed to execute ffmpeg")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "FFmpeg failed to extract frame at {:.3}s from '{}': {}",
            at_sec,
            source.display(),
            stderr.trim()
        ));
    }
    Ok(())
}

/// Extracts an audio segment to an AAC/m4a file, for transcription.
pub fn extract_audio_segment(
    source: &Path,
    start_sec: Option<f64>,
    end_sec: Option<f64>,
    out_path: &Path,
) -> Result<()> {
    let mut command = Command::new("ffmpeg");
    if let Some(start) = start_sec {
        command.arg("-ss").arg(format!("{start:.3}"));
    }
    if let Some(end) = end_sec {
        command.arg("-to").arg(format!("{end:.3}"));
    }
    command
        .arg("-i")
        .arg(source)
        .args(["-vn", "-acodec", "aac", "-y"])
        .arg(out_path);

    let output = command.output().context("Failed to execute ffmpeg")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "FFmpeg failed to extract audio from '{}': {}",
            source.display(),
            stderr.trim()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_is_image_source() {
        assert!(is_image_source(&PathBuf::from("/a/title_card.png")));
        assert!(is_image_source(&PathBuf::from("/a/photo.JPEG")));
        assert!(!is_image_source(&PathBuf::from("/a/interview.mp4")));
        assert!(!is_image_source(&PathBuf::from("/a/noext")));
    }

    #[test]
    fn test_parse_rational_frame_rate() {
        assert_eq!(parse_rational_frame_rate("30/1"), Some(30.0));
        let ntsc = parse_rational_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_rational_frame_rate("0/0"), None);
        assert_eq!(parse_rational_frame_rate("garbage"), None);
    }
}
