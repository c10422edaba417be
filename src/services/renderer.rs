//! `melt` invocation for final renders and frame-precise previews.
//!
//! Rendering is pure translation: the timeline becomes an MLT project file
//! (see [`crate::services::mlt`]) and `melt` does the rest. The preview path
//! restricts the render to a single `in=out=frame` window and encodes MJPEG,
//! so previews come from exactly the pipeline that produces the final video.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;

use crate::models::timeline::{SequenceProperties, Timeline};
use crate::services::mlt;

/// Renders the complete timeline to a video file.
pub fn render_final_video(
    timeline: &Timeline,
    sequence: SequenceProperties,
    output_path: &Path,
    scratch_dir: &Path,
) -> Result<()> {
    tracing::info!(
        event = "render_start",
        output_path = %output_path.display(),
        duration_sec = timeline.duration(),
        "Starting final render via melt"
    );

    let project_path = scratch_dir.join("project.mlt");
    std::fs::write(&project_path, mlt::timeline_to_mlt_xml(timeline, sequence))
        .context("Failed to write MLT project file")?;

    let mut consumer_args = vec![
        format!("avformat:{}", output_path.display()),
        "acodec=aac".to_string(),
        "pix_fmt=yuv420p".to_string(),
    ];
    if cfg!(target_os = "macos") && std::env::consts::ARCH == "aarch64" {
        tracing::info!(event = "encoder_selected", encoder = "h264_videotoolbox");
        consumer_args.push("vcodec=h264_videotoolbox".to_string());
    } else {
        tracing::info!(event = "encoder_selected", encoder = "libx264");
        consumer_args.push("vcodec=libx264".to_string());
        consumer_args.push("preset=ultrafast".to_string());
        consumer_args.push(format!("threads={}", num_cpus::get().max(2)));
    }

    let output = Command::new("melt")
        .arg(&project_path)
        .arg("-consumer")
        .args(&consumer_args)
        .output()
        .context("Failed to execute melt. Is MLT installed and on PATH?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!(
            event = "render_failed",
            exit_code = output.status.code(),
            "melt exited with an error"
        );
        return Err(anyhow!("MLT rendering failed. Stderr: {}", stderr.trim()));
    }

    tracing::info!(
        event = "render_complete",
        output_path = %output_path.display(),
        "Final render complete"
    );
    Ok(())
}

/// Renders a single fully composited frame at `timeline_sec` to a JPEG.
pub fn render_preview_frame(
    timeline: &Timeline,
    sequence: SequenceProperties,
    timeline_sec: f64,
    output_path: &Path,
    scratch_dir: &Path,
) -> Result<()> {
    let project_path = scratch_dir.join(format!("preview_{timeline_sec:.3}.mlt"));
    std::fs::write(&project_path, mlt::timeline_to_mlt_xml(timeline, sequence))
        .context("Failed to write MLT project file")?;

    let frame = (timeline_sec * sequence.fps).round() as i64;

    // melt's `out` is inclusive, so in=out renders exactly one frame.
    let output = Command::new("melt")
        .arg(&project_path)
        .arg(format!("in={frame}"))
        .arg(format!("out={frame}"))
        .arg("-consumer")
        .arg(format!("avformat:{}", output_path.display()))
        .arg("vcodec=mjpeg")
        .output()
        .context("Failed to execute melt. Is MLT installed and on PATH?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "MLT preview rendering failed at {timeline_sec:.3}s. Stderr: {}",
            stderr.trim()
        ));
    }
    Ok(())
}
