//! Timestamp parsing and formatting.
//!
//! All tool arguments use the `HH:MM:SS.mmm` form; all timeline math uses
//! double-precision seconds. `seconds_to_hms` is the single source of truth
//! for time strings shown to the model, so every tool output stays at
//! millisecond precision.

use anyhow::{anyhow, bail, Result};

use crate::models::timeline::TrackType;

/// Argument-schema pattern for timestamps.
pub const TIME_PATTERN: &str = r"^\d{2}:\d{2}:\d{2}(\.\d{1,3})?$";

/// Argument-schema pattern for track specifiers (`V1`, `A2`, ...).
pub const TRACK_PATTERN: &str = r"^[VAva]\d+$";

/// Converts a `HH:MM:SS.mmm` string to total seconds.
///
/// Fractional digits are right-padded to milliseconds, so `"00:00:01.5"`
/// parses to 1.500s.
pub fn hms_to_seconds(time_str: &str) -> Result<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        bail!("Invalid time '{time_str}': expected HH:MM:SS.mmm");
    }

    let hours: u64 = parts[0]
        .parse()
        .map_err(|_| anyhow!("Invalid hours in '{time_str}'"))?;
    let minutes: u64 = parts[1]
        .parse()
        .map_err(|_| anyhow!("Invalid minutes in '{time_str}'"))?;

    let (sec_str, ms_str) = match parts[2].split_once('.') {
        Some((s, ms)) => (s, ms),
        None => (parts[2], ""),
    };
    let seconds: u64 = sec_str
        .parse()
        .map_err(|_| anyhow!("Invalid seconds in '{time_str}'"))?;

    let millis: u64 = if ms_str.is_empty() {
        0
    } else {
        if ms_str.len() > 3 || !ms_str.bytes().all(|b| b.is_ascii_digit()) {
            bail!("Invalid milliseconds in '{time_str}': expected 1-3 digits");
        }
        format!("{ms_str:0<3}").parse().expect("padded digits parse")
    };

    Ok(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds as f64 + millis as f64 / 1000.0)
}

/// Converts total seconds into a `HH:MM:SS.mmm` string.
///
/// Negative inputs clamp to zero. The conversion rounds to the millisecond
/// grid, so it round-trips exactly with [`hms_to_seconds`].
pub fn seconds_to_hms(seconds: f64) -> String {
    let clamped = if seconds < 0.0 { 0.0 } else { seconds };
    let total_ms = (clamped * 1000.0).round() as u64;

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

/// Parses an NLE-style track specifier (`V1`, `a2`, ...) into its type and
/// 1-indexed number.
pub fn parse_track(track: &str) -> Result<(TrackType, u32)> {
    let mut chars = track.chars();
    let kind = chars
        .next()
        .ok_or_else(|| anyhow!("Empty track specifier"))?;
    let track_type = match kind {
        'V' | 'v' => TrackType::Video,
        'A' | 'a' => TrackType::Audio,
        other => bail!("Invalid track '{track}': unknown track type '{other}'"),
    };

    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        bail!("Invalid track '{track}': expected a track number like 'V1' or 'A2'");
    }
    let number: u32 = digits
        .parse()
        .map_err(|_| anyhow!("Invalid track number in '{track}'"))?;
    if number == 0 {
        bail!("Invalid track '{track}': track numbers are 1-indexed");
    }

    Ok((track_type, number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hms_to_seconds() {
        assert_eq!(hms_to_seconds("00:00:00.000").unwrap(), 0.0);
        assert_eq!(hms_to_seconds("00:00:01.000").unwrap(), 1.0);
        assert_eq!(hms_to_seconds("00:01:01.500").unwrap(), 61.5);
        assert_eq!(hms_to_seconds("01:01:01.250").unwrap(), 3661.25);
        assert_eq!(hms_to_seconds("00:00:10").unwrap(), 10.0);
    }

    #[test]
    fn test_short_fraction_pads_to_millis() {
        assert_eq!(hms_to_seconds("00:00:01.5").unwrap(), 1.5);
        assert_eq!(hms_to_seconds("00:00:01.50").unwrap(), 1.5);
        assert_eq!(hms_to_seconds("00:00:01.05").unwrap(), 1.05);
    }

    #[test]
    fn test_seconds_to_hms() {
        assert_eq!(seconds_to_hms(0.0), "00:00:00.000");
        assert_eq!(seconds_to_hms(1.0), "00:00:01.000");
        assert_eq!(seconds_to_hms(61.5), "00:01:01.500");
        assert_eq!(seconds_to_hms(3661.25), "01:01:01.250");
        assert_eq!(seconds_to_hms(-4.2), "00:00:00.000");
    }

    #[test]
    fn test_round_trip_on_millisecond_grid() {
        for ms in [0u64, 1, 999, 1000, 1001, 59_999, 60_000, 3_599_999, 3_600_000, 86_399_999] {
            let seconds = ms as f64 / 1000.0;
            let formatted = seconds_to_hms(seconds);
            let parsed = hms_to_seconds(&formatted).unwrap();
            assert!(
                (parsed - seconds).abs() < 0.0005,
                "round trip failed for {ms}ms: {formatted} -> {parsed}"
            );
        }
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(hms_to_seconds("1:2:3").is_ok());
        assert!(hms_to_seconds("00:00").is_err());
        assert!(hms_to_seconds("00:00:aa").is_err());
        assert!(hms_to_seconds("00:00:01.1234").is_err());
    }

    #[test]
    fn test_parse_track() {
        assert_eq!(parse_track("V1").unwrap(), (TrackType::Video, 1));
        assert_eq!(parse_track("a2").unwrap(), (TrackType::Audio, 2));
        assert_eq!(parse_track("V12").unwrap(), (TrackType::Video, 12));
        assert!(parse_track("V0").is_err());
        assert!(parse_track("X1").is_err());
        assert!(parse_track("V").is_err());
        assert!(parse_track("V1a").is_err());
    }
}
