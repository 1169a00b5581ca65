#![allow(dead_code)]

use anyhow::{Context, Result};
use std::path::Path;
/// FFmpeg helpers for end-to-end tests
use std::process::{Command, Stdio};

/// Check if FFmpeg is available
pub fn is_ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check whether the installed ffmpeg ships a given encoder
pub fn has_encoder(name: &str) -> bool {
    Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .any(|l| l.split_whitespace().nth(1) == Some(name))
        })
        .unwrap_or(false)
}

/// Generate a sine tone encoded as mp3 at the given bitrate
pub fn generate_test_tone(output_path: &Path, duration_secs: f32, kbps: u32) -> Result<()> {
    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
        .arg(format!(
            "sine=frequency=440:sample_rate=44100:duration={}",
            duration_secs
        ))
        .args(["-acodec", "libmp3lame", "-b:a"])
        .arg(format!("{}k", kbps))
        .arg(output_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("Failed to execute ffmpeg for test tone generation")?;

    if !status.success() {
        anyhow::bail!("ffmpeg failed to generate test tone");
    }

    Ok(())
}
