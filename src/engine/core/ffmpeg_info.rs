use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use super::types::AudioFormat;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

/// Container-level facts about an audio file
#[derive(Debug, Clone, PartialEq)]
pub struct AudioProbe {
    pub duration_s: Option<f64>,
    pub bit_rate_kbps: Option<u32>,
}

/// Check if the encoder is available and return its version line
pub fn ffmpeg_version(encoder_path: &Path) -> Result<String> {
    let output = Command::new(encoder_path)
        .arg("-version")
        .output()
        .with_context(|| {
            format!(
                "Failed to execute {}. Is ffmpeg installed and in PATH?",
                encoder_path.display()
            )
        })?;

    if !output.status.success() {
        anyhow::bail!("ffmpeg command failed with status: {}", output.status);
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let first_line = version_output.lines().next().unwrap_or("Unknown version");

    Ok(first_line.to_string())
}

/// Which target formats the encoder build can actually produce
///
/// `libfdk_aac` in particular is missing from most distribution builds.
pub fn supported_formats(encoder_path: &Path) -> Result<Vec<(AudioFormat, bool)>> {
    let output = Command::new(encoder_path)
        .arg("-hide_banner")
        .arg("-encoders")
        .output()
        .context("Failed to list ffmpeg encoders")?;

    if !output.status.success() {
        anyhow::bail!("ffmpeg -encoders failed with status: {}", output.status);
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    Ok(parse_encoder_listing(&listing))
}

/// Parse `ffmpeg -encoders` output into per-format availability
pub fn parse_encoder_listing(listing: &str) -> Vec<(AudioFormat, bool)> {
    let names: Vec<&str> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .collect();

    AudioFormat::ALL
        .iter()
        .map(|f| (*f, names.contains(&f.codec())))
        .collect()
}

/// Probe an audio file's duration and overall bitrate with ffprobe
pub fn probe_audio(ffprobe_path: &Path, path: &Path) -> Result<AudioProbe> {
    let output = Command::new(ffprobe_path)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg(path)
        .output()
        .context("Failed to execute ffprobe")?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's `-show_format` JSON
pub fn parse_ffprobe_output(json: &str) -> Result<AudioProbe> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON output")?;

    let duration_s = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok());

    // ffprobe reports bits per second
    let bit_rate_kbps = probe
        .format
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok())
        .map(|bps| (bps / 1000) as u32);

    Ok(AudioProbe {
        duration_s,
        bit_rate_kbps,
    })
}

/// ffprobe normally sits next to ffmpeg
pub fn sibling_ffprobe(encoder_path: &Path) -> std::path::PathBuf {
    match encoder_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("ffprobe"),
        _ => std::path::PathBuf::from("ffprobe"),
    }
}
