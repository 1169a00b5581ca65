use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::error::EngineError;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: ([^,]*),").expect("valid duration regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\S+)").expect("valid time regex"));
static BIT_RATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate:\s?(\d+)\s?kb/s").expect("valid bitrate regex"));

/// Convert an `H:MM:SS` or `H:MM:SS.cs` timestamp into seconds
pub fn time_to_seconds(time: &str) -> Result<f64, EngineError> {
    let malformed = || EngineError::MalformedTimestamp(time.to_string());

    let mut parts = time.trim().split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, "0"));

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if ![hours, minutes, whole, fraction].into_iter().all(digits) {
        return Err(malformed());
    }

    let hours: u64 = hours.parse().map_err(|_| malformed())?;
    let minutes: u64 = minutes.parse().map_err(|_| malformed())?;
    let whole: u64 = whole.parse().map_err(|_| malformed())?;
    let fraction: f64 = format!("0.{}", fraction).parse().map_err(|_| malformed())?;

    let total = hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes.checked_mul(60)?))
        .and_then(|hm| hm.checked_add(whole))
        .ok_or_else(malformed)?;

    Ok(total as f64 + fraction)
}

/// Facts extracted from a single log line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogUpdate {
    /// Total duration, only on the line where it is first detected
    pub duration: Option<f64>,
    /// floor(elapsed / duration * 100), unclamped
    pub progress: Option<u32>,
    /// Source bitrate in kb/s, only on the line where it is first detected
    pub source_bit_rate: Option<u32>,
    /// A timestamp on this line could not be parsed
    pub malformed: Option<String>,
}

/// Stateful parser for the encoder's stderr log
#[derive(Debug, Clone, Default)]
pub struct LogParser {
    pub duration_s: Option<f64>,
    pub source_bit_rate: Option<u32>,
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str) -> LogUpdate {
        let mut update = LogUpdate::default();

        if self.duration_s.is_none() {
            if let Some(caps) = DURATION_RE.captures(line) {
                match time_to_seconds(&caps[1]) {
                    Ok(secs) => {
                        debug!(duration_s = secs, "detected input duration");
                        self.duration_s = Some(secs);
                        update.duration = Some(secs);
                    }
                    Err(e) => update.malformed = Some(e.to_string()),
                }
            }
        }

        if let Some(duration) = self.duration_s {
            if let Some(caps) = TIME_RE.captures(line) {
                match time_to_seconds(&caps[1]) {
                    Ok(_) if duration <= 0.0 => {
                        update.malformed = Some("zero duration".to_string());
                    }
                    Ok(elapsed) => update.progress = self.progress_pct(elapsed),
                    Err(e) => update.malformed = Some(e.to_string()),
                }
            }
        }

        if self.source_bit_rate.is_none() {
            if let Some(kbps) = BIT_RATE_RE
                .captures(line)
                .and_then(|caps| caps[1].parse::<u32>().ok())
            {
                debug!(source_kbps = kbps, "detected source bitrate");
                self.source_bit_rate = Some(kbps);
                update.source_bit_rate = Some(kbps);
            }
        }

        if let Some(reason) = &update.malformed {
            debug!(line, reason = %reason, "skipping unparseable timestamp");
        }

        update
    }

    /// Elapsed percentage for a given elapsed time, if duration is known
    pub fn progress_pct(&self, elapsed_s: f64) -> Option<u32> {
        self.duration_s
            .filter(|d| *d > 0.0)
            .map(|d| (elapsed_s / d * 100.0).floor() as u32)
    }
}
