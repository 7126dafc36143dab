//! Timestamp dialect: ffmpeg's `time=HH:MM:SS.ff` status field, measured
//! against the probed source duration. Used where no frame counter exists
//! (audio decodes).

use regex::Regex;

use super::{ProgressParser, ProgressUpdate};

/// Progress from ffmpeg `size=... time=HH:MM:SS.ff ...` status lines.
#[derive(Debug)]
pub struct TimeProgressParser {
    duration_secs: f64,
    pattern: Regex,
}

impl TimeProgressParser {
    /// Create a parser for a source of `duration_secs` seconds.
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            pattern: Regex::new(r"time=(\d+):(\d{2}):(\d{2})(?:\.(\d+))?").unwrap(),
        }
    }
}

impl ProgressParser for TimeProgressParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        if self.duration_secs <= 0.0 {
            return None;
        }
        let caps = self.pattern.captures(line)?;
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        let frac = caps
            .get(4)
            .and_then(|m| format!("0.{}", m.as_str()).parse::<f64>().ok())
            .unwrap_or(0.0);

        let position = hours * 3600.0 + minutes * 60.0 + seconds + frac;
        Some(ProgressUpdate::percent(
            position / self.duration_secs * 100.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_field_against_duration() {
        let mut p = TimeProgressParser::new(600.0);
        let update = p
            .parse_line("size=    5120kB time=00:05:00.00 bitrate= 139.8kbits/s speed=12x")
            .unwrap();
        assert_eq!(update.percent, 50.0);
    }

    #[test]
    fn fractional_seconds() {
        let mut p = TimeProgressParser::new(10.0);
        let update = p.parse_line("size= 100kB time=00:00:02.50 bitrate=...").unwrap();
        assert_eq!(update.percent, 25.0);
    }

    #[test]
    fn zero_duration_never_matches() {
        let mut p = TimeProgressParser::new(0.0);
        assert!(p.parse_line("size= 100kB time=00:00:02.50").is_none());
    }

    #[test]
    fn lines_without_time_miss() {
        let mut p = TimeProgressParser::new(600.0);
        assert!(p.parse_line("Output #0, wav, to 'pipe:':").is_none());
    }
}
