//! Frame-ratio dialects: encoders whose percentage is derived from a frame
//! counter against a probed total rather than printed by the tool.

use regex::Regex;

use super::{ProgressParser, ProgressUpdate};

/// Frame-counter progress for video encoders.
///
/// Recognizes three formats from the ffmpeg/x264 family:
///
/// - ffmpeg status lines: `frame=  250 fps= 25.0 ... bitrate=4000.0kbits/s`
/// - x264 full reports: `[ 25.0%] 250/1000 frames, 25.00 fps, 4000.00 kb/s`
/// - x264 compact reports: `250 frames: 25.00 fps, 4000.00 kb/s`
///
/// The total frame count comes from the source probe; a full-format x264
/// line carries its own total and overrides the assumed one when they
/// disagree (the probe can be off by a few frames on VC-1 sources).
#[derive(Debug)]
pub struct FrameProgressParser {
    total: u64,
    ffmpeg: Regex,
    full: Regex,
    compact: Regex,
}

impl FrameProgressParser {
    /// Create a parser assuming `total_frames` frames of work.
    pub fn new(total_frames: u64) -> Self {
        Self {
            total: total_frames,
            ffmpeg: Regex::new(r"frame=\s*(\d+)\s+fps=\s*(\d+(?:\.\d+)?)").unwrap(),
            full: Regex::new(
                r"^\[\s*\d+(?:\.\d+)?%\]\s*(\d+)/(\d+)\s+frames,\s*(\d+(?:\.\d+)?)\s+fps",
            )
            .unwrap(),
            compact: Regex::new(r"^(\d+)\s+frames:\s*(\d+(?:\.\d+)?)\s+fps").unwrap(),
        }
    }

    fn ratio_update(&self, done: u64, rate: Option<f64>) -> ProgressUpdate {
        let percent = if self.total > 0 {
            done as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };
        ProgressUpdate {
            percent,
            frames_done: Some(done),
            frames_total: (self.total > 0).then_some(self.total),
            rate,
        }
    }
}

impl ProgressParser for FrameProgressParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        if let Some(caps) = self.full.captures(line) {
            let done: u64 = caps[1].parse().ok()?;
            let total: u64 = caps[2].parse().ok()?;
            if total > 0 {
                self.total = total;
            }
            let rate: f64 = caps[3].parse().ok()?;
            return Some(self.ratio_update(done, Some(rate)));
        }
        if let Some(caps) = self.compact.captures(line) {
            let done: u64 = caps[1].parse().ok()?;
            let rate: f64 = caps[2].parse().ok()?;
            return Some(self.ratio_update(done, Some(rate)));
        }
        if let Some(caps) = self.ffmpeg.captures(line) {
            let done: u64 = caps[1].parse().ok()?;
            let rate: f64 = caps[2].parse().ok()?;
            return Some(self.ratio_update(done, Some(rate)));
        }
        None
    }
}

/// `Decoding frame N/M` lines from BDSup2Sub.
#[derive(Debug)]
pub struct DecodeFrameParser {
    pattern: Regex,
}

impl DecodeFrameParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"Decoding frame (\d+)/(\d+)").unwrap(),
        }
    }
}

impl Default for DecodeFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for DecodeFrameParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = self.pattern.captures(line)?;
        let done: u64 = caps[1].parse().ok()?;
        let total: u64 = caps[2].parse().ok()?;
        if total == 0 {
            return None;
        }
        Some(ProgressUpdate {
            percent: done as f64 / total as f64 * 100.0,
            frames_done: Some(done),
            frames_total: Some(total),
            rate: None,
        })
    }
}
