//! Percent-based dialects: tools that print their own percentage.

use regex::Regex;

use super::{ProgressParser, ProgressUpdate};

/// Labeled percentage lines: `<label>: NN%`.
///
/// eac3to prints `process: 42%` while demuxing a plain file.
#[derive(Debug)]
pub struct PercentParser {
    pattern: Regex,
}

impl PercentParser {
    /// Match lines labeled with `label`.
    pub fn new(label: &str) -> Self {
        let pattern = Regex::new(&format!(
            r"(?i)^{}:\s*(\d+(?:\.\d+)?)%",
            regex::escape(label)
        ))
        .unwrap();
        Self { pattern }
    }
}

impl ProgressParser for PercentParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = self.pattern.captures(line)?;
        let pct: f64 = caps[1].parse().ok()?;
        Some(ProgressUpdate::percent(pct))
    }
}

/// Two-phase percentage lines with a half-scale offset.
///
/// Some tools run a full 0-100% analysis phase before the real 0-100% work
/// phase (eac3to on BluRay sources: `analyze: NN%` then `process: NN%`).
/// The first phase maps to 0-50 overall, the second to 50-100.
#[derive(Debug)]
pub struct PhasedPercentParser {
    first: Regex,
    second: Regex,
}

impl PhasedPercentParser {
    /// Match `first_label: NN%` as 0-50 and `second_label: NN%` as 50-100.
    pub fn new(first_label: &str, second_label: &str) -> Self {
        let make = |label: &str| {
            Regex::new(&format!(
                r"(?i)^{}:\s*(\d+(?:\.\d+)?)%",
                regex::escape(label)
            ))
            .unwrap()
        };
        Self {
            first: make(first_label),
            second: make(second_label),
        }
    }
}

impl ProgressParser for PhasedPercentParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        if let Some(caps) = self.first.captures(line) {
            let pct: f64 = caps[1].parse().ok()?;
            return Some(ProgressUpdate::percent(pct / 2.0));
        }
        if let Some(caps) = self.second.captures(line) {
            let pct: f64 = caps[1].parse().ok()?;
            return Some(ProgressUpdate::percent(50.0 + pct / 2.0));
        }
        None
    }
}

/// Bare percentage lines: `NN.N%` and nothing else.
///
/// tsMuxeR rewrites one console line with these while muxing.
#[derive(Debug)]
pub struct BarePercentParser {
    pattern: Regex,
}

impl BarePercentParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"^(\d+(?:\.\d+)?)%$").unwrap(),
        }
    }
}

impl Default for BarePercentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for BarePercentParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = self.pattern.captures(line)?;
        let pct: f64 = caps[1].parse().ok()?;
        Some(ProgressUpdate::percent(pct))
    }
}

/// `Progress: NN%` lines from the MKVToolNix tools (mkvmerge, mkvextract).
#[derive(Debug)]
pub struct PrefixedPercentParser {
    pattern: Regex,
}

impl PrefixedPercentParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"(?i)^Progress:\s*(\d+(?:\.\d+)?)%").unwrap(),
        }
    }
}

impl Default for PrefixedPercentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for PrefixedPercentParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = self.pattern.captures(line)?;
        let pct: f64 = caps[1].parse().ok()?;
        Some(ProgressUpdate::percent(pct))
    }
}
