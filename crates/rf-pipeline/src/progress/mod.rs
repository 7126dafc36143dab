//! Progress parsing: per-tool line dialects unified into one model.
//!
//! Each wrapped tool prints progress in its own textual dialect, on its own
//! stream, at its own cadence. A [`ProgressParser`] turns one raw output line
//! into a [`ProgressUpdate`] when the line matches the tool's dialect; the
//! [`Eta`] tracker owned by the stage runner then folds the update into a
//! full [`ProgressModel`] with elapsed/rate/remaining figures.
//!
//! Lines that match no pattern are not errors; the runner forwards them to
//! the diagnostic log.

use std::time::{Duration, Instant};

use rf_core::ProgressModel;

mod frames;
mod percent;
mod time;

pub use frames::{DecodeFrameParser, FrameProgressParser};
pub use percent::{
    BarePercentParser, PercentParser, PhasedPercentParser, PrefixedPercentParser,
};
pub use time::TimeProgressParser;

/// What one matched progress line said.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Percent complete reported by (or derived from) the line, unclamped.
    pub percent: f64,
    /// Frames processed so far, for frame-accurate dialects.
    pub frames_done: Option<u64>,
    /// Total frame count, when the line itself carries one.
    pub frames_total: Option<u64>,
    /// Tool-reported instantaneous rate (fps for encoders).
    pub rate: Option<f64>,
}

impl ProgressUpdate {
    /// An update carrying only a percentage.
    pub fn percent(percent: f64) -> Self {
        Self {
            percent,
            frames_done: None,
            frames_total: None,
            rate: None,
        }
    }
}

/// One tool-output dialect.
///
/// Stateful: frame-ratio parsers carry the assumed total, phased parsers
/// remember which phase they are in. A parser instance lives for exactly one
/// stage run.
pub trait ProgressParser: Send {
    /// Parse one line. `None` means the line is not progress output.
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate>;
}

/// Elapsed/rate/remaining bookkeeping for one stage run.
///
/// Percent is clamped to `[0, 100]` and never allowed to move backwards.
/// Rates are only trusted once at least one whole second has elapsed, so a
/// progress line arriving milliseconds after launch cannot produce a wild
/// estimate.
#[derive(Debug)]
pub struct Eta {
    started: Instant,
    last_percent: f64,
}

impl Eta {
    /// Start tracking now.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start tracking from an explicit instant. Tests use this to simulate
    /// elapsed time without sleeping.
    pub fn starting_at(started: Instant) -> Self {
        Self {
            started,
            last_percent: 0.0,
        }
    }

    /// Fold one update into a full progress model.
    pub fn model(&mut self, update: &ProgressUpdate, pass: Option<u32>) -> ProgressModel {
        let percent = update.percent.clamp(0.0, 100.0).max(self.last_percent);
        self.last_percent = percent;

        let elapsed = self.started.elapsed();
        let mut model = ProgressModel {
            percent,
            elapsed,
            eta: None,
            rate: update.rate,
            average_rate: None,
            frames_done: update.frames_done,
            frames_total: update.frames_total,
            pass,
        };

        if elapsed.as_secs() >= 1 {
            let secs = elapsed.as_secs_f64();
            model.average_rate = Some(match update.frames_done {
                Some(done) => done as f64 / secs,
                None => percent / secs,
            });

            let percent_rate = percent / secs;
            if percent_rate > 0.0 {
                let remaining = ((100.0 - percent) / percent_rate).max(0.0);
                model.eta = Some(Duration::from_secs_f64(remaining));
            }
        }

        model
    }
}

impl Default for Eta {
    fn default() -> Self {
        Self::new()
    }
}
