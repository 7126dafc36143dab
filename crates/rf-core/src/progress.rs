//! The unified progress/ETA value emitted by every stage.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progress snapshot for one running stage.
///
/// Ephemeral: a fresh model is built for every progress event and never
/// persisted. `percent` is clamped to `[0, 100]` and is monotonically
/// non-decreasing within one stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressModel {
    /// Percent complete, 0.0 -- 100.0.
    pub percent: f64,
    /// Wall-clock time since the stage started.
    pub elapsed: Duration,
    /// Estimated time remaining, when a trustworthy rate exists.
    pub eta: Option<Duration>,
    /// Tool-reported current rate (frames/s for encoders, percent/s otherwise).
    pub rate: Option<f64>,
    /// Empirical average rate over the whole run so far.
    pub average_rate: Option<f64>,
    /// Frames processed, for frame-accurate stages.
    pub frames_done: Option<u64>,
    /// Total frame count, for frame-accurate stages.
    pub frames_total: Option<u64>,
    /// Pass number for multi-pass encodes (1-based); supplied by the stage.
    pub pass: Option<u32>,
}

impl ProgressModel {
    /// A zeroed model, useful as the initial value before any line matched.
    pub fn zero() -> Self {
        Self {
            percent: 0.0,
            elapsed: Duration::ZERO,
            eta: None,
            rate: None,
            average_rate: None,
            frames_done: None,
            frames_total: None,
            pass: None,
        }
    }
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::zero()
    }
}
