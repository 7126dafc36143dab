//! Media re-probing.
//!
//! After any stage that produces a new media file, the pipeline calls back
//! into this crate to refresh container/stream metadata on the job's stream
//! descriptors. This is the sole mechanism by which downstream stages learn
//! the true properties of intermediate files.

mod ffprobe;
mod types;

pub use ffprobe::{parse_ffprobe_json, probe};
pub use types::{AudioTrackInfo, MediaInfo, SubtitleTrackInfo, VideoTrackInfo};
