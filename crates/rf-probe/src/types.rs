//! Probed media information.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use rf_core::job::{AudioStream, VideoStream};

/// Snapshot of a media file's container and stream metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// The probed file.
    pub file_path: PathBuf,
    /// File size in bytes.
    pub file_size: u64,
    /// Container format name (ffprobe `format_name`).
    pub container: String,
    /// Total duration, when the container reports one.
    pub duration: Option<Duration>,
    /// Overall bit rate in bits/s.
    pub bit_rate: Option<u64>,
    /// Video streams in container order.
    pub video_tracks: Vec<VideoTrackInfo>,
    /// Audio streams in container order.
    pub audio_tracks: Vec<AudioTrackInfo>,
    /// Subtitle streams in container order.
    pub subtitle_tracks: Vec<SubtitleTrackInfo>,
}

/// One probed video stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoTrackInfo {
    pub index: u32,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
    /// Exact frame count when the container carries one, otherwise derived
    /// from duration x frame rate.
    pub frame_count: Option<u64>,
    pub bit_rate: Option<u64>,
}

/// One probed audio stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub index: u32,
    pub codec: String,
    pub channels: u32,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
    pub bit_rate: Option<u64>,
}

/// One probed subtitle stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleTrackInfo {
    pub index: u32,
    pub codec: String,
    pub language: Option<String>,
    pub forced: bool,
}

impl MediaInfo {
    /// First video track, if any.
    pub fn primary_video(&self) -> Option<&VideoTrackInfo> {
        self.video_tracks.first()
    }

    /// Apply this snapshot's primary video track onto a job's video
    /// descriptor. Missing fields keep their previous values.
    pub fn apply_to_video(&self, stream: &mut VideoStream) {
        stream.stream_size = self.file_size;
        if let Some(v) = self.primary_video() {
            if let Some(fc) = v.frame_count {
                stream.frame_count = fc;
            }
            if let Some(fr) = v.frame_rate {
                stream.frame_rate = fr;
            }
            if let Some(br) = v.bit_rate.or(self.bit_rate) {
                stream.bitrate = br;
            }
        }
    }

    /// Apply this snapshot's first audio track onto a job's audio
    /// descriptor.
    pub fn apply_to_audio(&self, stream: &mut AudioStream) {
        stream.stream_size = self.file_size;
        if let Some(a) = self.audio_tracks.first() {
            stream.channels = a.channels;
            if let Some(br) = a.bit_rate.or(self.bit_rate) {
                stream.bitrate = br;
            }
        }
    }
}
