//! The job descriptor: the shared unit-of-work record passed through every
//! pipeline stage.
//!
//! Exactly one stage owns the descriptor at a time (enforced by the caller's
//! sequencing, not by locking here). Each stage mutates the descriptor in
//! turn: stream temp files, exit code, step position, temp-file registry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::JobId;

// ---------------------------------------------------------------------------
// Stream descriptors
// ---------------------------------------------------------------------------

/// Selected video stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoStream {
    /// Stream id in the source container (demuxer numbering).
    pub source_id: u32,
    /// Codec/format tag (e.g. "h264", "vc1", "mpeg2").
    pub format: String,
    /// ISO language code.
    pub language: String,
    /// Path of the file most recently produced for this stream.
    pub temp_file: Option<PathBuf>,
    /// Size in bytes of `temp_file`, when known.
    pub stream_size: u64,
    /// Total frame count from the last probe; drives frame-ratio progress.
    pub frame_count: u64,
    /// Frames per second from the last probe.
    pub frame_rate: f64,
    /// Bit rate in bits/s from the last probe.
    pub bitrate: u64,
}

/// Selected audio stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioStream {
    /// Stream id in the source container.
    pub source_id: u32,
    /// Codec/format tag (e.g. "ac3", "dts", "aac").
    pub format: String,
    /// ISO language code.
    pub language: String,
    /// Channel count.
    pub channels: u32,
    /// Path of the file most recently produced for this stream.
    pub temp_file: Option<PathBuf>,
    /// Size in bytes of `temp_file`, when known.
    pub stream_size: u64,
    /// Bit rate in bits/s from the last probe.
    pub bitrate: u64,
}

/// Selected subtitle stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleStream {
    /// Stream id in the source container.
    pub source_id: u32,
    /// Codec/format tag (e.g. "pgs", "vobsub", "srt").
    pub format: String,
    /// ISO language code.
    pub language: String,
    /// Forced-display flag.
    pub forced: bool,
    /// Path of the file most recently produced for this stream.
    pub temp_file: Option<PathBuf>,
    /// Size in bytes of `temp_file`, when known.
    pub stream_size: u64,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Target container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mkv,
    Mp4,
    Ts,
    Dvd,
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Container::Mkv => write!(f, "mkv"),
            Container::Mp4 => write!(f, "mp4"),
            Container::Ts => write!(f, "ts"),
            Container::Dvd => write!(f, "dvd"),
        }
    }
}

/// What kind of source the job was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    BluRay,
    Dvd,
    File,
}

/// Encoding profile: target container plus per-codec settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingProfile {
    /// Target container.
    pub target: Container,
    /// Number of video encode passes (1..=3).
    pub video_passes: u32,
    /// Video bitrate in kbit/s for multi-pass rate control.
    pub video_bitrate_kbps: u32,
    /// x264 CRF used for single-pass encodes.
    pub video_crf: u32,
    /// x264 preset name.
    pub video_preset: String,
    /// Target audio codec tag.
    pub audio_codec: String,
    /// Audio bitrate in kbit/s per track.
    pub audio_bitrate_kbps: u32,
    /// Re-encode audio tracks (false = passthrough into the mux).
    pub encode_audio: bool,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            target: Container::Mkv,
            video_passes: 2,
            video_bitrate_kbps: 4000,
            video_crf: 18,
            video_preset: "slow".into(),
            audio_codec: "aac".into(),
            audio_bitrate_kbps: 160,
            encode_audio: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Position in the stage chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// eac3to demux of disc sources.
    Demux,
    /// mkvextract elementary-stream extraction from generic containers.
    ExtractStreams,
    /// Video encode (possibly multi-pass).
    EncodeVideo,
    /// Audio encode, one run per selected track.
    EncodeAudio,
    /// Subtitle conversion, one run per selected track.
    ConvertSubtitles,
    /// Final mux into the target container.
    Mux,
    /// Chain complete.
    Done,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::Demux => "demux",
            StepKind::ExtractStreams => "extract_streams",
            StepKind::EncodeVideo => "encode_video",
            StepKind::EncodeAudio => "encode_audio",
            StepKind::ConvertSubtitles => "convert_subtitles",
            StepKind::Mux => "mux",
            StepKind::Done => "done",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// JobDescriptor
// ---------------------------------------------------------------------------

/// The shared, mutable unit-of-work record.
///
/// Created once per source input at ingestion, mutated by each stage in
/// turn, persisted between runs by the external queue, and discarded after
/// final output or user removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique job id.
    pub id: JobId,
    /// Original input path (file or disc structure root).
    pub input: PathBuf,
    /// Pre-copied ASCII-safe input path, when the original name needed one.
    pub safe_input: Option<PathBuf>,
    /// Final output path.
    pub output: PathBuf,
    /// In-progress output path (renamed to `output` when the chain finishes).
    pub temp_output: Option<PathBuf>,
    /// Base name used for intermediate file naming.
    pub base_name: String,
    /// What kind of source this job was created from.
    pub source_kind: SourceKind,

    /// Selected video stream.
    pub video: VideoStream,
    /// Optional right-eye video stream for 3D sources.
    pub stereo_video: Option<VideoStream>,
    /// Selected audio streams, in output order.
    pub audio: Vec<AudioStream>,
    /// Selected subtitle streams, in output order.
    pub subtitles: Vec<SubtitleStream>,

    /// Encoding profile.
    pub profile: EncodingProfile,
    /// Last step that ran to completion (regardless of its exit code).
    pub completed_step: Option<StepKind>,
    /// Next step in the chain.
    pub next_step: StepKind,

    /// Intermediate files to delete once the job succeeds.
    pub temp_files: Vec<PathBuf>,
    /// Exit code of the most recent stage run. -1 for launch failures.
    pub exit_code: i32,
    /// Total source duration in seconds, from the last probe.
    pub duration_secs: Option<f64>,
}

impl JobDescriptor {
    /// Create a descriptor for a new source input.
    pub fn new(
        input: PathBuf,
        output: PathBuf,
        source_kind: SourceKind,
        profile: EncodingProfile,
    ) -> Self {
        let base_name = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".into());
        let next_step = match source_kind {
            SourceKind::BluRay | SourceKind::Dvd => StepKind::Demux,
            SourceKind::File => StepKind::ExtractStreams,
        };

        Self {
            id: JobId::new(),
            input,
            safe_input: None,
            output,
            temp_output: None,
            base_name,
            source_kind,
            video: VideoStream::default(),
            stereo_video: None,
            audio: Vec::new(),
            subtitles: Vec::new(),
            profile,
            completed_step: None,
            next_step,
            temp_files: Vec::new(),
            exit_code: 0,
            duration_secs: None,
        }
    }

    /// The input path stages should actually read: the safe-name copy when
    /// one was made, the original otherwise.
    pub fn effective_input(&self) -> &PathBuf {
        self.safe_input.as_ref().unwrap_or(&self.input)
    }

    /// Register an intermediate file for deletion on success. De-duplicates.
    pub fn add_temp_file(&mut self, path: PathBuf) {
        if !self.temp_files.contains(&path) {
            self.temp_files.push(path);
        }
    }

    /// Record a completed step and move the chain position forward.
    pub fn advance(&mut self, completed: StepKind, next: StepKind) {
        self.completed_step = Some(completed);
        self.next_step = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: SourceKind) -> JobDescriptor {
        JobDescriptor::new(
            PathBuf::from("/media/rips/Movie.mkv"),
            PathBuf::from("/media/out/Movie.mkv"),
            kind,
            EncodingProfile::default(),
        )
    }

    #[test]
    fn new_job_starts_at_demux_for_discs() {
        assert_eq!(job(SourceKind::BluRay).next_step, StepKind::Demux);
        assert_eq!(job(SourceKind::Dvd).next_step, StepKind::Demux);
    }

    #[test]
    fn new_job_starts_at_extract_for_files() {
        assert_eq!(job(SourceKind::File).next_step, StepKind::ExtractStreams);
    }

    #[test]
    fn base_name_from_input() {
        assert_eq!(job(SourceKind::File).base_name, "Movie");
    }

    #[test]
    fn effective_input_prefers_safe_copy() {
        let mut j = job(SourceKind::File);
        assert_eq!(j.effective_input(), &PathBuf::from("/media/rips/Movie.mkv"));
        j.safe_input = Some(PathBuf::from("/tmp/work/abc_src.mkv"));
        assert_eq!(j.effective_input(), &PathBuf::from("/tmp/work/abc_src.mkv"));
    }

    #[test]
    fn temp_files_deduplicate() {
        let mut j = job(SourceKind::File);
        j.add_temp_file(PathBuf::from("/tmp/a.h264"));
        j.add_temp_file(PathBuf::from("/tmp/a.h264"));
        j.add_temp_file(PathBuf::from("/tmp/b.ac3"));
        assert_eq!(j.temp_files.len(), 2);
    }

    #[test]
    fn advance_records_both_fields() {
        let mut j = job(SourceKind::BluRay);
        j.advance(StepKind::Demux, StepKind::EncodeVideo);
        assert_eq!(j.completed_step, Some(StepKind::Demux));
        assert_eq!(j.next_step, StepKind::EncodeVideo);
    }

    #[test]
    fn serde_roundtrip() {
        let mut j = job(SourceKind::BluRay);
        j.audio.push(AudioStream {
            source_id: 2,
            format: "dts".into(),
            language: "eng".into(),
            channels: 6,
            ..Default::default()
        });
        let json = serde_json::to_string(&j).unwrap();
        let back: JobDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, j.id);
        assert_eq!(back.audio.len(), 1);
        assert_eq!(back.audio[0].format, "dts");
        assert_eq!(back.next_step, StepKind::Demux);
    }
}
