//! The concrete pipeline stages.
//!
//! Each stage is a [`StageSpec`](crate::stage::StageSpec) implementation:
//! it renders its tool's command line from the job descriptor, names its
//! progress dialect, and refreshes the descriptor from its outputs after a
//! successful run.

mod audio;
mod demux;
mod extract;
mod mux_mkv;
mod mux_mp4;
mod mux_ts;
mod subtitle;
mod video;

pub use audio::AudioEncodeStage;
pub use demux::DemuxStage;
pub use extract::ExtractStage;
pub use mux_mkv::MuxMkvStage;
pub use mux_mp4::MuxMp4Stage;
pub use mux_ts::MuxTsStage;
pub use subtitle::SubtitleConvertStage;
pub use video::VideoEncodeStage;

use std::path::Path;

use rf_core::job::JobDescriptor;

use crate::stage::StageContext;

/// File size in bytes, zero when unreadable.
pub(crate) fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Elementary-stream file extension for a video format tag.
pub(crate) fn video_ext(format: &str) -> &'static str {
    match format {
        "vc1" => "vc1",
        "mpeg2" => "m2v",
        _ => "h264",
    }
}

/// Elementary-stream file extension for an audio format tag.
pub(crate) fn audio_ext(format: &str) -> &'static str {
    match format {
        "dts" | "dtshd" => "dts",
        "truehd" => "thd",
        "aac" => "m4a",
        "flac" => "flac",
        "pcm" => "wav",
        _ => "ac3",
    }
}

/// Re-probe `path` and fold the result onto the job's video descriptor.
///
/// Probe failures are logged, never propagated: downstream stages then run
/// with stale frame/bitrate metadata, which is an accepted degraded mode.
pub(crate) async fn refresh_video(job: &mut JobDescriptor, ctx: &StageContext, path: &Path) {
    let ffprobe = match ctx.tools.require("ffprobe") {
        Ok(tool) => tool.path.clone(),
        Err(e) => {
            tracing::warn!("skipping re-probe: {e}");
            return;
        }
    };
    match rf_probe::probe(&ffprobe, path).await {
        Ok(info) => {
            info.apply_to_video(&mut job.video);
            if let Some(duration) = info.duration {
                job.duration_secs = Some(duration.as_secs_f64());
            }
        }
        Err(e) => tracing::warn!(path = %path.display(), "re-probe failed: {e}"),
    }
}

/// Re-probe an encoded audio file and fold the result onto one audio
/// track descriptor. Same degraded mode as [`refresh_video`].
pub(crate) async fn refresh_audio(
    job: &mut JobDescriptor,
    ctx: &StageContext,
    track: usize,
    path: &Path,
) {
    let ffprobe = match ctx.tools.require("ffprobe") {
        Ok(tool) => tool.path.clone(),
        Err(e) => {
            tracing::warn!("skipping re-probe: {e}");
            return;
        }
    };
    match rf_probe::probe(&ffprobe, path).await {
        Ok(info) => {
            if let Some(stream) = job.audio.get_mut(track) {
                info.apply_to_audio(stream);
            }
        }
        Err(e) => tracing::warn!(path = %path.display(), "re-probe failed: {e}"),
    }
}
