//! Step sequencing: which step follows which for a given job.
//!
//! Steps with nothing to do are skipped (no audio tracks selected, no
//! subtitle conversion needed for the target container).

use rf_core::job::{Container, JobDescriptor, StepKind};

/// Compute the step that follows `current` for this job.
pub fn next_after(current: StepKind, job: &JobDescriptor) -> StepKind {
    match current {
        StepKind::Demux | StepKind::ExtractStreams => StepKind::EncodeVideo,
        StepKind::EncodeVideo => {
            if needs_audio_encode(job) {
                StepKind::EncodeAudio
            } else if needs_subtitle_convert(job) {
                StepKind::ConvertSubtitles
            } else {
                StepKind::Mux
            }
        }
        StepKind::EncodeAudio => {
            if needs_subtitle_convert(job) {
                StepKind::ConvertSubtitles
            } else {
                StepKind::Mux
            }
        }
        StepKind::ConvertSubtitles => StepKind::Mux,
        StepKind::Mux | StepKind::Done => StepKind::Done,
    }
}

/// Whether the job has audio tracks that should be re-encoded.
pub fn needs_audio_encode(job: &JobDescriptor) -> bool {
    job.profile.encode_audio && !job.audio.is_empty()
}

/// Whether the job's subtitles need conversion before muxing.
///
/// MKV and TS carry PGS subtitles natively; MP4 does not, so selected
/// subtitle tracks must be converted first.
pub fn needs_subtitle_convert(job: &JobDescriptor) -> bool {
    !job.subtitles.is_empty() && job.profile.target == Container::Mp4
}
