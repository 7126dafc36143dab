//! Stage factory: builds the runnable stages for a job's next step.

use rf_core::job::{Container, JobDescriptor, StepKind};
use rf_core::{Error, Result};

use crate::stage::Stage;
use crate::stages::{
    AudioEncodeStage, DemuxStage, ExtractStage, MuxMkvStage, MuxMp4Stage, MuxTsStage,
    SubtitleConvertStage, VideoEncodeStage,
};

/// Build the stage sequence for `job.next_step`.
///
/// Multi-instance steps expand here: one stage per video pass, per audio
/// track, per subtitle track. The stages must run in order, one at a time
/// (pipe channel names are per stage kind).
///
/// # Errors
///
/// [`Error::Stage`] when the job's target container has no muxer.
pub fn create_stages(job: &JobDescriptor) -> Result<Vec<Stage>> {
    let stages: Vec<Stage> = match job.next_step {
        StepKind::Demux => vec![Stage::new(Box::new(DemuxStage))],
        StepKind::ExtractStreams => vec![Stage::new(Box::new(ExtractStage))],
        StepKind::EncodeVideo => (1..=job.profile.video_passes.max(1))
            .map(|pass| Stage::new(Box::new(VideoEncodeStage::new(pass))))
            .collect(),
        StepKind::EncodeAudio => (0..job.audio.len())
            .map(|track| Stage::new(Box::new(AudioEncodeStage::new(track))))
            .collect(),
        StepKind::ConvertSubtitles => (0..job.subtitles.len())
            .map(|track| Stage::new(Box::new(SubtitleConvertStage::new(track))))
            .collect(),
        StepKind::Mux => match job.profile.target {
            Container::Mkv => vec![Stage::new(Box::new(MuxMkvStage))],
            Container::Mp4 => vec![Stage::new(Box::new(MuxMp4Stage))],
            Container::Ts => vec![Stage::new(Box::new(MuxTsStage))],
            Container::Dvd => {
                return Err(Error::stage(
                    "mux",
                    "dvd target authoring is not supported",
                ))
            }
        },
        StepKind::Done => Vec::new(),
    };
    Ok(stages)
}
