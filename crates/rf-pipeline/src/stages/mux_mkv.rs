//! mkvmerge final mux.

use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, StepKind};
use rf_core::{Error, Result};

use crate::progress::{PrefixedPercentParser, ProgressParser};
use crate::stage::{ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation};

use super::file_size;

/// Mux the encoded streams into the final MKV.
pub struct MuxMkvStage;

impl MuxMkvStage {
    fn output(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work.stream_path(&job.base_name, "mux", "mkv")
    }
}

#[async_trait]
impl StageSpec for MuxMkvStage {
    fn name(&self) -> String {
        "mux-mkv".into()
    }

    fn step(&self) -> StepKind {
        StepKind::Mux
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let mkvmerge = ctx.tools.require("mkvmerge")?.path.clone();

        let video = job
            .video
            .temp_file
            .clone()
            .ok_or_else(|| Error::stage(self.name(), "no encoded video stream to mux"))?;

        let mut args = vec![
            "-o".to_string(),
            self.output(job, ctx).display().to_string(),
        ];
        if job.video.frame_rate > 0.0 {
            args.extend([
                "--default-duration".into(),
                format!("0:{}fps", job.video.frame_rate),
            ]);
        }
        args.push(video.display().to_string());

        for track in &job.audio {
            let Some(path) = &track.temp_file else {
                continue;
            };
            if !track.language.is_empty() {
                args.extend(["--language".into(), format!("0:{}", track.language)]);
            }
            args.push(path.display().to_string());
        }
        for track in &job.subtitles {
            let Some(path) = &track.temp_file else {
                continue;
            };
            if !track.language.is_empty() {
                args.extend(["--language".into(), format!("0:{}", track.language)]);
            }
            if track.forced {
                args.extend(["--forced-display-flag".into(), "0:yes".into()]);
            }
            args.push(path.display().to_string());
        }

        Ok(StagePlan::Single {
            invocation: ToolInvocation {
                program: mkvmerge,
                args,
                diagnostics: ProgressStream::Stdout,
            },
        })
    }

    fn parser(&self, _job: &JobDescriptor) -> Box<dyn ProgressParser> {
        Box::new(PrefixedPercentParser::new())
    }

    async fn finish(&self, job: &mut JobDescriptor, ctx: &StageContext) -> Result<()> {
        finish_mux(job, self.output(job, ctx));
        Ok(())
    }
}

/// Shared mux post-processing: record the container as the in-progress
/// output and register every muxed stream file for cleanup.
pub(super) fn finish_mux(job: &mut JobDescriptor, output: PathBuf) {
    if let Some(consumed) = job.video.temp_file.take() {
        job.add_temp_file(consumed);
    }
    let consumed_audio: Vec<PathBuf> = job
        .audio
        .iter_mut()
        .filter_map(|t| t.temp_file.take())
        .collect();
    let consumed_subs: Vec<PathBuf> = job
        .subtitles
        .iter_mut()
        .filter_map(|t| t.temp_file.take())
        .collect();
    for path in consumed_audio.into_iter().chain(consumed_subs) {
        job.add_temp_file(path);
    }

    job.video.stream_size = file_size(&output);
    job.temp_output = Some(output);
}
