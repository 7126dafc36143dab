//! eac3to demux of disc sources and standalone files.

use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, SourceKind, StepKind};
use rf_core::Result;

use crate::progress::{PercentParser, PhasedPercentParser, ProgressParser};
use crate::stage::{ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation};

use super::{audio_ext, file_size, refresh_video, video_ext};

/// Demux selected streams from a BluRay/DVD structure or a container file
/// into elementary streams with eac3to.
///
/// eac3to runs a separate analysis pass over BluRay playlists before
/// demuxing, so disc sources get the two-phase parser. It also exits with
/// code 1 for "completed with minor issues", which counts as success.
pub struct DemuxStage;

impl DemuxStage {
    fn video_out(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work
            .stream_path(&job.base_name, "v", video_ext(&job.video.format))
    }

    fn audio_out(&self, job: &JobDescriptor, ctx: &StageContext, track: usize) -> PathBuf {
        let ext = audio_ext(&job.audio[track].format);
        ctx.work
            .stream_path(&job.base_name, &format!("a{track}"), ext)
    }

    fn subtitle_out(&self, job: &JobDescriptor, ctx: &StageContext, track: usize) -> PathBuf {
        ctx.work
            .stream_path(&job.base_name, &format!("s{track}"), "sup")
    }
}

#[async_trait]
impl StageSpec for DemuxStage {
    fn name(&self) -> String {
        "demux".into()
    }

    fn step(&self) -> StepKind {
        StepKind::Demux
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let eac3to = ctx.tools.require("eac3to")?.path.clone();

        let mut args = vec![job.effective_input().display().to_string()];
        args.push(format!(
            "{}:{}",
            job.video.source_id,
            self.video_out(job, ctx).display()
        ));
        for (i, track) in job.audio.iter().enumerate() {
            args.push(format!(
                "{}:{}",
                track.source_id,
                self.audio_out(job, ctx, i).display()
            ));
        }
        for (i, track) in job.subtitles.iter().enumerate() {
            args.push(format!(
                "{}:{}",
                track.source_id,
                self.subtitle_out(job, ctx, i).display()
            ));
        }
        args.push("-progressnumbers".into());

        Ok(StagePlan::Single {
            invocation: ToolInvocation {
                program: eac3to,
                args,
                diagnostics: ProgressStream::Stdout,
            },
        })
    }

    fn parser(&self, job: &JobDescriptor) -> Box<dyn ProgressParser> {
        match job.source_kind {
            SourceKind::BluRay => Box::new(PhasedPercentParser::new("analyze", "process")),
            _ => Box::new(PercentParser::new("process")),
        }
    }

    fn exit_ok(&self, code: i32) -> bool {
        // eac3to signals warnings with exit code 1; the demux still ran.
        code == 0 || code == 1
    }

    async fn finish(&self, job: &mut JobDescriptor, ctx: &StageContext) -> Result<()> {
        let video_out = self.video_out(job, ctx);
        job.video.stream_size = file_size(&video_out);
        job.video.temp_file = Some(video_out.clone());

        for i in 0..job.audio.len() {
            let out = self.audio_out(job, ctx, i);
            job.audio[i].stream_size = file_size(&out);
            job.audio[i].temp_file = Some(out);
        }
        for i in 0..job.subtitles.len() {
            let out = self.subtitle_out(job, ctx, i);
            job.subtitles[i].stream_size = file_size(&out);
            job.subtitles[i].temp_file = Some(out);
        }

        refresh_video(job, ctx, &video_out).await;
        Ok(())
    }
}
