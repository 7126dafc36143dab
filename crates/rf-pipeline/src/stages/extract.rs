//! mkvextract elementary-stream extraction from generic container files.

use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, StepKind};
use rf_core::Result;

use crate::progress::{PrefixedPercentParser, ProgressParser};
use crate::stage::{ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation};

use super::{audio_ext, file_size, refresh_video, video_ext};

/// Extract selected tracks from a non-disc container with mkvextract.
///
/// Counterpart of [`DemuxStage`](super::DemuxStage) for jobs whose input is
/// already a single file.
pub struct ExtractStage;

impl ExtractStage {
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
impl StageSpec for ExtractStage {
    fn name(&self) -> String {
        "extract-streams".into()
    }

    fn step(&self) -> StepKind {
        StepKind::ExtractStreams
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let mkvextract = ctx.tools.require("mkvextract")?.path.clone();

        let mut args = vec![
            "tracks".to_string(),
            job.effective_input().display().to_string(),
        ];
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

        Ok(StagePlan::Single {
            invocation: ToolInvocation {
                program: mkvextract,
                args,
                diagnostics: ProgressStream::Stdout,
            },
        })
    }

    fn parser(&self, _job: &JobDescriptor) -> Box<dyn ProgressParser> {
        Box::new(PrefixedPercentParser::new())
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
