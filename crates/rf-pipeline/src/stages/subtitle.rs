//! BDSup2Sub subtitle conversion.

use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, StepKind};
use rf_core::{Error, Result};

use crate::progress::{DecodeFrameParser, ProgressParser};
use crate::stage::{ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation};

use super::file_size;

/// Convert one PGS subtitle track to VobSub for containers that cannot
/// carry PGS.
pub struct SubtitleConvertStage {
    track: usize,
}

impl SubtitleConvertStage {
    /// Stage for subtitle track index `track`.
    pub fn new(track: usize) -> Self {
        Self { track }
    }

    fn output(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work
            .stream_path(&job.base_name, &format!("s{}conv", self.track), "idx")
    }
}

#[async_trait]
impl StageSpec for SubtitleConvertStage {
    fn name(&self) -> String {
        format!("convert-subtitles t{}", self.track)
    }

    fn step(&self) -> StepKind {
        StepKind::ConvertSubtitles
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let bdsup2sub = ctx.tools.require("bdsup2sub")?.path.clone();

        let stream = job
            .subtitles
            .get(self.track)
            .ok_or_else(|| Error::stage(self.name(), "no such subtitle track"))?;
        let source = stream
            .temp_file
            .clone()
            .ok_or_else(|| Error::stage(self.name(), "no demuxed subtitle stream"))?;

        Ok(StagePlan::Single {
            invocation: ToolInvocation {
                program: bdsup2sub,
                args: vec![
                    source.display().to_string(),
                    "-o".into(),
                    self.output(job, ctx).display().to_string(),
                ],
                diagnostics: ProgressStream::Stdout,
            },
        })
    }

    fn parser(&self, _job: &JobDescriptor) -> Box<dyn ProgressParser> {
        Box::new(DecodeFrameParser::new())
    }

    async fn finish(&self, job: &mut JobDescriptor, ctx: &StageContext) -> Result<()> {
        let output = self.output(job, ctx);

        let Some(stream) = job.subtitles.get_mut(self.track) else {
            return Ok(());
        };
        let consumed = stream.temp_file.take();
        stream.stream_size = file_size(&output);
        stream.format = "vobsub".into();
        stream.temp_file = Some(output.clone());

        if let Some(consumed) = consumed {
            job.add_temp_file(consumed);
        }
        // The .idx carries a companion .sub with the bitmap data; both are
        // consumed by the mux.
        Ok(())
    }
}
