//! MP4Box final mux.

use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, StepKind};
use rf_core::{Error, Result};

use crate::progress::{PhasedPercentParser, ProgressParser};
use crate::stage::{ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation};

use super::mux_mkv::finish_mux;

/// Mux the encoded streams into the final MP4 with MP4Box.
///
/// MP4Box imports every track before writing the container, so progress is
/// two-phased like a BluRay demux: import maps to the first half, the
/// interleaving write to the second.
pub struct MuxMp4Stage;

impl MuxMp4Stage {
    fn output(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work.stream_path(&job.base_name, "mux", "mp4")
    }
}

#[async_trait]
impl StageSpec for MuxMp4Stage {
    fn name(&self) -> String {
        "mux-mp4".into()
    }

    fn step(&self) -> StepKind {
        StepKind::Mux
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let mp4box = ctx.tools.require("mp4box")?.path.clone();

        let video = job
            .video
            .temp_file
            .clone()
            .ok_or_else(|| Error::stage(self.name(), "no encoded video stream to mux"))?;

        let mut args = Vec::new();
        if job.video.frame_rate > 0.0 {
            args.extend(["-fps".into(), job.video.frame_rate.to_string()]);
        }
        args.extend(["-add".into(), video.display().to_string()]);
        for track in &job.audio {
            if let Some(path) = &track.temp_file {
                let spec = if track.language.is_empty() {
                    path.display().to_string()
                } else {
                    format!("{}:lang={}", path.display(), track.language)
                };
                args.extend(["-add".into(), spec]);
            }
        }
        for track in &job.subtitles {
            if let Some(path) = &track.temp_file {
                args.extend(["-add".into(), path.display().to_string()]);
            }
        }
        args.extend([
            "-new".into(),
            self.output(job, ctx).display().to_string(),
        ]);

        Ok(StagePlan::Single {
            invocation: ToolInvocation {
                program: mp4box,
                args,
                diagnostics: ProgressStream::Stdout,
            },
        })
    }

    fn parser(&self, _job: &JobDescriptor) -> Box<dyn ProgressParser> {
        Box::new(PhasedPercentParser::new("import", "write"))
    }

    async fn finish(&self, job: &mut JobDescriptor, ctx: &StageContext) -> Result<()> {
        finish_mux(job, self.output(job, ctx));
        Ok(())
    }
}
