//! tsMuxeR final mux.

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, StepKind};
use rf_core::{Error, Result};

use crate::progress::{BarePercentParser, ProgressParser};
use crate::stage::{ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation};

use super::mux_mkv::finish_mux;

/// Mux the encoded streams into a transport stream with tsMuxeR.
///
/// tsMuxeR is driven by a meta file naming every input track; the plan
/// renders it into the work directory. Progress is a bare `NN.N%` line.
pub struct MuxTsStage;

impl MuxTsStage {
    fn output(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work.stream_path(&job.base_name, "mux", "ts")
    }

    fn meta_path(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work.stream_path(&job.base_name, "mux", "meta")
    }

    fn render_meta(&self, job: &JobDescriptor) -> Result<String> {
        let video = job
            .video
            .temp_file
            .as_ref()
            .ok_or_else(|| Error::stage(self.name(), "no encoded video stream to mux"))?;

        let mut meta = String::from("MUXOPT --no-pcr-on-video-pid --new-audio-pes --vbr\n");
        let fps = if job.video.frame_rate > 0.0 {
            format!(", fps={}", job.video.frame_rate)
        } else {
            String::new()
        };
        let _ = writeln!(meta, "V_MPEG4/ISO/AVC, \"{}\"{fps}", video.display());

        for track in &job.audio {
            if let Some(path) = &track.temp_file {
                let lang = if track.language.is_empty() {
                    String::new()
                } else {
                    format!(", lang={}", track.language)
                };
                let _ = writeln!(meta, "A_AAC, \"{}\"{lang}", path.display());
            }
        }
        for track in &job.subtitles {
            if let Some(path) = &track.temp_file {
                let _ = writeln!(meta, "S_HDMV/PGS, \"{}\"", path.display());
            }
        }
        Ok(meta)
    }
}

#[async_trait]
impl StageSpec for MuxTsStage {
    fn name(&self) -> String {
        "mux-ts".into()
    }

    fn step(&self) -> StepKind {
        StepKind::Mux
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let tsmuxer = ctx.tools.require("tsmuxer")?.path.clone();

        let meta = self.render_meta(job)?;
        let meta_path = self.meta_path(job, ctx);
        std::fs::write(&meta_path, meta)?;

        Ok(StagePlan::Single {
            invocation: ToolInvocation {
                program: tsmuxer,
                args: vec![
                    meta_path.display().to_string(),
                    self.output(job, ctx).display().to_string(),
                ],
                diagnostics: ProgressStream::Stdout,
            },
        })
    }

    fn parser(&self, _job: &JobDescriptor) -> Box<dyn ProgressParser> {
        Box::new(BarePercentParser::new())
    }

    async fn finish(&self, job: &mut JobDescriptor, ctx: &StageContext) -> Result<()> {
        let meta = self.meta_path(job, ctx);
        finish_mux(job, self.output(job, ctx));
        job.add_temp_file(meta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::config::Config;
    use rf_core::job::{AudioStream, EncodingProfile, SourceKind, VideoStream};
    use rf_core::EventSink;
    use std::sync::Arc;

    fn ctx(tmp: &tempfile::TempDir) -> StageContext {
        let tools_dir = tmp.path().join("tools");
        std::fs::create_dir_all(&tools_dir).unwrap();
        std::fs::write(tools_dir.join("tsmuxer"), b"#!/bin/sh\n").unwrap();
        let mut config = Config::default();
        config.tools.tools_dir = Some(tools_dir);

        let tools = rf_av::ToolRegistry::discover(&config.tools);
        let work = rf_av::WorkArea::new(&tmp.path().join("work")).unwrap();
        StageContext::new(
            Arc::new(config),
            Arc::new(tools),
            Arc::new(work),
            EventSink::noop(),
        )
    }

    fn encoded_job() -> JobDescriptor {
        let mut job = JobDescriptor::new(
            PathBuf::from("/in/Movie.mkv"),
            PathBuf::from("/out/Movie.ts"),
            SourceKind::File,
            EncodingProfile::default(),
        );
        job.video = VideoStream {
            frame_rate: 23.976,
            temp_file: Some(PathBuf::from("/work/Movie_enc.h264")),
            ..Default::default()
        };
        job.audio.push(AudioStream {
            language: "eng".into(),
            temp_file: Some(PathBuf::from("/work/Movie_a0enc.m4a")),
            ..Default::default()
        });
        job
    }

    #[test]
    fn meta_file_lists_every_track() {
        let meta = MuxTsStage.render_meta(&encoded_job()).unwrap();
        assert!(meta.starts_with("MUXOPT"));
        assert!(meta.contains("V_MPEG4/ISO/AVC, \"/work/Movie_enc.h264\", fps=23.976"));
        assert!(meta.contains("A_AAC, \"/work/Movie_a0enc.m4a\", lang=eng"));
    }

    #[test]
    fn plan_writes_the_meta_file_into_the_work_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let job = encoded_job();

        let StagePlan::Single { invocation } = MuxTsStage.plan(&job, &ctx).unwrap() else {
            panic!("mux must be a single-process plan");
        };
        let meta_path = PathBuf::from(&invocation.args[0]);
        assert!(meta_path.is_file());
        assert!(invocation.args[1].ends_with("_mux.ts"));
    }

    #[tokio::test]
    async fn finish_registers_the_meta_file_too() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let mut job = encoded_job();

        MuxTsStage.finish(&mut job, &ctx).await.unwrap();
        assert!(job
            .temp_files
            .iter()
            .any(|p| p.to_string_lossy().ends_with("_mux.meta")));
        assert!(job.temp_output.as_ref().unwrap().ends_with("Movie_mux.ts"));
    }
}
