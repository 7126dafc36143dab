//! Dual-process video encode: ffmpeg y4m decode piped into x264.

use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, StepKind};
use rf_core::{Error, Result};

use crate::progress::{FrameProgressParser, ProgressParser};
use crate::stage::{
    ParseFrom, ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation, Topology,
};

use super::{file_size, refresh_video};

/// One pass of the video encode.
///
/// ffmpeg decodes the demuxed elementary stream to yuv4mpeg on stdout; the
/// relay feeds it into x264's stdin. Progress comes from x264's frame
/// reports measured against the probed frame count; the data marker is
/// ffmpeg's first `size=` status report on stderr.
///
/// Multi-pass encodes share a stats file between passes; every pass writes
/// the same output path and only the final pass updates the descriptor.
pub struct VideoEncodeStage {
    pass: u32,
}

impl VideoEncodeStage {
    /// Stage for pass `pass` (1-based).
    pub fn new(pass: u32) -> Self {
        Self { pass: pass.max(1) }
    }

    fn output(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work.stream_path(&job.base_name, "enc", "h264")
    }

    fn stats_file(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work.stream_path(&job.base_name, "x264", "stats")
    }

    fn is_final_pass(&self, job: &JobDescriptor) -> bool {
        self.pass >= job.profile.video_passes.max(1)
    }
}

#[async_trait]
impl StageSpec for VideoEncodeStage {
    fn name(&self) -> String {
        format!("encode-video p{}", self.pass)
    }

    fn step(&self) -> StepKind {
        StepKind::EncodeVideo
    }

    fn pass(&self) -> Option<u32> {
        Some(self.pass)
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let ffmpeg = ctx.tools.require("ffmpeg")?.path.clone();
        let x264 = ctx.tools.require("x264")?.path.clone();

        let source = job
            .video
            .temp_file
            .clone()
            .ok_or_else(|| Error::stage(self.name(), "no demuxed video stream to encode"))?;

        let decoder = ToolInvocation {
            program: ffmpeg,
            args: vec![
                "-v".into(),
                "error".into(),
                "-stats".into(),
                "-i".into(),
                source.display().to_string(),
                "-f".into(),
                "yuv4mpegpipe".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-".into(),
            ],
            diagnostics: ProgressStream::Stderr,
        };

        let profile = &job.profile;
        let mut enc_args = vec![
            "--demuxer".into(),
            "y4m".into(),
            "--preset".into(),
            profile.video_preset.clone(),
        ];
        if profile.video_passes > 1 {
            enc_args.extend([
                "--pass".into(),
                self.pass.to_string(),
                "--stats".into(),
                self.stats_file(job, ctx).display().to_string(),
                "--bitrate".into(),
                profile.video_bitrate_kbps.to_string(),
            ]);
        } else {
            enc_args.extend(["--crf".into(), profile.video_crf.to_string()]);
        }
        if job.video.frame_count > 0 {
            enc_args.extend(["--frames".into(), job.video.frame_count.to_string()]);
        }
        enc_args.extend([
            "--output".into(),
            self.output(job, ctx).display().to_string(),
            "-".into(),
        ]);

        Ok(StagePlan::Dual {
            decoder,
            encoder: ToolInvocation {
                program: x264,
                args: enc_args,
                diagnostics: ProgressStream::Stderr,
            },
            topology: Topology::EncoderStdin,
            data_marker: "size=".into(),
            parse_from: ParseFrom::Encoder,
        })
    }

    fn parser(&self, job: &JobDescriptor) -> Box<dyn ProgressParser> {
        Box::new(FrameProgressParser::new(job.video.frame_count))
    }

    async fn finish(&self, job: &mut JobDescriptor, ctx: &StageContext) -> Result<()> {
        if !self.is_final_pass(job) {
            return Ok(());
        }

        let output = self.output(job, ctx);
        if let Some(consumed) = job.video.temp_file.take() {
            job.add_temp_file(consumed);
        }
        if job.profile.video_passes > 1 {
            let stats = self.stats_file(job, ctx);
            // x264 writes a companion mbtree file next to the stats.
            let mut mbtree = stats.clone().into_os_string();
            mbtree.push(".mbtree");
            job.add_temp_file(stats);
            job.add_temp_file(PathBuf::from(mbtree));
        }

        job.video.stream_size = file_size(&output);
        job.video.format = "h264".into();
        job.video.temp_file = Some(output.clone());
        refresh_video(job, ctx, &output).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::config::Config;
    use rf_core::job::{EncodingProfile, SourceKind, VideoStream};
    use rf_core::EventSink;
    use std::sync::Arc;

    fn ctx(tmp: &tempfile::TempDir) -> StageContext {
        let tools_dir = tmp.path().join("tools");
        std::fs::create_dir_all(&tools_dir).unwrap();
        for tool in ["ffmpeg", "x264"] {
            std::fs::write(tools_dir.join(tool), b"#!/bin/sh\n").unwrap();
        }
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

    fn job_with_video() -> JobDescriptor {
        let mut job = JobDescriptor::new(
            PathBuf::from("/in/Movie.mkv"),
            PathBuf::from("/out/Movie.mkv"),
            SourceKind::File,
            EncodingProfile::default(),
        );
        job.video = VideoStream {
            format: "h264".into(),
            temp_file: Some(PathBuf::from("/work/Movie_v.h264")),
            frame_count: 150_000,
            ..Default::default()
        };
        job
    }

    #[test]
    fn plan_is_dual_with_stdin_topology() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let job = job_with_video();

        let plan = VideoEncodeStage::new(1).plan(&job, &ctx).unwrap();
        let StagePlan::Dual {
            decoder,
            encoder,
            topology,
            data_marker,
            parse_from,
        } = plan
        else {
            panic!("video encode must be a dual-process plan");
        };

        assert!(decoder.args.contains(&"yuv4mpegpipe".to_string()));
        assert_eq!(decoder.args.last().unwrap(), "-");
        assert!(encoder.args.contains(&"y4m".to_string()));
        assert!(encoder.args.contains(&"--pass".to_string()));
        assert!(encoder.args.contains(&"150000".to_string()));
        assert!(matches!(topology, Topology::EncoderStdin));
        assert_eq!(data_marker, "size=");
        assert_eq!(parse_from, ParseFrom::Encoder);
    }

    #[test]
    fn single_pass_uses_crf() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let mut job = job_with_video();
        job.profile.video_passes = 1;
        job.profile.video_crf = 20;

        let StagePlan::Dual { encoder, .. } =
            VideoEncodeStage::new(1).plan(&job, &ctx).unwrap()
        else {
            panic!();
        };
        assert!(encoder.args.contains(&"--crf".to_string()));
        assert!(encoder.args.contains(&"20".to_string()));
        assert!(!encoder.args.contains(&"--pass".to_string()));
    }

    #[test]
    fn plan_without_demuxed_video_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let mut job = job_with_video();
        job.video.temp_file = None;

        assert!(VideoEncodeStage::new(1).plan(&job, &ctx).is_err());
    }

    #[tokio::test]
    async fn only_the_final_pass_updates_the_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let mut job = job_with_video();
        let original = job.video.temp_file.clone();

        VideoEncodeStage::new(1).finish(&mut job, &ctx).await.unwrap();
        assert_eq!(job.video.temp_file, original);
        assert!(job.temp_files.is_empty());

        VideoEncodeStage::new(2).finish(&mut job, &ctx).await.unwrap();
        assert_ne!(job.video.temp_file, original);
        // Consumed input plus stats and mbtree files registered for cleanup.
        assert_eq!(job.temp_files.len(), 3);
        assert!(job
            .temp_files
            .iter()
            .any(|p| p.to_string_lossy().ends_with(".mbtree")));
    }

    #[test]
    fn parser_tracks_frame_ratio() {
        let job = job_with_video();
        let mut parser = VideoEncodeStage::new(1).parser(&job);
        let update = parser.parse_line("frame=75000 fps=60.0 q=22").unwrap();
        assert_eq!(update.percent, 50.0);
    }
}
