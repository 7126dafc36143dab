//! Dual-process audio encode: ffmpeg WAV decode into fdkaac via a FIFO.

use std::path::PathBuf;

use async_trait::async_trait;

use rf_core::job::{JobDescriptor, StepKind};
use rf_core::{Error, Result};

use crate::progress::{ProgressParser, TimeProgressParser};
use crate::stage::{
    ParseFrom, ProgressStream, StageContext, StagePlan, StageSpec, ToolInvocation, Topology,
};

use super::{file_size, refresh_audio};

/// Encode one selected audio track.
///
/// ffmpeg decodes the elementary stream to WAV on stdout; the relay moves
/// it through the encode-channel FIFO, which fdkaac opens as its input
/// file. fdkaac prints nothing useful while reading a pipe, so progress is
/// parsed from the decoder's `time=` status against the probed duration.
///
/// The FIFO name is per encoder kind, so audio tracks are encoded one at a
/// time; the factory emits one stage per track.
pub struct AudioEncodeStage {
    track: usize,
}

impl AudioEncodeStage {
    /// Stage for audio track index `track`.
    pub fn new(track: usize) -> Self {
        Self { track }
    }

    fn output(&self, job: &JobDescriptor, ctx: &StageContext) -> PathBuf {
        ctx.work
            .stream_path(&job.base_name, &format!("a{}enc", self.track), "m4a")
    }
}

#[async_trait]
impl StageSpec for AudioEncodeStage {
    fn name(&self) -> String {
        format!("encode-audio t{}", self.track)
    }

    fn step(&self) -> StepKind {
        StepKind::EncodeAudio
    }

    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan> {
        let ffmpeg = ctx.tools.require("ffmpeg")?.path.clone();
        let fdkaac = ctx.tools.require("fdkaac")?.path.clone();

        let stream = job
            .audio
            .get(self.track)
            .ok_or_else(|| Error::stage(self.name(), "no such audio track"))?;
        let source = stream
            .temp_file
            .clone()
            .ok_or_else(|| Error::stage(self.name(), "no demuxed audio stream to encode"))?;

        let fifo = ctx.work.pipe_path(&ctx.config.pipes.encode_channel);

        let decoder = ToolInvocation {
            program: ffmpeg,
            args: vec![
                "-v".into(),
                "error".into(),
                "-stats".into(),
                "-i".into(),
                source.display().to_string(),
                "-f".into(),
                "wav".into(),
                "-".into(),
            ],
            diagnostics: ProgressStream::Stderr,
        };

        let encoder = ToolInvocation {
            program: fdkaac,
            args: vec![
                "-b".into(),
                format!("{}k", job.profile.audio_bitrate_kbps),
                "-o".into(),
                self.output(job, ctx).display().to_string(),
                fifo.display().to_string(),
            ],
            diagnostics: ProgressStream::Stderr,
        };

        Ok(StagePlan::Dual {
            decoder,
            encoder,
            topology: Topology::NamedPipe(fifo),
            data_marker: "size=".into(),
            parse_from: ParseFrom::Decoder,
        })
    }

    fn parser(&self, job: &JobDescriptor) -> Box<dyn ProgressParser> {
        Box::new(TimeProgressParser::new(job.duration_secs.unwrap_or(0.0)))
    }

    async fn finish(&self, job: &mut JobDescriptor, ctx: &StageContext) -> Result<()> {
        let output = self.output(job, ctx);
        let codec = job.profile.audio_codec.clone();
        let bitrate = u64::from(job.profile.audio_bitrate_kbps) * 1000;

        let Some(stream) = job.audio.get_mut(self.track) else {
            return Ok(());
        };
        let consumed = stream.temp_file.take();
        stream.stream_size = file_size(&output);
        stream.format = codec;
        stream.bitrate = bitrate;
        stream.temp_file = Some(output.clone());

        if let Some(consumed) = consumed {
            job.add_temp_file(consumed);
        }
        refresh_audio(job, ctx, self.track, &output).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::config::Config;
    use rf_core::job::{AudioStream, EncodingProfile, SourceKind};
    use rf_core::EventSink;
    use std::sync::Arc;

    fn ctx(tmp: &tempfile::TempDir) -> StageContext {
        let tools_dir = tmp.path().join("tools");
        std::fs::create_dir_all(&tools_dir).unwrap();
        for tool in ["ffmpeg", "fdkaac"] {
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

    fn job_with_audio() -> JobDescriptor {
        let mut job = JobDescriptor::new(
            PathBuf::from("/in/Movie.mkv"),
            PathBuf::from("/out/Movie.mkv"),
            SourceKind::File,
            EncodingProfile::default(),
        );
        job.duration_secs = Some(3600.0);
        job.audio.push(AudioStream {
            source_id: 1,
            format: "dts".into(),
            channels: 6,
            temp_file: Some(PathBuf::from("/work/Movie_a0.dts")),
            ..Default::default()
        });
        job
    }

    #[test]
    fn plan_routes_through_the_encode_fifo() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let job = job_with_audio();

        let StagePlan::Dual {
            encoder,
            topology,
            parse_from,
            ..
        } = AudioEncodeStage::new(0).plan(&job, &ctx).unwrap()
        else {
            panic!("audio encode must be a dual-process plan");
        };

        let Topology::NamedPipe(fifo) = topology else {
            panic!("audio encode must use the named-pipe topology");
        };
        assert!(fifo.to_string_lossy().contains("ripforge-encode"));
        // The encoder receives the FIFO path as its input argument.
        assert_eq!(encoder.args.last().unwrap(), &fifo.display().to_string());
        assert!(encoder.args.contains(&"160k".to_string()));
        assert_eq!(parse_from, ParseFrom::Decoder);
    }

    #[test]
    fn plan_for_missing_track_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let job = job_with_audio();
        assert!(AudioEncodeStage::new(5).plan(&job, &ctx).is_err());
    }

    #[test]
    fn parser_uses_probed_duration() {
        let job = job_with_audio();
        let mut parser = AudioEncodeStage::new(0).parser(&job);
        let update = parser
            .parse_line("size= 1024kB time=00:30:00.00 bitrate= 160.0kbits/s")
            .unwrap();
        assert_eq!(update.percent, 50.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn finish_folds_in_the_reprobed_track() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let tools_dir = tmp.path().join("tools");
        std::fs::create_dir_all(&tools_dir).unwrap();
        for tool in ["ffmpeg", "fdkaac"] {
            std::fs::write(tools_dir.join(tool), b"#!/bin/sh\n").unwrap();
        }
        let probe_json = r#"{"format":{"format_name":"ipod","size":"72000000","bit_rate":"160000"},"streams":[{"index":0,"codec_type":"audio","codec_name":"aac","channels":2,"sample_rate":"48000","bit_rate":"152000"}]}"#;
        let ffprobe = tools_dir.join("ffprobe");
        std::fs::write(
            &ffprobe,
            format!("#!/bin/sh\ncat <<'EOF'\n{probe_json}\nEOF\n"),
        )
        .unwrap();
        std::fs::set_permissions(&ffprobe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::default();
        config.tools.tools_dir = Some(tools_dir);
        let tools = rf_av::ToolRegistry::discover(&config.tools);
        let work = rf_av::WorkArea::new(&tmp.path().join("work")).unwrap();
        let ctx = StageContext::new(
            Arc::new(config),
            Arc::new(tools),
            Arc::new(work),
            EventSink::noop(),
        );

        let mut job = job_with_audio();
        AudioEncodeStage::new(0).finish(&mut job, &ctx).await.unwrap();

        let track = &job.audio[0];
        assert_eq!(track.channels, 2);
        assert_eq!(track.bitrate, 152_000);
        assert_eq!(track.stream_size, 72_000_000);
    }

    #[tokio::test]
    async fn finish_swaps_the_track_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(&tmp);
        let mut job = job_with_audio();

        AudioEncodeStage::new(0).finish(&mut job, &ctx).await.unwrap();
        let track = &job.audio[0];
        assert_eq!(track.format, "aac");
        assert_eq!(track.bitrate, 160_000);
        assert!(track
            .temp_file
            .as_ref()
            .unwrap()
            .to_string_lossy()
            .ends_with("_a0enc.m4a"));
        assert_eq!(job.temp_files, vec![PathBuf::from("/work/Movie_a0.dts")]);
    }
}
