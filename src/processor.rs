//! Sequential queue processor: drives one job through its full stage chain.

use std::path::Path;
use std::sync::Arc;

use rf_av::{ToolRegistry, WorkArea};
use rf_core::config::Config;
use rf_core::job::{AudioStream, JobDescriptor, SourceKind, StepKind, SubtitleStream};
use rf_core::{Error, EventSink, Result, StageEvent};
use rf_pipeline::{create_stages, StageContext};

/// Runs queued jobs one at a time, start to finish.
///
/// Stages within a job run strictly in sequence; pipe channel names and the
/// work directory are shared state, so there is no intra-job parallelism.
pub struct QueueProcessor {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    work: Arc<WorkArea>,
}

impl QueueProcessor {
    pub fn new(config: Config) -> Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        let work = WorkArea::new(&config.work.dir)?;
        Ok(Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
            work: Arc::new(work),
        })
    }

    /// Probe a file-source job and select its streams: the first video
    /// track, every audio track, every subtitle track.
    ///
    /// Disc sources keep whatever selection they were created with; their
    /// track layout comes from the demuxer, not from ffprobe.
    pub async fn prepare(&self, job: &mut JobDescriptor) -> Result<()> {
        if job.source_kind != SourceKind::File {
            return Ok(());
        }

        let ffprobe = self.tools.require("ffprobe")?.path.clone();
        let info = rf_probe::probe(&ffprobe, job.effective_input()).await?;

        let video = info
            .primary_video()
            .ok_or_else(|| Error::Probe(format!("{} has no video track", job.input.display())))?;
        job.video.source_id = video.index;
        job.video.format = video.codec.clone();
        info.apply_to_video(&mut job.video);
        job.duration_secs = info.duration.map(|d| d.as_secs_f64());

        job.audio = info
            .audio_tracks
            .iter()
            .map(|a| AudioStream {
                source_id: a.index,
                format: a.codec.clone(),
                language: a.language.clone().unwrap_or_default(),
                channels: a.channels,
                bitrate: a.bit_rate.unwrap_or(0),
                ..Default::default()
            })
            .collect();
        job.subtitles = info
            .subtitle_tracks
            .iter()
            .map(|s| SubtitleStream {
                source_id: s.index,
                format: s.codec.clone(),
                language: s.language.clone().unwrap_or_default(),
                forced: s.forced,
                ..Default::default()
            })
            .collect();

        tracing::info!(
            input = %job.input.display(),
            audio = job.audio.len(),
            subtitles = job.subtitles.len(),
            "Selected streams"
        );
        Ok(())
    }

    /// Run the job's remaining chain to completion, then finalize the
    /// output and clean up intermediates.
    pub async fn process(&self, job: &mut JobDescriptor) -> Result<()> {
        self.make_input_safe(job)?;

        while job.next_step != StepKind::Done {
            let step = job.next_step;
            let stages = create_stages(job)?;
            tracing::info!(job = %job.id, %step, stages = stages.len(), "Running step");

            for stage in &stages {
                let (events, mut rx) = EventSink::channel();
                let ctx = StageContext::new(
                    Arc::clone(&self.config),
                    Arc::clone(&self.tools),
                    Arc::clone(&self.work),
                    events,
                );

                let stage_name = stage.name();
                let consumer = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        match event {
                            StageEvent::Started { stage, pid } => {
                                tracing::info!(%stage, ?pid, "Stage started");
                            }
                            StageEvent::Progress { stage, model } => {
                                tracing::debug!(
                                    %stage,
                                    percent = model.percent,
                                    eta = ?model.eta,
                                    "Progress"
                                );
                            }
                            StageEvent::Completed {
                                stage,
                                success,
                                error,
                                message,
                            } => {
                                if success {
                                    tracing::info!(%stage, %message, "Stage completed");
                                } else {
                                    tracing::error!(%stage, ?error, "Stage failed to launch");
                                }
                            }
                        }
                    }
                });

                stage.start(job, &ctx).await;
                drop(ctx);
                let _ = consumer.await;

                if !stage.exit_ok(job.exit_code) {
                    return Err(Error::stage(
                        stage_name,
                        format!("failed with exit code {}", job.exit_code),
                    ));
                }
            }
        }

        self.finalize(job)?;
        self.cleanup(job);
        Ok(())
    }

    /// Copy inputs whose names the wrapped tools cannot handle into the
    /// work area under the job id.
    fn make_input_safe(&self, job: &mut JobDescriptor) -> Result<()> {
        if job.safe_input.is_some()
            || job.source_kind != SourceKind::File
            || !WorkArea::needs_safe_name(&job.input)
        {
            return Ok(());
        }
        let copy = self.work.safe_copy(&job.input, &job.id.to_string())?;
        tracing::info!(from = %job.input.display(), to = %copy.display(), "Safe-name copy");
        job.add_temp_file(copy.clone());
        job.safe_input = Some(copy);
        Ok(())
    }

    /// Move the muxed temp output to the job's final output path.
    fn finalize(&self, job: &mut JobDescriptor) -> Result<()> {
        let temp = job
            .temp_output
            .take()
            .ok_or_else(|| Error::Internal("chain finished without a muxed output".into()))?;

        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // rename fails across filesystems; fall back to copy + remove.
        if std::fs::rename(&temp, &job.output).is_err() {
            std::fs::copy(&temp, &job.output)?;
            std::fs::remove_file(&temp)?;
        }
        tracing::info!(output = %job.output.display(), "Job finished");
        Ok(())
    }

    /// Delete registered intermediates unless configured to keep them.
    fn cleanup(&self, job: &mut JobDescriptor) {
        if self.config.work.keep_temp_files {
            tracing::debug!(count = job.temp_files.len(), "Keeping temp files");
            return;
        }
        for path in job.temp_files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Temp file not removed");
                }
            }
        }
    }

}

/// Classify an input path: disc structure roots by their marker directory,
/// everything else as a plain file.
pub fn detect_source_kind(input: &Path) -> SourceKind {
    if input.join("BDMV").is_dir() {
        SourceKind::BluRay
    } else if input.join("VIDEO_TS").is_dir() {
        SourceKind::Dvd
    } else {
        SourceKind::File
    }
}
