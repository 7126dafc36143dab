//! The stage contract and its shared runner.
//!
//! A [`StageSpec`] supplies the per-tool pieces (command plan, progress
//! dialect, exit-code policy, post-processing); the [`Stage`] runner owns
//! the contract semantics every stage shares: the re-entrancy guard, event
//! emission, line routing, subprocess lifecycle, and the launch-failure /
//! run-failure asymmetry.
//!
//! That asymmetry is deliberate and load-bearing for callers: a stage that
//! could not launch completes with `success == false`; a stage whose child
//! ran and exited nonzero completes with `success == true` and surfaces the
//! failure through the job's exit-code field. Queue layers decide what a
//! nonzero exit means; launch failures mean nothing ever started.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rf_av::{spawn_line_reader, ProcessLauncher, ToolRegistry, WorkArea};
use rf_core::config::Config;
use rf_core::job::{JobDescriptor, StepKind};
use rf_core::{Error, EventSink, Result, StageEvent};

use crate::bridge::{BridgeFlags, BridgeSink, StreamBridge};
use crate::chain;
use crate::progress::{Eta, ProgressParser};

/// Which output stream a tool prints its diagnostics/progress on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStream {
    Stdout,
    Stderr,
}

/// One resolved tool command line.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Resolved executable path.
    pub program: PathBuf,
    /// Arguments, already rendered.
    pub args: Vec<String>,
    /// Stream carrying the tool's diagnostic/progress text.
    pub diagnostics: ProgressStream,
}

/// How a dual-process stage connects decoder to encoder.
#[derive(Debug, Clone)]
pub enum Topology {
    /// Relay decoder stdout directly into the encoder's piped stdin.
    EncoderStdin,
    /// Relay decoder stdout into a FIFO the encoder opens as an input file.
    /// The FIFO is created before the encoder is launched.
    NamedPipe(PathBuf),
}

/// Which process's diagnostics feed the progress parser in a dual plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFrom {
    Decoder,
    Encoder,
}

/// What a stage wants executed.
pub enum StagePlan {
    /// One tool reading/writing files directly.
    Single { invocation: ToolInvocation },
    /// Decoder and encoder connected through a [`StreamBridge`].
    ///
    /// The decoder's stdout is the sample stream; its stderr carries
    /// diagnostics and the `data_marker` substring that opens the relay's
    /// readiness gate.
    Dual {
        decoder: ToolInvocation,
        encoder: ToolInvocation,
        topology: Topology,
        data_marker: String,
        parse_from: ParseFrom,
    },
}

/// Shared context handed to every stage run.
pub struct StageContext {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Resolved external tools.
    pub tools: Arc<ToolRegistry>,
    /// Intermediate-file directory.
    pub work: Arc<WorkArea>,
    /// Event channel to the queue/UI layer.
    pub events: EventSink,
}

impl StageContext {
    pub fn new(
        config: Arc<Config>,
        tools: Arc<ToolRegistry>,
        work: Arc<WorkArea>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            tools,
            work,
            events,
        }
    }

    fn launcher(&self) -> ProcessLauncher {
        ProcessLauncher::new(self.work.dir().to_path_buf(), self.config.process.nice)
    }
}

/// Per-tool hooks implemented by each concrete stage.
#[async_trait]
pub trait StageSpec: Send + Sync {
    /// Stage name used in events and logs.
    fn name(&self) -> String;

    /// The chain step this stage implements.
    fn step(&self) -> StepKind;

    /// Pass number for multi-pass encodes, stamped onto emitted progress.
    fn pass(&self) -> Option<u32> {
        None
    }

    /// Build the command plan for this job.
    ///
    /// # Errors
    ///
    /// Any error here is a launch failure: required tool missing, required
    /// input not yet produced.
    fn plan(&self, job: &JobDescriptor, ctx: &StageContext) -> Result<StagePlan>;

    /// The progress dialect for this run.
    fn parser(&self, job: &JobDescriptor) -> Box<dyn ProgressParser>;

    /// Whether `code` counts as a successful run. Default: zero only.
    fn exit_ok(&self, code: i32) -> bool {
        code == 0
    }

    /// Post-processing after a successful run: re-probe outputs, update
    /// stream descriptors, register consumed intermediates for deletion.
    ///
    /// Failures here are logged and swallowed by the runner; stale stream
    /// metadata is an accepted degraded mode.
    async fn finish(&self, _job: &mut JobDescriptor, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }
}

struct ParserState {
    parser: Box<dyn ProgressParser>,
    eta: Eta,
}

/// Runner owning the shared stage semantics.
///
/// One `Stage` runs one job step at a time; `start` on an already-running
/// stage is rejected without spawning anything. `stop` may be called from
/// any task at any time, including when nothing was ever started.
pub struct Stage {
    spec: Box<dyn StageSpec>,
    running: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
}

impl Stage {
    pub fn new(spec: Box<dyn StageSpec>) -> Self {
        Self {
            spec,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Stage name, as emitted in events and logs.
    pub fn name(&self) -> String {
        self.spec.name()
    }

    /// The chain step this stage implements.
    pub fn step(&self) -> StepKind {
        self.spec.step()
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether `code` counts as success for this stage's tool.
    pub fn exit_ok(&self, code: i32) -> bool {
        self.spec.exit_ok(code)
    }

    /// Force-terminate any children of the current run.
    ///
    /// Idempotent; never errors; safe with no run in flight.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
        self.running.store(false, Ordering::Release);
    }

    /// Interface symmetry only; stages hold no long-lived resources.
    pub fn shutdown(&self) {}

    /// Run this stage against `job`.
    ///
    /// Never returns an error: every failure is translated into a
    /// `Completed` event and the job's exit-code field.
    pub async fn start(&self, job: &mut JobDescriptor, ctx: &StageContext) {
        let name = self.spec.name();

        // Re-entrancy guard. Marked running before anything can fail so a
        // racing second call is rejected.
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::warn!(stage = %name, "start called while already running");
            job.exit_code = -1;
            ctx.events.send(StageEvent::Completed {
                stage: name.clone(),
                success: false,
                error: Some(Error::AlreadyRunning(name).to_string()),
                message: "stage already running".into(),
            });
            return;
        }

        // Fresh run context per invocation; a token left cancelled by a
        // previous stop() must not poison this run.
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        match self.run(job, ctx, &cancel).await {
            Ok(code) => {
                job.exit_code = code;
                if self.spec.exit_ok(code) {
                    if let Err(e) = self.spec.finish(job, ctx).await {
                        tracing::warn!(stage = %self.spec.name(), "post-processing failed: {e}");
                    }
                } else {
                    tracing::warn!(stage = %self.spec.name(), code, "tool exited nonzero");
                }

                let step = self.spec.step();
                job.advance(step, chain::next_after(step, job));
                self.running.store(false, Ordering::Release);

                ctx.events.send(StageEvent::Completed {
                    stage: self.spec.name(),
                    success: true,
                    error: None,
                    message: format!("exit code {code}"),
                });
            }
            Err(e) => {
                tracing::error!(stage = %self.spec.name(), "launch failed: {e}");
                job.exit_code = -1;
                self.running.store(false, Ordering::Release);

                ctx.events.send(StageEvent::Completed {
                    stage: self.spec.name(),
                    success: false,
                    error: Some(e.to_string()),
                    message: "launch failed".into(),
                });
            }
        }
    }

    async fn run(
        &self,
        job: &mut JobDescriptor,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let plan = self.spec.plan(job, ctx)?;
        let parser = self.spec.parser(job);
        let state = Arc::new(Mutex::new(ParserState {
            parser,
            eta: Eta::new(),
        }));

        match plan {
            StagePlan::Single { invocation } => {
                self.run_single(invocation, state, ctx, cancel).await
            }
            StagePlan::Dual {
                decoder,
                encoder,
                topology,
                data_marker,
                parse_from,
            } => {
                self.run_dual(decoder, encoder, topology, data_marker, parse_from, state, ctx, cancel)
                    .await
            }
        }
    }

    async fn run_single(
        &self,
        invocation: ToolInvocation,
        state: Arc<Mutex<ParserState>>,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let name = self.spec.name();
        let mut proc =
            ctx.launcher()
                .spawn(&name, &invocation.program, &invocation.args, false)?;

        ctx.events.send(StageEvent::Started {
            stage: name.clone(),
            pid: Some(proc.pid),
        });

        let stdout = boxed_reader(proc.child.stdout.take());
        let stderr = boxed_reader(proc.child.stderr.take());
        let (progress, other) = match invocation.diagnostics {
            ProgressStream::Stdout => (stdout, stderr),
            ProgressStream::Stderr => (stderr, stdout),
        };

        let mut readers = Vec::new();
        if let Some(stream) = progress {
            readers.push(self.attach_parser(stream, state, ctx));
        }
        if let Some(stream) = other {
            readers.push(self.attach_log(stream));
        }

        let code = wait_with_cancel(&mut proc.child, cancel).await;
        drain_readers(readers).await;
        Ok(code)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_dual(
        &self,
        decoder: ToolInvocation,
        encoder: ToolInvocation,
        topology: Topology,
        data_marker: String,
        parse_from: ParseFrom,
        state: Arc<Mutex<ParserState>>,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let name = self.spec.name();
        let launcher = ctx.launcher();
        let flags = BridgeFlags::new();

        let mut dec = launcher.spawn(&name, &decoder.program, &decoder.args, false)?;
        flags.decoder_alive.store(true, Ordering::Release);

        let relay_source = dec
            .child
            .stdout
            .take()
            .ok_or_else(|| Error::launch(&name, "decoder stdout not captured"))?;
        let dec_diag = dec.child.stderr.take();

        // The FIFO must exist before the encoder starts so its open cannot
        // race the endpoint.
        if let Topology::NamedPipe(path) = &topology {
            if let Err(e) = StreamBridge::create_fifo(path) {
                let _ = dec.child.start_kill();
                return Err(e);
            }
        }

        let pipe_stdin = matches!(topology, Topology::EncoderStdin);
        let mut enc = match launcher.spawn(&name, &encoder.program, &encoder.args, pipe_stdin)
        {
            Ok(p) => p,
            Err(e) => {
                let _ = dec.child.start_kill();
                return Err(e);
            }
        };
        flags.encoder_alive.store(true, Ordering::Release);

        ctx.events.send(StageEvent::Started {
            stage: name.clone(),
            pid: Some(enc.pid),
        });

        let mut readers = Vec::new();

        // Decoder stderr: data-marker detection, plus progress parsing when
        // the decoder is the progress source.
        if let Some(stream) = dec_diag {
            let marker = data_marker.clone();
            let data_ready = flags.data_ready.clone();
            let handler = self.line_handler(state.clone(), ctx, parse_from == ParseFrom::Decoder);
            readers.push(spawn_line_reader(stream, move |line| {
                if !marker.is_empty() && line.contains(&marker) {
                    data_ready.store(true, Ordering::Release);
                }
                handler(line);
            }));
        }

        let enc_stdout = boxed_reader(enc.child.stdout.take());
        let enc_stderr = boxed_reader(enc.child.stderr.take());
        let (enc_diag, enc_other) = match encoder.diagnostics {
            ProgressStream::Stdout => (enc_stdout, enc_stderr),
            ProgressStream::Stderr => (enc_stderr, enc_stdout),
        };
        if let Some(stream) = enc_diag {
            let handler = self.line_handler(state, ctx, parse_from == ParseFrom::Encoder);
            readers.push(spawn_line_reader(stream, handler));
        }
        if let Some(stream) = enc_other {
            readers.push(self.attach_log(stream));
        }

        let sink = match &topology {
            Topology::EncoderStdin => BridgeSink::Writer(Box::new(
                enc.child
                    .stdin
                    .take()
                    .ok_or_else(|| Error::launch(&name, "encoder stdin not captured"))?,
            )),
            Topology::NamedPipe(path) => BridgeSink::FifoPath(path.clone()),
        };

        let bridge = StreamBridge::new(flags.clone());
        let relay = tokio::spawn(async move {
            match bridge.relay(relay_source, sink).await {
                Ok(bytes) => tracing::debug!(bytes, "relay finished"),
                Err(e) => tracing::warn!("relay failed: {e}"),
            }
        });

        // The decoder gets its own waiter so its liveness flag drops the
        // moment it exits, independent of the encoder.
        let decoder_cancel = cancel.child_token();
        let decoder_alive = flags.decoder_alive.clone();
        let waiter_cancel = decoder_cancel.clone();
        let decoder_waiter: JoinHandle<()> = tokio::spawn(async move {
            let mut child = dec.child;
            let code = wait_with_cancel(&mut child, &waiter_cancel).await;
            decoder_alive.store(false, Ordering::Release);
            tracing::debug!(code, "decoder exited");
        });

        // The encoder's exit decides the stage outcome.
        let code = wait_with_cancel(&mut enc.child, cancel).await;
        flags.encoder_alive.store(false, Ordering::Release);

        // Reap a decoder that outlived the encoder.
        decoder_cancel.cancel();
        let _ = decoder_waiter.await;
        readers.push(relay);
        drain_readers(readers).await;

        Ok(code)
    }

    /// Build a line callback that either parses progress or forwards to the
    /// diagnostic log.
    fn line_handler(
        &self,
        state: Arc<Mutex<ParserState>>,
        ctx: &StageContext,
        parse: bool,
    ) -> impl Fn(String) + Send + 'static {
        let stage = self.spec.name();
        let pass = self.spec.pass();
        let events = ctx.events.clone();
        move |line: String| {
            if parse {
                let mut st = state.lock();
                let ParserState { parser, eta } = &mut *st;
                if let Some(update) = parser.parse_line(&line) {
                    let model = eta.model(&update, pass);
                    events.send(StageEvent::Progress {
                        stage: stage.clone(),
                        model,
                    });
                    return;
                }
            }
            tracing::info!(stage = %stage, "{line}");
        }
    }

    fn attach_parser<R>(
        &self,
        stream: R,
        state: Arc<Mutex<ParserState>>,
        ctx: &StageContext,
    ) -> JoinHandle<()>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        spawn_line_reader(stream, self.line_handler(state, ctx, true))
    }

    fn attach_log<R>(&self, stream: R) -> JoinHandle<()>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let stage = self.spec.name();
        spawn_line_reader(stream, move |line| {
            tracing::info!(stage = %stage, "{line}");
        })
    }
}

/// Erased child output stream, so stdout and stderr can be routed by role.
type PipeReader = Box<dyn tokio::io::AsyncRead + Unpin + Send>;

fn boxed_reader<R>(stream: Option<R>) -> Option<PipeReader>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    stream.map(|s| Box::new(s) as PipeReader)
}

/// How long reader and relay tasks may keep draining after the direct
/// child has been reaped.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Await pipe tasks, aborting stragglers.
///
/// Readers normally end at pipe EOF, but a tool that forked its own
/// children can leave the write end held open by an orphan after the
/// direct child is gone.
async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    for mut handle in readers {
        if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            tracing::debug!("pipe reader blocked past child exit; aborting");
            handle.abort();
        }
    }
}

/// Wait for the child, force-killing it if the token fires first.
async fn wait_with_cancel(child: &mut Child, cancel: &CancellationToken) -> i32 {
    tokio::select! {
        status = child.wait() => match status {
            Ok(s) => s.code().unwrap_or(-1),
            Err(e) => {
                tracing::warn!("wait failed: {e}");
                -1
            }
        },
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            match child.wait().await {
                Ok(s) => s.code().unwrap_or(-1),
                Err(_) => -1,
            }
        }
    }
}
