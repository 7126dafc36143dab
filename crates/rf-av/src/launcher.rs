//! Child-process launching with redirected stdio and asynchronous
//! line-oriented output readers.
//!
//! Every pipeline stage goes through [`ProcessLauncher::spawn`]: working
//! directory pinned to the configured work dir, stdout/stderr piped,
//! kill-on-drop so an aborted stage never leaks a child, and the configured
//! niceness applied so encodes never starve the host.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use rf_core::{Error, Result};

/// A spawned child process with its captured id.
#[derive(Debug)]
pub struct LaunchedProcess {
    /// OS process id, captured at spawn time.
    pub pid: u32,
    /// The child handle; stdout/stderr/stdin are still attached.
    pub child: Child,
}

/// Launches external tool processes with uniform settings.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    work_dir: PathBuf,
    nice: i32,
}

impl ProcessLauncher {
    /// Create a launcher that runs children in `work_dir` at the given
    /// niceness.
    pub fn new(work_dir: PathBuf, nice: i32) -> Self {
        Self { work_dir, nice }
    }

    /// Spawn `program` with `args`.
    ///
    /// stdout and stderr are always piped; stdin is piped only when
    /// `pipe_stdin` is set (encoder side of a stdin-fed bridge), and closed
    /// otherwise so no tool ever blocks waiting for terminal input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] when the OS cannot create the process.
    pub fn spawn(
        &self,
        stage: &str,
        program: &Path,
        args: &[String],
        pipe_stdin: bool,
    ) -> Result<LaunchedProcess> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let nice = self.nice;
            if nice != 0 {
                // Applied in the child between fork and exec.
                unsafe {
                    cmd.pre_exec(move || {
                        let _ = nix::libc::nice(nice);
                        Ok(())
                    });
                }
            }
        }

        tracing::debug!(
            stage,
            program = %program.display(),
            ?args,
            "spawning child process"
        );

        let child = cmd
            .spawn()
            .map_err(|e| Error::launch(stage, format!("{}: {e}", program.display())))?;
        let pid = child.id().unwrap_or_default();

        Ok(LaunchedProcess { pid, child })
    }
}

/// Spawn a task that feeds each output line of `stream` to `on_line`.
///
/// Lines are split on both `\n` and `\r`: most of the wrapped tools rewrite
/// a single console line with carriage returns while reporting progress, so
/// a newline-only split would see nothing until the process exits. Empty
/// lines are dropped. Any trailing unterminated text is delivered at EOF.
pub fn spawn_line_reader<R, F>(stream: R, mut on_line: F) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    F: FnMut(String) + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = stream;
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 8192];

        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = pending
                        .iter()
                        .position(|&b| b == b'\n' || b == b'\r')
                    {
                        let raw: Vec<u8> = pending.drain(..=pos).collect();
                        let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            on_line(trimmed.to_string());
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!("output reader stopped: {e}");
                    break;
                }
            }
        }

        if !pending.is_empty() {
            let text = String::from_utf8_lossy(&pending);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                on_line(trimmed.to_string());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn launcher() -> ProcessLauncher {
        ProcessLauncher::new(std::env::temp_dir(), 0)
    }

    #[tokio::test]
    async fn spawn_captures_pid_and_exit() {
        let mut proc = launcher()
            .spawn("test", Path::new("true"), &[], false)
            .unwrap();
        assert!(proc.pid > 0);
        let status = proc.child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn spawn_nonexistent_program_is_launch_error() {
        let result = launcher().spawn(
            "test",
            Path::new("nonexistent_tool_xyz_12345"),
            &[],
            false,
        );
        match result {
            Err(rf_core::Error::Launch { stage, .. }) => assert_eq!(stage, "test"),
            other => panic!("expected launch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn line_reader_splits_newlines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();

        let data: &[u8] = b"alpha\nbeta\ngamma";
        let handle = spawn_line_reader(data, move |line| {
            sink.lock().unwrap().push(line);
        });
        handle.await.unwrap();

        let got = lines.lock().unwrap().clone();
        assert_eq!(got, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn line_reader_splits_carriage_returns() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();

        // tsMuxeR-style progress rewrites one console line with \r.
        let data: &[u8] = b"10.0%\r20.0%\r30.0%\r";
        let handle = spawn_line_reader(data, move |line| {
            sink.lock().unwrap().push(line);
        });
        handle.await.unwrap();

        let got = lines.lock().unwrap().clone();
        assert_eq!(got, vec!["10.0%", "20.0%", "30.0%"]);
    }

    #[tokio::test]
    async fn line_reader_drops_blank_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();

        let data: &[u8] = b"\r\n\r\nonly\r\n";
        let handle = spawn_line_reader(data, move |line| {
            sink.lock().unwrap().push(line);
        });
        handle.await.unwrap();

        let got = lines.lock().unwrap().clone();
        assert_eq!(got, vec!["only"]);
    }

    #[tokio::test]
    async fn spawned_process_output_reaches_reader() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();

        let mut proc = launcher()
            .spawn("test", Path::new("echo"), &["hello".into()], false)
            .unwrap();
        let stdout = proc.child.stdout.take().unwrap();
        let handle = spawn_line_reader(stdout, move |line| {
            sink.lock().unwrap().push(line);
        });

        proc.child.wait().await.unwrap();
        handle.await.unwrap();

        let got = lines.lock().unwrap().clone();
        assert_eq!(got, vec!["hello"]);
    }
}
