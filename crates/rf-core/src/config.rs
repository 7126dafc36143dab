//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for tools, the work directory, pipe channels, and process
//! scheduling. Every section defaults sensibly so a completely empty `{}`
//! file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub work: WorkConfig,
    pub pipes: PipeConfig,
    pub process: ProcessConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(ref dir) = self.tools.tools_dir {
            if !dir.is_dir() {
                warnings.push(format!(
                    "tools.tools_dir {} does not exist or is not a directory",
                    dir.display()
                ));
            }
        }

        if self.work.dir.as_os_str().is_empty() {
            warnings.push("work.dir is empty".into());
        }

        if self.pipes.decode_channel.is_empty() {
            warnings.push("pipes.decode_channel is empty".into());
        }
        if self.pipes.encode_channel.is_empty() {
            warnings.push("pipes.encode_channel is empty".into());
        }
        if self.pipes.decode_channel == self.pipes.encode_channel {
            warnings.push("pipes.decode_channel and pipes.encode_channel are identical".into());
        }

        if !(0..=19).contains(&self.process.nice) {
            warnings.push(format!(
                "process.nice {} is outside the usable range 0..=19",
                self.process.nice
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
///
/// A tool is resolved from its explicit `*_path` override first, then from
/// `tools_dir` (preferring a `<name>_x64` variant when `prefer_x64` is set),
/// then from `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory holding bundled tool binaries.
    pub tools_dir: Option<PathBuf>,
    /// Prefer `<name>_x64` variants from `tools_dir` when present.
    pub prefer_x64: bool,
    pub eac3to_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub x264_path: Option<PathBuf>,
    pub fdkaac_path: Option<PathBuf>,
    pub mkvmerge_path: Option<PathBuf>,
    pub mkvextract_path: Option<PathBuf>,
    pub mp4box_path: Option<PathBuf>,
    pub tsmuxer_path: Option<PathBuf>,
    pub bdsup2sub_path: Option<PathBuf>,
}

/// Intermediate-file (demux/output) directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkConfig {
    /// Directory for demuxed streams, encode output, and pipe endpoints.
    /// Every child process runs with this as its working directory.
    pub dir: PathBuf,
    /// Keep intermediate files after a successful job (skip cleanup).
    pub keep_temp_files: bool,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/ripforge/work"),
            keep_temp_files: false,
        }
    }
}

/// Named pipe channel settings.
///
/// Channel names are scoped per encoder *kind*, not per job: only one stage
/// of a given kind may run at a time per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Channel name for decoder-side endpoints. Reserved; no current stage
    /// opens a decode-side FIFO, but the name must stay distinct from
    /// `encode_channel`.
    pub decode_channel: String,
    /// Channel name for encoder-side endpoints.
    pub encode_channel: String,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            decode_channel: "ripforge-decode".into(),
            encode_channel: "ripforge-encode".into(),
        }
    }
}

/// Child-process scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Niceness applied to every child process (0 = normal, 19 = lowest).
    pub nice: i32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self { nice: 10 }
    }
}
