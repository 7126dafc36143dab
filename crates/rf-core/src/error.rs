//! Unified error type for the ripforge pipeline.
//!
//! All crates funnel their failures into [`Error`]. Stage implementations
//! never let these escape the public start/stop boundary; they are translated
//! into completion events and the job's exit-code field instead.

use std::fmt;

/// Unified error type covering all failure modes in ripforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A child process could not be created (missing executable, OS error).
    #[error("Launch error [{stage}]: {message}")]
    Launch {
        /// The stage that attempted the launch.
        stage: String,
        /// Human-readable error description.
        message: String,
    },

    /// `start` was called on a stage whose previous run has not finished.
    #[error("Stage already running: {0}")]
    AlreadyRunning(String),

    /// An external tool (eac3to, x264, mkvmerge, ...) failed or was not found.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The decoder-to-encoder byte relay failed.
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// A stage failed outside of tool execution (bad plan, missing input).
    #[error("Stage error [{stage}]: {message}")]
    Stage {
        /// The stage that failed.
        stage: String,
        /// Human-readable error description.
        message: String,
    },

    /// Configuration data failed validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::Launch`].
    pub fn launch(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Launch {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Stage`].
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Bridge`].
    pub fn bridge(message: impl Into<String>) -> Self {
        Error::Bridge(message.into())
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
