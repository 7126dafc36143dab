//! The stage event protocol: the only public surface the queue/UI layer
//! consumes.
//!
//! [`EventSink`] wraps an unbounded channel sender; send errors (receiver
//! dropped) are ignored so a stage never fails because nobody is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::progress::ProgressModel;

/// Event emitted by a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// The stage launched its child process(es).
    Started {
        /// Stage name.
        stage: String,
        /// Process id of the (primary) child.
        pid: Option<u32>,
    },
    /// A recognized progress line was parsed.
    Progress {
        /// Stage name.
        stage: String,
        /// The populated progress model.
        model: ProgressModel,
    },
    /// The stage finished.
    ///
    /// `success == false` only for *launch*-time failures. A child process
    /// that ran to completion with a nonzero exit code still completes with
    /// `success == true`; callers must check the job's exit-code field.
    Completed {
        /// Stage name.
        stage: String,
        /// False only when no process could be started.
        success: bool,
        /// Error description for launch failures.
        error: Option<String>,
        /// Human-readable summary of the run.
        message: String,
    },
}

/// Sender half of the stage event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StageEvent>,
}

impl EventSink {
    /// Create a sink/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create a sink that discards all events.
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Emit an event. Errors from a dropped receiver are ignored.
    pub fn send(&self, event: StageEvent) {
        let _ = self.tx.send(event);
    }
}
