//! # rf-pipeline
//!
//! The encode/demux orchestration core.
//!
//! This crate provides:
//!
//! - **[`StageSpec`]** / **[`Stage`]** -- the per-tool stage contract and
//!   the shared runner owning its lifecycle semantics (re-entrancy guard,
//!   launch-failure vs. run-failure asymmetry, idempotent stop).
//! - **[`StreamBridge`]** -- the readiness-gated byte relay connecting a
//!   decoder child to an encoder child through stdin or a named FIFO.
//! - **[`progress`]** -- per-tool progress dialects unified into the
//!   [`ProgressModel`](rf_core::ProgressModel).
//! - **Concrete stages** ([`stages`]) -- demux, extract, video/audio
//!   encode, subtitle convert, and the three container muxers.
//! - **[`create_stages`]** / **[`chain`]** -- step-to-stage expansion and
//!   step sequencing.

pub mod bridge;
pub mod chain;
pub mod factory;
pub mod progress;
pub mod stage;
pub mod stages;

// Re-export key types at the crate root.
pub use bridge::{BridgeFlags, BridgeSink, StreamBridge};
pub use factory::create_stages;
pub use progress::{Eta, ProgressParser, ProgressUpdate};
pub use stage::{
    ParseFrom, ProgressStream, Stage, StageContext, StagePlan, StageSpec, ToolInvocation,
    Topology,
};
