//! Core types shared by every ripforge crate: the unified error type,
//! configuration, the job descriptor passed through the stage chain, the
//! progress model, and the stage event protocol.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod progress;

pub use error::{Error, Result};
pub use events::{EventSink, StageEvent};
pub use ids::JobId;
pub use job::{
    AudioStream, Container, EncodingProfile, JobDescriptor, SourceKind, StepKind, SubtitleStream,
    VideoStream,
};
pub use progress::ProgressModel;
