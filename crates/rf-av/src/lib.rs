//! External-tool concerns: discovering tool binaries, launching child
//! processes with redirected stdio and line-oriented output readers, and
//! managing the shared work directory for intermediate files.

mod launcher;
mod tools;
mod workspace;

pub use launcher::{spawn_line_reader, LaunchedProcess, ProcessLauncher};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::WorkArea;
