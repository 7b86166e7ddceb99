//! External capture and repair tools.

pub mod capture;
pub mod process;

pub use capture::{CaptureRunner, RepairOutcome, StreamlinkStatus, parse_streamlink_output};
pub use process::{CommandSpec, ProcessExit, ProcessLauncher, RunningProcess, TokioProcessLauncher};
