// Process module - notebook server lifecycle

pub mod launcher;
mod output;
pub mod probe;
pub mod restart;
mod supervisor;
mod types;

pub use launcher::{LauncherSettings, ProcessLauncher};
pub use output::OutputCapture;
pub use probe::{LivenessProbe, ProbeReport, ProbeSignal};
pub use restart::{RestartPolicy, RestartTracker};
pub use supervisor::{Supervisor, SupervisorSettings};
pub use types::{
    ExitInfo, Phase, ProcessHandle, ProtectionState, StartReport, StatusSnapshot, StopOutcome,
};
