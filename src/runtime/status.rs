//! Status classification for engine containers.

use crate::runtime::{ProcessTable, RuntimeState};
use crate::types::ContainerStatus;

/// What the probes concluded about an in-container model pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullSignal {
    /// A pull process is running
    Pulling,
    /// The engine confirmed the model is present, or no pull process exists
    Idle,
}

/// Scan the process table for a command line containing `marker`.
pub fn detect_pull(table: &ProcessTable, marker: &str) -> PullSignal {
    if table
        .command_lines()
        .iter()
        .any(|cmd| cmd.contains(marker))
    {
        PullSignal::Pulling
    } else {
        PullSignal::Idle
    }
}

/// `Running` with an active pull becomes `PullingModel`; every other raw state
/// passes through unchanged.
pub fn classify(state: RuntimeState, pull: PullSignal) -> ContainerStatus {
    match (state, pull) {
        (RuntimeState::Running, PullSignal::Pulling) => ContainerStatus::PullingModel,
        (state, _) => ContainerStatus::from(state),
    }
}
