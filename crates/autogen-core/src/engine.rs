use crate::model::{ResolvedStatus, RunnerStatus};
use std::path::Path;

/// Anything that can report whether its submitted work is still in a queue.
pub trait StatusProbe {
    fn check_status(&self) -> RunnerStatus;
}

/// Anything that remembers whether results were already collected.
pub trait ReaderHandle {
    fn completed(&self) -> bool;
}

/// Decides where a task stands from three independent signals. First match
/// wins: collected results, an active queue entry, absent outputs.
///
/// Never touches the queue directly and never writes anything.
pub fn resolve_status(
    runner: &dyn StatusProbe,
    reader: &dyn ReaderHandle,
    dir: &Path,
    expected_outputs: &[String],
) -> ResolvedStatus {
    if reader.completed() {
        return ResolvedStatus::Done;
    }
    if runner.check_status() == RunnerStatus::Running {
        return ResolvedStatus::Running;
    }
    if !expected_outputs.iter().any(|name| dir.join(name).exists()) {
        return ResolvedStatus::NotStarted;
    }
    ResolvedStatus::ReadyForAnalysis
}
