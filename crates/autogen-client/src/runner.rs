use crate::error::Result;
use crate::resources::ResourceDirectives;
use crate::script::BatchScript;
use crate::targets::QueueBackend;
use autogen_core::engine::StatusProbe;
use autogen_core::model::{ExternalJobId, RunnerStatus, SchedulerType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "line", rename_all = "snake_case")]
pub enum ScriptLine {
    /// Plain shell line, e.g. a file copy.
    Command(String),
    /// A computation, launched through the parallel launcher when one is set.
    Task(String),
}

/// The part of a runner that survives between ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerState {
    pub pending: Vec<ScriptLine>,
    pub job_ids: Vec<ExternalJobId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Nothing,
    Submitted(ExternalJobId),
    /// The queue refused; pending lines are kept for the next tick.
    Deferred(String),
}

/// Accumulates the commands of one attempt and hands them to a queue backend.
pub struct Runner {
    backend: Arc<dyn QueueBackend>,
    directives: ResourceDirectives,
    mpirun: Option<String>,
    state: RunnerState,
}

impl Runner {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        directives: ResourceDirectives,
        mpirun: Option<&str>,
        state: RunnerState,
    ) -> Self {
        Self {
            backend,
            directives,
            mpirun: mpirun.map(str::to_string),
            state,
        }
    }

    pub fn add_command(&mut self, line: impl Into<String>) {
        self.state.pending.push(ScriptLine::Command(line.into()));
    }

    pub fn add_task(&mut self, line: impl Into<String>) {
        self.state.pending.push(ScriptLine::Task(line.into()));
    }

    pub fn extend(&mut self, lines: impl IntoIterator<Item = ScriptLine>) {
        self.state.pending.extend(lines);
    }

    pub fn has_pending(&self) -> bool {
        !self.state.pending.is_empty()
    }

    pub fn job_ids(&self) -> &[ExternalJobId] {
        &self.state.job_ids
    }

    pub fn into_state(self) -> RunnerState {
        self.state
    }

    /// Adopts an id handed out for a submission made on this runner's behalf.
    pub fn track(&mut self, id: ExternalJobId) {
        if !self.state.job_ids.contains(&id) {
            self.state.job_ids.push(id);
        }
    }

    pub fn render_lines(&self) -> Vec<String> {
        let launcher = self
            .mpirun
            .as_ref()
            .map(|t| t.replace("{np}", &self.directives.np().to_string()));
        self.state
            .pending
            .iter()
            .map(|line| match (line, &launcher) {
                (ScriptLine::Command(cmd), _) => cmd.clone(),
                (ScriptLine::Task(cmd), Some(prefix)) => format!("{} {}", prefix, cmd),
                (ScriptLine::Task(cmd), None) => cmd.clone(),
            })
            .collect()
    }

    /// Aggregate queue state of every tracked submission. A failed poll is
    /// treated as still running so nothing is resubmitted blindly.
    pub fn check_status(&self) -> RunnerStatus {
        if self.state.job_ids.is_empty() {
            return RunnerStatus::Unknown;
        }
        match self.backend.statuses(&self.state.job_ids) {
            Ok(statuses) => {
                if statuses.values().any(|s| s.is_active()) {
                    RunnerStatus::Running
                } else if statuses
                    .values()
                    .all(|s| *s == autogen_core::model::QueueStatus::Finished)
                {
                    RunnerStatus::Finished
                } else {
                    RunnerStatus::Unknown
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Could not poll {} for jobs {:?}, assuming they are still queued: {}",
                    self.backend.scheduler(),
                    self.state.job_ids,
                    e
                );
                RunnerStatus::Running
            }
        }
    }

    /// Submits pending lines as one job. Pending lines are cleared only once
    /// the queue accepted them.
    pub fn submit(&mut self, name: &str, dir: &Path) -> SubmitOutcome {
        if !self.has_pending() {
            return SubmitOutcome::Nothing;
        }
        let script = BatchScript::new(name, self.directives.clone(), self.render_lines());
        match self.backend.submit(&script, dir) {
            Ok(id) => {
                self.state.pending.clear();
                self.state.job_ids.push(id.clone());
                SubmitOutcome::Submitted(id)
            }
            Err(e) => {
                tracing::warn!(
                    "Submission of '{}' failed, keeping {} line(s) for the next tick: {}",
                    name,
                    self.state.pending.len(),
                    e
                );
                SubmitOutcome::Deferred(e.to_string())
            }
        }
    }

    /// Writes pending lines as a plain script for a bundled submission.
    pub fn script(&mut self, path: &Path) -> Result<bool> {
        if !self.has_pending() {
            return Ok(false);
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let script = BatchScript::new(&name, self.directives.clone(), self.render_lines());
        fs_err::write(path, script.render(SchedulerType::Local))?;
        self.state.pending.clear();
        Ok(true)
    }
}

impl StatusProbe for Runner {
    fn check_status(&self) -> RunnerStatus {
        Runner::check_status(self)
    }
}
