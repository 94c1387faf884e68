use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    #[default]
    Local,
    Slurm,
    Pbs,
}

impl fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerType::Local => write!(f, "local"),
            SchedulerType::Slurm => write!(f, "slurm"),
            SchedulerType::Pbs => write!(f, "pbs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSchedulerTypeError(pub String);

impl fmt::Display for ParseSchedulerTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid scheduler type: '{}'. Valid values are: local, slurm, pbs",
            self.0
        )
    }
}

impl std::error::Error for ParseSchedulerTypeError {}

impl FromStr for SchedulerType {
    type Err = ParseSchedulerTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(SchedulerType::Local),
            "slurm" => Ok(SchedulerType::Slurm),
            "pbs" => Ok(SchedulerType::Pbs),
            _ => Err(ParseSchedulerTypeError(s.to_string())),
        }
    }
}

/// Identifier a queue backend hands out for one submission.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct ExternalJobId(pub String);

impl fmt::Display for ExternalJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExternalJobId {
    fn from(s: String) -> Self {
        ExternalJobId(s)
    }
}

impl From<&str> for ExternalJobId {
    fn from(s: &str) -> Self {
        ExternalJobId(s.to_string())
    }
}

/// What a queue backend reports for one external job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Running,
    Finished,
    Unknown,
}

impl QueueStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::Running)
    }
}

/// Aggregate status of every submission a runner tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Unknown,
    Running,
    Finished,
}

/// Outcome of status resolution for one task on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedStatus {
    Done,
    Running,
    NotStarted,
    ReadyForAnalysis,
}

impl fmt::Display for ResolvedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolvedStatus::Done => "done",
            ResolvedStatus::Running => "running",
            ResolvedStatus::NotStarted => "not_started",
            ResolvedStatus::ReadyForAnalysis => "ready_for_analysis",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Unstaged,
    Staged,
    NotStarted,
    Running,
    ReadyForAnalysis,
    Retrying,
    Done,
    Failed,
}

impl TaskStatus {
    /// Only a finished task lets its job move on to the next stage.
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl From<ResolvedStatus> for TaskStatus {
    fn from(status: ResolvedStatus) -> Self {
        match status {
            ResolvedStatus::Done => TaskStatus::Done,
            ResolvedStatus::Running => TaskStatus::Running,
            ResolvedStatus::NotStarted => TaskStatus::NotStarted,
            ResolvedStatus::ReadyForAnalysis => TaskStatus::ReadyForAnalysis,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Unstaged => "unstaged",
            TaskStatus::Staged => "staged",
            TaskStatus::NotStarted => "not_started",
            TaskStatus::Running => "running",
            TaskStatus::ReadyForAnalysis => "ready_for_analysis",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// How reconciliation treats one configuration field when the plan and the
/// persisted record disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Changing it would alter results; refused.
    #[default]
    Immutable,
    /// Operational only; taken from the plan.
    Safe,
    /// The persisted value wins once present.
    TakeIfNewer,
}
