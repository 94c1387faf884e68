//! What a task manager needs from the program it drives: something that
//! writes inputs and run lines, and something that reads the results.

use crate::error::Result;
use autogen_client::runner::ScriptLine;
use autogen_core::engine::ReaderHandle;
use autogen_core::environment::Environment;
use autogen_core::reconcile::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything a writer or reader may look at for one task.
pub struct StageContext<'a> {
    pub name: &'a str,
    pub dir: &'a Path,
    /// Recorded configuration with any recovery overrides applied.
    pub config: &'a Fields,
    /// Upstream artifacts resolved at staging, by input name.
    pub inputs: &'a BTreeMap<String, PathBuf>,
    pub env: &'a Environment,
}

pub trait Writer: Send + Sync {
    fn write_inputs(&self, ctx: &StageContext<'_>) -> Result<()>;

    /// Lines for one attempt, in order.
    fn run_lines(&self, ctx: &StageContext<'_>) -> Vec<ScriptLine>;

    fn input_files(&self, name: &str) -> Vec<String>;

    /// Files whose presence means an attempt has started producing results.
    fn expected_outputs(&self, name: &str) -> Vec<String>;

    /// Identifies the program and how it is invoked; a change to it on a
    /// staged task is drift. `Null` opts out.
    fn signature(&self) -> Value {
        Value::Null
    }

    /// Files moved aside under a retry-indexed name before the next attempt.
    fn attempt_files(&self, name: &str) -> Vec<String> {
        let mut files = self.input_files(name);
        files.extend(self.expected_outputs(name));
        files
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Ran out of time or was interrupted; a restart can continue.
    Killed,
    /// Ran to the end without converging; a damped restart may help.
    Diverged,
    Crashed,
}

impl FailureKind {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FailureKind::Killed | FailureKind::Diverged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub outcome: Outcome,
    pub output: Value,
    pub artifacts: BTreeMap<String, String>,
    pub message: Option<String>,
}

impl Collected {
    pub fn success(output: Value) -> Self {
        Self {
            outcome: Outcome::Success,
            output,
            artifacts: BTreeMap::new(),
            message: None,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure(kind),
            output: Value::Null,
            artifacts: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn with_artifact(mut self, name: &str, path: &str) -> Self {
        self.artifacts.insert(name.to_string(), path.to_string());
        self
    }
}

pub trait Reader: Send + Sync {
    fn collect(&self, ctx: &StageContext<'_>) -> Result<Collected>;
}

/// The reader's memory, kept in the task record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderState {
    pub completed: bool,
    pub output: Value,
    pub last_outcome: Option<Outcome>,
}

impl ReaderHandle for ReaderState {
    fn completed(&self) -> bool {
        self.completed
    }
}
