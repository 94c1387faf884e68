use super::CommandRunner;
use crate::error::{ClientError, Result};
use autogen_core::environment::Environment;
use autogen_core::model::{ExternalJobId, QueueStatus};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Runs scheduler tools on this host, resolving them through `[executables]`.
pub struct SystemCommandRunner {
    env: Arc<Environment>,
}

impl SystemCommandRunner {
    pub fn new(env: Arc<Environment>) -> Self {
        Self { env }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run_command(&self, command: &str, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new(self.env.executable(command));
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        autogen_core::logging::log_and_print_command(&cmd);

        let output = cmd.output().map_err(|source| ClientError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(ClientError::CommandFailed {
                backend: self.env.scheduler().to_string(),
                command: format!("{} {}", command, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Reads `qstat`'s default table: job id, name, user, time, state, queue.
/// Ids missing from the table have left the queue.
pub fn parse_qstat_table(
    output: &str,
    ids: &[ExternalJobId],
) -> BTreeMap<ExternalJobId, QueueStatus> {
    let mut found = BTreeMap::new();
    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 5 {
            continue;
        }
        let listed = columns[0].split('.').next().unwrap_or_default();
        if let Some(id) = ids.iter().find(|id| id.0 == listed) {
            found.insert(id.clone(), pbs_state(columns[4]));
        }
    }
    ids.iter()
        .map(|id| {
            let status = found.get(id).copied().unwrap_or(QueueStatus::Finished);
            (id.clone(), status)
        })
        .collect()
}

pub fn pbs_state(code: &str) -> QueueStatus {
    match code {
        "R" => QueueStatus::Running,
        "Q" | "H" | "W" | "T" => QueueStatus::Queued,
        "C" | "E" | "F" => QueueStatus::Finished,
        _ => QueueStatus::Unknown,
    }
}

pub fn slurm_state(state: &str) -> QueueStatus {
    match state {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "RESIZING" | "SUSPENDED" => {
            QueueStatus::Queued
        }
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => QueueStatus::Running,
        "COMPLETED" | "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "PREEMPTED"
        | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" => QueueStatus::Finished,
        _ => QueueStatus::Unknown,
    }
}
