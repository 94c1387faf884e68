use super::common::parse_qstat_table;
use super::{CommandRunner, QueueBackend};
use crate::error::{ClientError, Result};
use crate::script::BatchScript;
use autogen_core::model::{ExternalJobId, QueueStatus, SchedulerType};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub struct PbsBackend {
    runner: Arc<dyn CommandRunner>,
}

impl PbsBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// `qsub` prints `<number>.<server>`; the number alone identifies the job.
pub fn parse_qsub_id(output: &str) -> Result<ExternalJobId> {
    let id = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split('.').next())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '[' || c == ']'))
        .ok_or_else(|| ClientError::JobIdParse {
            backend: SchedulerType::Pbs.to_string(),
            output: output.trim().to_string(),
        })?;
    Ok(ExternalJobId(id.to_string()))
}

fn is_unknown_job(err: &ClientError) -> bool {
    matches!(err, ClientError::CommandFailed { stderr, .. } if stderr.contains("Unknown Job Id"))
}

impl QueueBackend for PbsBackend {
    fn scheduler(&self) -> SchedulerType {
        SchedulerType::Pbs
    }

    fn submit(&self, script: &BatchScript, dir: &Path) -> Result<ExternalJobId> {
        script.write(dir, SchedulerType::Pbs)?;
        let file = script.file_name(SchedulerType::Pbs);
        let output = self.runner.run_command("qsub", &[&file], Some(dir))?;
        let id = parse_qsub_id(&output)?;
        tracing::info!("Submitted '{}' to PBS as job {}", file, id);
        Ok(id)
    }

    fn status(&self, id: &ExternalJobId) -> Result<QueueStatus> {
        match self.runner.run_command("qstat", &[&id.0], None) {
            Ok(output) => Ok(parse_qstat_table(&output, std::slice::from_ref(id))
                .remove(id)
                .unwrap_or(QueueStatus::Unknown)),
            Err(e) if is_unknown_job(&e) => Ok(QueueStatus::Finished),
            Err(e) => Err(e),
        }
    }

    fn statuses(&self, ids: &[ExternalJobId]) -> Result<BTreeMap<ExternalJobId, QueueStatus>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let output = self.runner.run_command("qstat", &[], None)?;
        Ok(parse_qstat_table(&output, ids))
    }

    fn cancel(&self, id: &ExternalJobId) -> Result<()> {
        self.runner.run_command("qdel", &[&id.0], None)?;
        Ok(())
    }
}
