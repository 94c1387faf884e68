use super::common::slurm_state;
use super::{CommandRunner, QueueBackend};
use crate::error::{ClientError, Result};
use crate::script::BatchScript;
use autogen_core::model::{ExternalJobId, QueueStatus, SchedulerType};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub struct SlurmBackend {
    runner: Arc<dyn CommandRunner>,
    user: String,
}

impl SlurmBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, user: &str) -> Self {
        Self {
            runner,
            user: user.to_string(),
        }
    }
}

/// `sbatch --parsable` prints `<id>` or `<id>;<cluster>`.
pub fn parse_sbatch_id(output: &str) -> Result<ExternalJobId> {
    let id = output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .and_then(|l| l.split(';').next())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '_'))
        .ok_or_else(|| ClientError::JobIdParse {
            backend: SchedulerType::Slurm.to_string(),
            output: output.trim().to_string(),
        })?;
    Ok(ExternalJobId(id.to_string()))
}

fn is_unknown_job(err: &ClientError) -> bool {
    matches!(err, ClientError::CommandFailed { stderr, .. } if stderr.contains("Invalid job id"))
}

impl QueueBackend for SlurmBackend {
    fn scheduler(&self) -> SchedulerType {
        SchedulerType::Slurm
    }

    fn submit(&self, script: &BatchScript, dir: &Path) -> Result<ExternalJobId> {
        script.write(dir, SchedulerType::Slurm)?;
        let file = script.file_name(SchedulerType::Slurm);
        let output = self
            .runner
            .run_command("sbatch", &["--parsable", &file], Some(dir))?;
        let id = parse_sbatch_id(&output)?;
        tracing::info!("Submitted '{}' to SLURM as job {}", file, id);
        Ok(id)
    }

    fn status(&self, id: &ExternalJobId) -> Result<QueueStatus> {
        match self
            .runner
            .run_command("squeue", &["-h", "-j", &id.0, "-o", "%T"], None)
        {
            Ok(output) => Ok(output
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(slurm_state)
                .unwrap_or(QueueStatus::Finished)),
            Err(e) if is_unknown_job(&e) => Ok(QueueStatus::Finished),
            Err(e) => Err(e),
        }
    }

    fn statuses(&self, ids: &[ExternalJobId]) -> Result<BTreeMap<ExternalJobId, QueueStatus>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let output =
            self.runner
                .run_command("squeue", &["-h", "-u", &self.user, "-o", "%i %T"], None)?;
        let listed: BTreeMap<&str, QueueStatus> = output
            .lines()
            .filter_map(|line| line.trim().split_once(' '))
            .map(|(id, state)| (id, slurm_state(state.trim())))
            .collect();
        Ok(ids
            .iter()
            .map(|id| {
                let status = listed
                    .get(id.0.as_str())
                    .copied()
                    .unwrap_or(QueueStatus::Finished);
                (id.clone(), status)
            })
            .collect())
    }

    fn cancel(&self, id: &ExternalJobId) -> Result<()> {
        self.runner.run_command("scancel", &[&id.0], None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceDirectives;
    use std::sync::Mutex;

    struct CannedRunner {
        replies: BTreeMap<&'static str, std::result::Result<&'static str, &'static str>>,
        calls: Mutex<Vec<String>>,
    }

    impl CommandRunner for CannedRunner {
        fn run_command(&self, command: &str, args: &[&str], _cwd: Option<&Path>) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", command, args.join(" ")));
            match self.replies.get(command) {
                Some(Ok(out)) => Ok(out.to_string()),
                Some(Err(stderr)) => Err(ClientError::CommandFailed {
                    backend: "slurm".into(),
                    command: command.into(),
                    stderr: stderr.to_string(),
                }),
                None => panic!("unexpected command {}", command),
            }
        }
    }

    fn backend(
        replies: BTreeMap<&'static str, std::result::Result<&'static str, &'static str>>,
    ) -> (SlurmBackend, Arc<CannedRunner>) {
        let runner = Arc::new(CannedRunner {
            replies,
            calls: Mutex::new(Vec::new()),
        });
        (SlurmBackend::new(runner.clone(), "alice"), runner)
    }

    #[test]
    fn test_parse_sbatch_id() {
        assert_eq!(parse_sbatch_id("4412\n").unwrap().0, "4412");
        assert_eq!(parse_sbatch_id("4412;cluster\n").unwrap().0, "4412");
        assert!(parse_sbatch_id("sbatch: error: invalid partition").is_err());
        assert!(parse_sbatch_id("").is_err());
    }

    #[test]
    fn test_submit_writes_script_and_parses_id() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, runner) = backend(BTreeMap::from([("sbatch", Ok("981\n"))]));
        let script = BatchScript::new("scf", ResourceDirectives::default(), vec!["run".into()]);

        let id = backend.submit(&script, dir.path()).unwrap();

        assert_eq!(id.0, "981");
        assert!(dir.path().join("scf.sbatch").exists());
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["sbatch --parsable scf.sbatch"]
        );
    }

    #[test]
    fn test_status_of_vanished_job_is_finished() {
        let (backend, _) = backend(BTreeMap::from([(
            "squeue",
            Err("slurm_load_jobs error: Invalid job id specified"),
        )]));
        assert_eq!(
            backend.status(&ExternalJobId::from("77")).unwrap(),
            QueueStatus::Finished
        );
    }

    #[test]
    fn test_status_propagates_other_failures() {
        let (backend, _) = backend(BTreeMap::from([(
            "squeue",
            Err("Unable to contact slurm controller"),
        )]));
        assert!(backend.status(&ExternalJobId::from("77")).is_err());
    }

    #[test]
    fn test_batched_statuses_use_one_query() {
        let (backend, runner) = backend(BTreeMap::from([(
            "squeue",
            Ok("101 RUNNING\n102 PENDING\n"),
        )]));
        let ids: Vec<ExternalJobId> = ["101", "102", "103"]
            .into_iter()
            .map(ExternalJobId::from)
            .collect();

        let statuses = backend.statuses(&ids).unwrap();

        assert_eq!(statuses[&ids[0]], QueueStatus::Running);
        assert_eq!(statuses[&ids[1]], QueueStatus::Queued);
        assert_eq!(statuses[&ids[2]], QueueStatus::Finished);
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }
}
