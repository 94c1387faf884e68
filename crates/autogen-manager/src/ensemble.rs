use crate::error::Result;
use crate::job::{Job, JobOutcome, JobReport};
use crate::record::write_json_atomic;
use autogen_client::bundler::Bundler;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What a tick does with a job whose record no longer matches the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftPolicy {
    /// The error ends the whole tick; later jobs are not advanced.
    #[default]
    AbortEnsemble,
    /// The drifted job is reported and left alone; other jobs advance.
    SkipJob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleReport {
    pub generated_at: String,
    pub root: PathBuf,
    pub jobs: Vec<JobReport>,
}

pub struct JobEnsemble {
    root: PathBuf,
    jobs: Vec<Job>,
    policy: DriftPolicy,
    executed_plan: Vec<JobReport>,
}

impl JobEnsemble {
    pub fn new(root: &Path, policy: DriftPolicy) -> Self {
        Self {
            root: root.to_path_buf(),
            jobs: Vec::new(),
            policy,
            executed_plan: Vec::new(),
        }
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> DriftPolicy {
        self.policy
    }

    /// Per-job outcome of the last tick.
    pub fn executed_plan(&self) -> &[JobReport] {
        &self.executed_plan
    }

    /// One tick: every job advances its first unfinished stage.
    ///
    /// Drift either aborts the tick or skips the job, per the policy. Any
    /// other error is recorded against its job and the tick moves on.
    pub fn nextstep(&mut self, reset: bool) -> Result<()> {
        fs_err::create_dir_all(&self.root)?;
        self.executed_plan.clear();

        for job in &self.jobs {
            let outcome = match job.nextstep(reset) {
                Ok(outcome) => outcome,
                Err(e) if e.is_drift() => match self.policy {
                    DriftPolicy::AbortEnsemble => {
                        self.executed_plan
                            .push(Self::report_for(job, JobOutcome::Drift(e.to_string())));
                        return Err(e);
                    }
                    DriftPolicy::SkipJob => {
                        tracing::error!("Skipping job {}: {}", job.logname(), e);
                        JobOutcome::Drift(e.to_string())
                    }
                },
                Err(e) => {
                    tracing::error!("Job {} did not advance: {}", job.logname(), e);
                    JobOutcome::Error(e.to_string())
                }
            };
            self.executed_plan.push(Self::report_for(job, outcome));
        }
        Ok(())
    }

    fn report_for(job: &Job, outcome: JobOutcome) -> JobReport {
        match job.report(Some(outcome.clone())) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Could not summarise job {}: {}", job.logname(), e);
                JobReport {
                    id: job.id().to_string(),
                    dir: job.dir().to_path_buf(),
                    outcome: Some(outcome),
                    stages: Vec::new(),
                }
            }
        }
    }

    pub fn has_drift(&self) -> bool {
        self.executed_plan
            .iter()
            .any(|r| matches!(r.outcome, Some(JobOutcome::Drift(_))))
    }

    pub fn has_errors(&self) -> bool {
        self.executed_plan
            .iter()
            .any(|r| matches!(r.outcome, Some(JobOutcome::Error(_))))
    }

    /// Offers every task with a bundle-ready script to `bundler`, submits,
    /// and attaches the shared ids. Returns how many tasks were submitted.
    pub fn submit_bundles(&self, bundler: &mut Bundler) -> Result<usize> {
        let mut tasks = BTreeMap::new();
        for job in &self.jobs {
            for stage in job.stages() {
                if bundler.add(stage) {
                    tasks.insert(stage.logname(), stage);
                }
            }
        }
        if tasks.is_empty() {
            return Ok(0);
        }

        let mut submitted = 0;
        for bundle in bundler.submit_all() {
            let Ok(id) = &bundle.outcome else {
                continue;
            };
            for member in &bundle.members {
                let Some(task) = tasks.get(member) else {
                    continue;
                };
                // The queue already holds this bundle; the other members
                // must still learn its id.
                match task.record_submission(id) {
                    Ok(()) => submitted += 1,
                    Err(e) => tracing::error!(
                        "{} was submitted in bundle {} as {} but could not record it: {}",
                        member,
                        bundle.name,
                        id,
                        e
                    ),
                }
            }
        }
        Ok(submitted)
    }

    /// Current records of every job, with the outcome of the last tick where
    /// there was one.
    pub fn report(&self) -> Result<EnsembleReport> {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            let outcome = self
                .executed_plan
                .iter()
                .find(|r| r.id == job.id() && r.dir == job.dir())
                .and_then(|r| r.outcome.clone());
            jobs.push(match outcome {
                Some(outcome) => Self::report_for(job, outcome),
                None => job.report(None)?,
            });
        }
        Ok(EnsembleReport {
            generated_at: chrono::Local::now().to_rfc3339(),
            root: self.root.clone(),
            jobs,
        })
    }

    pub fn write_report(&self, path: &Path) -> Result<EnsembleReport> {
        let report = self.report()?;
        write_json_atomic(path, &report)?;
        Ok(report)
    }
}
