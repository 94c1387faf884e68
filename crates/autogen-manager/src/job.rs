use crate::dependency::{ArtifactSource, DependencyHandle, Export};
use crate::error::{ManagerError, Result};
use crate::manager::{Reconciled, TaskManager};
use crate::record::write_json_atomic;
use autogen_client::script::sanitize_name;
use autogen_core::constants::files;
use autogen_core::errors::DriftError;
use autogen_core::model::TaskStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Stages that precede the one being staged, searched by name.
struct EarlierStages<'a>(&'a [TaskManager]);

impl ArtifactSource for EarlierStages<'_> {
    fn export(&self, handle: &DependencyHandle) -> Result<Export> {
        let Some(index) = self.0.iter().position(|s| s.name() == handle.upstream) else {
            return Err(ManagerError::InvalidPlan(format!(
                "no earlier stage named '{}'",
                handle.upstream
            )));
        };
        let (before, rest) = self.0.split_at(index);
        rest[0].export(&EarlierStages(before), &handle.artifact)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub stages: Vec<String>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub external_job_ids: Vec<String>,
    pub artifact_refs: BTreeMap<String, String>,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Advanced { stage: String, status: TaskStatus },
    Complete,
    Drift(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: String,
    pub dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    pub stages: Vec<StageReport>,
}

/// An ordered pipeline of tasks sharing one directory.
pub struct Job {
    id: String,
    dir: PathBuf,
    stages: Vec<TaskManager>,
}

impl Job {
    pub fn new(id: &str, dir: &Path) -> Self {
        Self {
            id: id.to_string(),
            dir: dir.to_path_buf(),
            stages: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stages(&self) -> &[TaskManager] {
        &self.stages
    }

    pub fn logname(&self) -> String {
        format!("{}@{}", self.id, self.dir.display())
    }

    /// Appends a stage. Inputs may only refer to stages added before it.
    pub fn add_stage(&mut self, stage: TaskManager) -> Result<()> {
        if self.stages.iter().any(|s| s.name() == stage.name()) {
            return Err(ManagerError::InvalidPlan(format!(
                "job '{}' has two stages named '{}'",
                self.id,
                stage.name()
            )));
        }
        for (input, handle) in &stage.plan().inputs {
            if !self.stages.iter().any(|s| s.name() == handle.upstream) {
                return Err(ManagerError::UnknownUpstream {
                    job: self.id.clone(),
                    task: stage.name().to_string(),
                    input: input.clone(),
                    upstream: handle.upstream.clone(),
                });
            }
        }
        self.stages.push(stage);
        Ok(())
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            sanitize_name(&self.id),
            files::JOB_RECORD_SUFFIX
        ))
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for stage in &self.stages {
            hasher.update(stage.name().as_bytes());
            hasher.update(serde_json::to_vec(stage.plan())?);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn load_record(&self) -> Result<Option<JobRecord>> {
        let path = self.record_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs_err::read_to_string(&path)?;
        let record =
            serde_json::from_str(&content).map_err(|source| ManagerError::Record { path, source })?;
        Ok(Some(record))
    }

    /// Checks the job and every stage record against the plan. A discarded
    /// stage takes every later stage with it, since their inputs came from it.
    fn check_consistency(&self, reset: bool) -> Result<()> {
        if let Some(record) = self.load_record()? {
            let planned = self.stage_names();
            if record.stages != planned {
                let drift = DriftError::Stages {
                    owner: self.logname(),
                    recorded: record.stages,
                    planned,
                };
                if !reset {
                    return Err(drift.into());
                }
                tracing::warn!("{}, rebuilding the job record.", drift);
            } else if record.fingerprint != self.fingerprint()? {
                tracing::info!("Plan edited since the last tick");
            }
        }

        let mut cascade = false;
        for stage in &self.stages {
            if cascade {
                stage.discard()?;
                continue;
            }
            if stage.verify(reset)? == Reconciled::Reset {
                cascade = true;
            }
        }
        Ok(())
    }

    /// Advances the first stage that is not done. Later stages wait.
    pub fn nextstep(&self, reset: bool) -> Result<JobOutcome> {
        let span = tracing::info_span!("job", job = %self.id, dir = %self.dir.display());
        let _guard = span.enter();

        fs_err::create_dir_all(&self.dir)?;
        self.check_consistency(reset)?;

        let mut outcome = JobOutcome::Complete;
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.status()?.is_ok() {
                continue;
            }
            let status = stage.nextstep(&EarlierStages(&self.stages[..index]), false)?;
            outcome = JobOutcome::Advanced {
                stage: stage.name().to_string(),
                status,
            };
            break;
        }
        if outcome == JobOutcome::Complete {
            tracing::debug!("All {} stage(s) done", self.stages.len());
        }

        write_json_atomic(
            &self.record_path(),
            &JobRecord {
                id: self.id.clone(),
                stages: self.stage_names(),
                fingerprint: self.fingerprint()?,
            },
        )?;
        Ok(outcome)
    }

    pub fn report(&self, outcome: Option<JobOutcome>) -> Result<JobReport> {
        let mut stages = Vec::new();
        for stage in &self.stages {
            let record = stage.load_record()?;
            stages.push(match record {
                Some(record) => StageReport {
                    name: stage.name().to_string(),
                    status: record.status,
                    retry_count: record.retry_count,
                    external_job_ids: record.external_job_ids(),
                    artifact_refs: record.artifact_refs.clone(),
                    output: record.reader.output.clone(),
                    note: record.diagnosis.note.clone(),
                },
                None => StageReport {
                    name: stage.name().to_string(),
                    status: TaskStatus::Unstaged,
                    retry_count: 0,
                    external_job_ids: Vec::new(),
                    artifact_refs: BTreeMap::new(),
                    output: Value::Null,
                    note: None,
                },
            });
        }
        Ok(JobReport {
            id: self.id.clone(),
            dir: self.dir.clone(),
            outcome,
            stages,
        })
    }
}
