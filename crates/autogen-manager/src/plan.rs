use crate::command::{CommandProgram, CommandSpec};
use crate::dependency::DependencyHandle;
use crate::ensemble::{DriftPolicy, JobEnsemble};
use crate::error::{ManagerError, Result};
use crate::job::Job;
use crate::manager::{TaskConfig, TaskManager, TaskPlan};
use crate::recovery::{RecoveryPolicy, RecoveryStep, DEFAULT_MAX_RESTARTS};
use autogen_client::resources::ResourceHints;
use autogen_client::script::sanitize_name;
use autogen_client::targets::QueueBackend;
use autogen_core::environment::Environment;
use autogen_core::model::FieldClass;
use autogen_core::reconcile::{Fields, ReconcileMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanFile {
    pub drift_policy: DriftPolicy,
    pub reconcile: ReconcileMode,
    pub jobs: Vec<JobPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPlan {
    pub id: String,
    /// Directory relative to the plan; defaults to the id.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(flatten)]
    pub program: CommandSpec,
    /// Fields that affect results; refused once recorded.
    #[serde(default)]
    pub config: Fields,
    /// Fields that may change at any time.
    #[serde(default)]
    pub operational: Fields,
    /// Fields whose recorded value wins once present.
    #[serde(default)]
    pub sticky: Fields,
    #[serde(default)]
    pub resources: ResourceHints,
    #[serde(default)]
    pub max_restarts: Option<u32>,
    #[serde(default)]
    pub recovery: Vec<RecoveryStep>,
    #[serde(default)]
    pub inputs: BTreeMap<String, DependencyHandle>,
    #[serde(default)]
    pub bundle: bool,
}

impl TaskSpec {
    pub fn task_plan(&self) -> TaskPlan {
        TaskPlan {
            config: TaskConfig::new(self.config.clone())
                .with_class(self.operational.clone(), FieldClass::Safe)
                .with_class(self.sticky.clone(), FieldClass::TakeIfNewer),
            resources: self.resources.clone(),
            recovery: RecoveryPolicy {
                max_restarts: self.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
                steps: self.recovery.clone(),
            },
            inputs: self.inputs.clone(),
            bundle: self.bundle,
        }
    }
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let plan: PlanFile = toml::from_str(content).map_err(|source| ManagerError::Plan {
            path: path.to_path_buf(),
            source,
        })?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                return Err(ManagerError::InvalidPlan("a job needs an id".to_string()));
            }
            if !ids.insert(job.id.as_str()) {
                return Err(ManagerError::InvalidPlan(format!(
                    "job id '{}' is used twice",
                    job.id
                )));
            }
            if !dirs.insert(job.dir_name()) {
                return Err(ManagerError::InvalidPlan(format!(
                    "job '{}' shares its directory with another job",
                    job.id
                )));
            }
        }
        Ok(())
    }

    /// Builds the ensemble rooted at `root`, one directory per job.
    pub fn build(
        &self,
        root: &Path,
        env: Arc<Environment>,
        backend: Arc<dyn QueueBackend>,
    ) -> Result<JobEnsemble> {
        let mut ensemble = JobEnsemble::new(root, self.drift_policy);
        for job_plan in &self.jobs {
            let dir = root.join(job_plan.dir_name());
            let mut job = Job::new(&job_plan.id, &dir);
            for spec in &job_plan.tasks {
                let program = CommandProgram::new(spec.program.clone())?;
                let manager = TaskManager::new(
                    &spec.name,
                    &dir,
                    spec.task_plan(),
                    Box::new(program.clone()),
                    Box::new(program),
                    env.clone(),
                    backend.clone(),
                )
                .with_mode(self.reconcile);
                job.add_stage(manager)?;
            }
            ensemble.add_job(job);
        }
        Ok(ensemble)
    }
}

impl JobPlan {
    pub fn dir_name(&self) -> String {
        self.dir.clone().unwrap_or_else(|| sanitize_name(&self.id))
    }
}
