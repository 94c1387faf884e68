use crate::error::Result;
use crate::script::BatchScript;
use autogen_core::environment::Environment;
use autogen_core::model::{ExternalJobId, QueueStatus, SchedulerType};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub mod common;
pub mod local;
pub mod pbs;
pub mod slurm;

pub use common::SystemCommandRunner;
pub use local::LocalBackend;
pub use pbs::PbsBackend;
pub use slurm::SlurmBackend;

/// Runs an external program and returns its stdout.
pub trait CommandRunner: Send + Sync {
    fn run_command(&self, command: &str, args: &[&str], cwd: Option<&Path>) -> Result<String>;
}

/// The four operations every batch system offers.
pub trait QueueBackend: Send + Sync {
    fn scheduler(&self) -> SchedulerType;

    /// Writes `script` into `dir` and submits it from there.
    fn submit(&self, script: &BatchScript, dir: &Path) -> Result<ExternalJobId>;

    fn status(&self, id: &ExternalJobId) -> Result<QueueStatus>;

    /// Status of several jobs. Backends override this with a single query.
    fn statuses(&self, ids: &[ExternalJobId]) -> Result<BTreeMap<ExternalJobId, QueueStatus>> {
        ids.iter()
            .map(|id| self.status(id).map(|s| (id.clone(), s)))
            .collect()
    }

    fn cancel(&self, id: &ExternalJobId) -> Result<()>;
}

pub fn backend_for(env: &Arc<Environment>) -> Arc<dyn QueueBackend> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(env.clone()));
    match env.scheduler() {
        SchedulerType::Local => Arc::new(LocalBackend::new()),
        SchedulerType::Slurm => Arc::new(SlurmBackend::new(runner, env.user())),
        SchedulerType::Pbs => Arc::new(PbsBackend::new(runner)),
    }
}
