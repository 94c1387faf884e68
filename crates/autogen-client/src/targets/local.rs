use super::QueueBackend;
use crate::error::{ClientError, Result};
use crate::script::BatchScript;
use autogen_core::model::{ExternalJobId, QueueStatus, SchedulerType};
use std::path::Path;
use std::process::{Command, Stdio};

const ID_PREFIX: &str = "local-";

/// Runs each script to completion before `submit` returns.
#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl QueueBackend for LocalBackend {
    fn scheduler(&self) -> SchedulerType {
        SchedulerType::Local
    }

    fn submit(&self, script: &BatchScript, dir: &Path) -> Result<ExternalJobId> {
        let path = script.write(dir, SchedulerType::Local)?;
        let (stdout, _) = fs_err::File::create(dir.join(&script.output))?.into_parts();
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new("bash");
        cmd.arg(&path)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        autogen_core::logging::log_and_print_command(&cmd);

        let status = cmd.status().map_err(|source| ClientError::Spawn {
            command: format!("bash {}", path.display()),
            source,
        })?;

        if !status.success() {
            tracing::warn!(
                "Local script '{}' exited with {}; its output is left for analysis.",
                path.display(),
                status
            );
        }

        Ok(ExternalJobId(format!("{}{}", ID_PREFIX, uuid::Uuid::new_v4())))
    }

    fn status(&self, id: &ExternalJobId) -> Result<QueueStatus> {
        if id.0.starts_with(ID_PREFIX) {
            Ok(QueueStatus::Finished)
        } else {
            Ok(QueueStatus::Unknown)
        }
    }

    fn cancel(&self, id: &ExternalJobId) -> Result<()> {
        tracing::debug!("Local job '{}' already ran to completion.", id);
        Ok(())
    }
}
