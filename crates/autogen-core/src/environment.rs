use crate::config::Config;
use crate::errors::ConfigError;
use crate::model::SchedulerType;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Process-wide settings every backend, runner and manager reads.
///
/// Built once at startup and shared by `Arc`; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct Environment {
    config: Config,
    executables: BTreeMap<String, PathBuf>,
    user: String,
}

impl Environment {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let mut executables = BTreeMap::new();
        for (name, raw) in &config.executables {
            let expanded =
                shellexpand::full(raw).map_err(|e| ConfigError::PathExpansion {
                    path: raw.clone(),
                    reason: e.to_string(),
                })?;
            executables.insert(name.clone(), PathBuf::from(expanded.as_ref()));
        }
        let user = whoami::username().unwrap_or_else(|_| "unknown".to_string());
        Ok(Self {
            config,
            executables,
            user,
        })
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerType) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> SchedulerType {
        self.config.scheduler
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn mpirun(&self) -> Option<&str> {
        self.config.mpirun.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Resolves a program name through the `[executables]` table, falling back
    /// to the bare name so `PATH` lookup applies.
    pub fn executable(&self, name: &str) -> PathBuf {
        self.executables
            .get(name)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_lookup_and_fallback() {
        let mut config = Config::default();
        config
            .executables
            .insert("crystal".into(), "/opt/crystal/bin/crystal".into());
        let env = Environment::new(config).unwrap();

        assert_eq!(
            env.executable("crystal"),
            PathBuf::from("/opt/crystal/bin/crystal")
        );
        assert_eq!(env.executable("qwalk"), PathBuf::from("qwalk"));
    }

    #[test]
    fn test_blank_mpirun_is_ignored() {
        let config = Config {
            mpirun: Some("  ".into()),
            ..Config::default()
        };
        let env = Environment::new(config).unwrap();
        assert!(env.mpirun().is_none());
    }

    #[test]
    fn test_scheduler_override() {
        let env = Environment::new(Config::default())
            .unwrap()
            .with_scheduler(SchedulerType::Slurm);
        assert_eq!(env.scheduler(), SchedulerType::Slurm);
    }
}
