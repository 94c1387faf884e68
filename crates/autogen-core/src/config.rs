use crate::constants::{bundling, dirs, env_vars, files};
use crate::errors::ConfigError;
use crate::model::SchedulerType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_files: usize,
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceDefaults {
    pub queue: Option<String>,
    pub walltime: Option<String>,
    pub nodes: Option<u32>,
    pub ppn: Option<u32>,
    pub account: Option<String>,
    #[serde(default)]
    pub prefix: Vec<String>,
    #[serde(default)]
    pub postfix: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRule {
    pub task_glob: Option<String>,
    pub scheduler: Option<SchedulerType>,
    pub queue: Option<String>,
    pub walltime: Option<String>,
    pub nodes: Option<u32>,
    pub ppn: Option<u32>,
    pub account: Option<String>,
    #[serde(default)]
    pub prefix: Vec<String>,
    #[serde(default)]
    pub postfix: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    #[serde(default)]
    pub defaults: ResourceDefaults,
    #[serde(default)]
    pub rules: Vec<ResourceRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BundleConfig {
    /// Nodes available to one bundled submission.
    pub capacity: u32,
    pub jobname: String,
    pub queue: Option<String>,
    pub walltime: Option<String>,
    pub ppn: Option<u32>,
    pub account: Option<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            capacity: bundling::DEFAULT_CAPACITY,
            jobname: bundling::DEFAULT_JOBNAME.to_string(),
            queue: None,
            walltime: None,
            ppn: None,
            account: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerType,
    /// Parallel launcher prepended to task lines, `{np}` is replaced by nodes * ppn.
    pub mpirun: Option<String>,
    pub executables: BTreeMap<String, String>,
    pub resources: Resources,
    pub bundle: BundleConfig,
    pub logging: LoggingConfig,
}

pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(env_vars::CONFIG) {
        return Some(PathBuf::from(path));
    }
    xdg::BaseDirectories::with_prefix(dirs::AUTOGEN)
        .get_config_home()
        .map(|home| home.join(files::CONFIG))
}

pub fn load_config() -> Result<Config, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_from(&path),
        Some(path) => {
            tracing::debug!(
                "No configuration at '{}', using defaults.",
                path.display()
            );
            Ok(Config::default())
        }
        None => Ok(Config::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
    }
    let content = fs_err::read_to_string(path).map_err(ConfigError::Io)?;
    let config: Config = toml::from_str(&content)?;
    tracing::debug!("Loaded configuration from '{}'", path.display());
    Ok(config)
}
