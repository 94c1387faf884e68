use autogen_core::config::Config;
use autogen_core::environment::Environment;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A scratch area with a config directory, a work directory for plans and
/// job directories, and a bin directory for fake executables.
pub struct TestContext {
    pub _temp_dir: tempfile::TempDir,
    pub test_root: PathBuf,
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub work_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("autogen-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let test_root = temp_dir.path().to_path_buf();

        let config_dir = test_root.join("config");
        let cache_dir = test_root.join("cache");
        let work_dir = test_root.join("work");
        let bin_dir = test_root.join("bin");
        for dir in [&config_dir, &cache_dir, &work_dir, &bin_dir] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }
        fs::create_dir_all(config_dir.join("autogen")).expect("Failed to create autogen config subdir");

        Self {
            _temp_dir: temp_dir,
            test_root,
            config_dir,
            cache_dir,
            work_dir,
            bin_dir,
        }
    }

    /// Path the CLI finds through `XDG_CONFIG_HOME`.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("autogen").join("config.toml")
    }

    pub fn write_config(&self, content: &str) -> PathBuf {
        let path = self.config_path();
        fs::write(&path, content).expect("Failed to write temp config");
        path
    }

    pub fn plan_path(&self) -> PathBuf {
        self.work_dir.join("plan.toml")
    }

    pub fn write_plan(&self, content: &str) -> PathBuf {
        let path = self.plan_path();
        fs::write(&path, content).expect("Failed to write plan");
        path
    }

    /// Writes an executable bash script standing in for a simulation code.
    pub fn write_fake_program(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin_dir.join(name);
        fs::write(&path, format!("#!/bin/bash\n{}\n", body)).expect("Failed to write fake program");
        let mut perms = fs::metadata(&path)
            .expect("Failed to stat fake program")
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("Failed to make fake program executable");
        path
    }

    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.work_dir.join(id)
    }

    pub fn read(&self, path: &Path) -> String {
        fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
    }

    pub fn environment(&self) -> Arc<Environment> {
        Arc::new(Environment::new(Config::default()).expect("Default config is valid"))
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
