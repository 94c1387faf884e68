pub mod files {
    pub const RECORD_SUFFIX: &str = "record.json";
    pub const JOB_RECORD_SUFFIX: &str = "job.json";
    pub const REPORT: &str = "report.json";
    pub const CONFIG: &str = "config.toml";
}

pub mod scripts {
    pub const LOCAL_EXT: &str = "sh";
    pub const SLURM_EXT: &str = "sbatch";
    pub const PBS_EXT: &str = "pbs";
    pub const STDOUT_EXT: &str = "stdout";
}

pub mod bundling {
    /// Subtracted from the running total before binning so a task that
    /// exactly fills a bin stays in it.
    pub const BIN_EPSILON: f64 = 0.1;
    pub const DEFAULT_CAPACITY: u32 = 16;
    pub const DEFAULT_JOBNAME: &str = "autogen-bundle";
}

pub mod env_vars {
    pub const LOG_LEVEL: &str = "AUTOGEN_LOG_LEVEL";
    pub const TEST_LOG_TEE: &str = "AUTOGEN_TEST_LOG_TEE";
    pub const CONFIG: &str = "AUTOGEN_CONFIG";
}

pub mod dirs {
    pub const AUTOGEN: &str = "autogen";
    pub const LOGS: &str = "logs";
}
