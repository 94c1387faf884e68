use crate::error::{ClientError, Result};
use crate::resources::ResourceDirectives;
use autogen_core::{constants::scripts, model::SchedulerType};
use std::path::{Path, PathBuf};

/// A submission script: resource header, setup, ordered commands, cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchScript {
    pub name: String,
    pub directives: ResourceDirectives,
    pub lines: Vec<String>,
    /// File (relative to the submission directory) receiving stdout and stderr.
    pub output: String,
}

pub fn script_extension(scheduler: SchedulerType) -> &'static str {
    match scheduler {
        SchedulerType::Local => scripts::LOCAL_EXT,
        SchedulerType::Slurm => scripts::SLURM_EXT,
        SchedulerType::Pbs => scripts::PBS_EXT,
    }
}

/// Task and bundle names may contain path separators; scheduler job names
/// and file names may not.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl BatchScript {
    pub fn new(name: &str, directives: ResourceDirectives, lines: Vec<String>) -> Self {
        let name = sanitize_name(name);
        let output = format!("{}.{}", name, scripts::STDOUT_EXT);
        Self {
            name,
            directives,
            lines,
            output,
        }
    }

    pub fn file_name(&self, scheduler: SchedulerType) -> String {
        format!("{}.{}", self.name, script_extension(scheduler))
    }

    fn header(&self, scheduler: SchedulerType) -> Vec<String> {
        let d = &self.directives;
        let mut header = Vec::new();
        match scheduler {
            SchedulerType::Local => {}
            SchedulerType::Slurm => {
                header.push(format!("#SBATCH --job-name={}", self.name));
                header.push(format!("#SBATCH --output={}", self.output));
                if let Some(q) = &d.queue {
                    header.push(format!("#SBATCH --partition={}", q));
                }
                header.push(format!("#SBATCH --nodes={}", d.nodes()));
                header.push(format!("#SBATCH --ntasks-per-node={}", d.ppn()));
                if let Some(t) = &d.walltime {
                    header.push(format!("#SBATCH --time={}", t));
                }
                if let Some(a) = &d.account {
                    header.push(format!("#SBATCH --account={}", a));
                }
            }
            SchedulerType::Pbs => {
                if let Some(q) = &d.queue {
                    header.push(format!("#PBS -q {}", q));
                }
                header.push(format!("#PBS -l nodes={}:ppn={}", d.nodes(), d.ppn()));
                if let Some(t) = &d.walltime {
                    header.push(format!("#PBS -l walltime={}", t));
                }
                header.push("#PBS -j oe".to_string());
                header.push(format!("#PBS -N {}", self.name));
                header.push(format!("#PBS -o {}", self.output));
                if let Some(a) = &d.account {
                    header.push(format!("#PBS -A {}", a));
                }
            }
        }
        header
    }

    pub fn render(&self, scheduler: SchedulerType) -> String {
        let mut out = vec!["#!/bin/bash".to_string()];
        out.extend(self.header(scheduler));
        if scheduler == SchedulerType::Pbs {
            out.push("cd ${PBS_O_WORKDIR}".to_string());
        }
        out.extend(self.directives.prefix.iter().cloned());
        out.extend(self.lines.iter().cloned());
        out.extend(self.directives.postfix.iter().cloned());
        let mut rendered = out.join("\n");
        rendered.push('\n');
        rendered
    }

    /// Writes the rendered script into `dir` and returns its path.
    pub fn write(&self, dir: &Path, scheduler: SchedulerType) -> Result<PathBuf> {
        if !dir.is_dir() {
            return Err(ClientError::InvalidPath {
                path: dir.to_path_buf(),
                reason: "submission directory does not exist".to_string(),
            });
        }
        let path = dir.join(self.file_name(scheduler));
        fs_err::write(&path, self.render(scheduler))?;
        Ok(path)
    }
}
