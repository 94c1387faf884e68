use crate::resources::ResourceDirectives;
use crate::script::BatchScript;
use crate::targets::{common::shell_quote, QueueBackend};
use autogen_core::config::BundleConfig;
use autogen_core::constants::bundling::BIN_EPSILON;
use autogen_core::model::ExternalJobId;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A staged task whose script is written and waiting for a shared allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    pub key: String,
    pub dir: PathBuf,
    pub script: PathBuf,
    pub nodes: u32,
}

pub trait Bundleable {
    /// `Some` only while the task is staged, its script is written and it
    /// has not been submitted.
    fn bundle_entry(&self) -> Option<BundleEntry>;
}

/// Bin index for each size, in order: `floor((cumsum - 0.1) / capacity)`
/// with unused indices squeezed out. Sizes are never split.
pub fn assign_bins(sizes: &[u32], capacity: u32) -> Vec<usize> {
    let capacity = f64::from(capacity.max(1));
    let mut cumsum = 0.0;
    let mut assignment = Vec::with_capacity(sizes.len());
    let mut last_raw: Option<u64> = None;
    let mut next = 0usize;

    for size in sizes {
        cumsum += f64::from(*size);
        let raw = ((cumsum - BIN_EPSILON) / capacity).floor().max(0.0) as u64;
        match last_raw {
            Some(prev) if prev == raw => {}
            Some(_) => next += 1,
            None => {}
        }
        last_raw = Some(raw);
        assignment.push(next);
    }
    assignment
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundleSettings {
    pub jobname: String,
    pub capacity: u32,
    pub directives: ResourceDirectives,
}

impl BundleSettings {
    pub fn from_config(config: &BundleConfig) -> Self {
        Self {
            jobname: config.jobname.clone(),
            capacity: config.capacity,
            directives: ResourceDirectives {
                queue: config.queue.clone(),
                walltime: config.walltime.clone(),
                nodes: None,
                ppn: config.ppn,
                account: config.account.clone(),
                prefix: Vec::new(),
                postfix: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundleSubmission {
    pub name: String,
    pub members: Vec<String>,
    pub nodes: u32,
    pub outcome: Result<ExternalJobId, String>,
}

/// Packs script-ready tasks into shared submissions. Lives for one round.
pub struct Bundler {
    backend: Arc<dyn QueueBackend>,
    settings: BundleSettings,
    dir: PathBuf,
    entries: Vec<BundleEntry>,
}

impl Bundler {
    pub fn new(backend: Arc<dyn QueueBackend>, settings: BundleSettings, dir: &Path) -> Self {
        Self {
            backend,
            settings,
            dir: dir.to_path_buf(),
            entries: Vec::new(),
        }
    }

    /// Accepts the task if it is ready to be bundled.
    pub fn add(&mut self, task: &dyn Bundleable) -> bool {
        let Some(entry) = task.bundle_entry() else {
            return false;
        };
        if self.entries.iter().any(|e| e.key == entry.key) {
            return false;
        }
        tracing::debug!("Bundling '{}' ({} node(s))", entry.key, entry.nodes);
        self.entries.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bins(&self) -> Vec<Vec<&BundleEntry>> {
        let sizes: Vec<u32> = self.entries.iter().map(|e| e.nodes).collect();
        let assignment = assign_bins(&sizes, self.settings.capacity);
        let mut bins: Vec<Vec<&BundleEntry>> = Vec::new();
        for (entry, bin) in self.entries.iter().zip(assignment) {
            if bins.len() <= bin {
                bins.resize_with(bin + 1, Vec::new);
            }
            bins[bin].push(entry);
        }
        bins
    }

    fn bundle_script(&self, index: usize, members: &[&BundleEntry]) -> BatchScript {
        let mut lines = Vec::new();
        for member in members {
            lines.push(format!("cd {}", shell_quote(&member.dir.to_string_lossy())));
            lines.push(format!(
                "bash {} &",
                shell_quote(&member.script.to_string_lossy())
            ));
        }
        lines.push("wait".to_string());

        let mut directives = self.settings.directives.clone();
        directives.nodes = Some(
            members
                .iter()
                .fold(0u32, |total, m| total.saturating_add(m.nodes)),
        );
        let name = format!("{}_{}", self.settings.jobname, index);
        BatchScript::new(&name, directives, lines)
    }

    /// Submits every bin and reports, per bin, which members now share which
    /// id. A failed bin marks nothing; its members stay script-ready and
    /// will be offered again.
    pub fn submit_all(&mut self) -> Vec<BundleSubmission> {
        let mut results = Vec::new();
        for (index, members) in self.bins().iter().enumerate() {
            let script = self.bundle_script(index, members);
            let nodes = script.directives.nodes();
            let keys: Vec<String> = members.iter().map(|m| m.key.clone()).collect();
            let outcome = match self.backend.submit(&script, &self.dir) {
                Ok(id) => {
                    tracing::info!(
                        "Bundle '{}' with {} task(s) on {} node(s) submitted as {}",
                        script.name,
                        keys.len(),
                        nodes,
                        id
                    );
                    Ok(id)
                }
                Err(e) => {
                    tracing::warn!(
                        "Bundle '{}' was not accepted, its tasks will be offered again: {}",
                        script.name,
                        e
                    );
                    Err(e.to_string())
                }
            };
            results.push(BundleSubmission {
                name: script.name,
                members: keys,
                nodes,
                outcome,
            });
        }
        self.entries.clear();
        results
    }
}
