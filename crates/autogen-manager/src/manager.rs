use crate::dependency::{ArtifactSource, DependencyHandle, Export};
use crate::error::{ManagerError, Result};
use crate::program::{Collected, Outcome, Reader, ReaderState, StageContext, Writer};
use crate::record::ExecutionRecord;
use crate::recovery::{DiagnosisState, RecoveryPolicy};
use autogen_client::bundler::{BundleEntry, Bundleable};
use autogen_client::resources::{resolve_for_task, ResourceDirectives, ResourceHints};
use autogen_client::runner::{Runner, SubmitOutcome};
use autogen_client::script::sanitize_name;
use autogen_client::targets::QueueBackend;
use autogen_core::constants::{files, scripts};
use autogen_core::engine::resolve_status;
use autogen_core::environment::Environment;
use autogen_core::model::{ExternalJobId, FieldClass, ResolvedStatus, TaskStatus};
use autogen_core::reconcile::{merge, ChangeSet, Configurable, Fields, ReconcileMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Planned configuration values plus how each may change once recorded.
/// Unlisted fields are immutable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub values: Fields,
    pub classes: BTreeMap<String, FieldClass>,
}

impl TaskConfig {
    pub fn new(values: Fields) -> Self {
        Self {
            values,
            classes: BTreeMap::new(),
        }
    }

    /// Adds `values` as fields of class `class`.
    pub fn with_class(mut self, values: Fields, class: FieldClass) -> Self {
        for (key, value) in values {
            self.classes.insert(key.clone(), class);
            self.values.insert(key, value);
        }
        self
    }
}

impl Configurable for TaskConfig {
    fn fields(&self) -> Fields {
        self.values.clone()
    }

    fn classify(&self, field: &str) -> FieldClass {
        self.classes.get(field).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub config: TaskConfig,
    pub resources: ResourceHints,
    pub recovery: RecoveryPolicy,
    pub inputs: BTreeMap<String, DependencyHandle>,
    /// Write a script for a shared allocation instead of submitting alone.
    pub bundle: bool,
}

/// What reconciliation did to a record before a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// No record on disk yet.
    Fresh,
    Unchanged,
    Updated(ChangeSet),
    /// The record drifted and was discarded on request.
    Reset,
}

/// Drives one external computation through stage, run, collect and
/// diagnose. All state lives in the record file; the manager itself only
/// holds the plan and its collaborators.
pub struct TaskManager {
    name: String,
    dir: PathBuf,
    plan: TaskPlan,
    writer: Box<dyn Writer>,
    reader: Box<dyn Reader>,
    env: Arc<Environment>,
    backend: Arc<dyn QueueBackend>,
    mode: ReconcileMode,
}

impl TaskManager {
    pub fn new(
        name: &str,
        dir: &Path,
        plan: TaskPlan,
        writer: Box<dyn Writer>,
        reader: Box<dyn Reader>,
        env: Arc<Environment>,
        backend: Arc<dyn QueueBackend>,
    ) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            plan,
            writer,
            reader,
            env,
            backend,
            mode: ReconcileMode::Strict,
        }
    }

    pub fn with_mode(mut self, mode: ReconcileMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn plan(&self) -> &TaskPlan {
        &self.plan
    }

    /// How this task appears in logs and drift errors.
    pub fn logname(&self) -> String {
        format!("{}@{}", self.name, self.dir.display())
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            sanitize_name(&self.name),
            files::RECORD_SUFFIX
        ))
    }

    pub fn load_record(&self) -> Result<Option<ExecutionRecord>> {
        ExecutionRecord::load(&self.record_path())
    }

    pub fn status(&self) -> Result<TaskStatus> {
        Ok(self
            .load_record()?
            .map(|r| r.status)
            .unwrap_or(TaskStatus::Unstaged))
    }

    fn fresh_record(&self) -> ExecutionRecord {
        let mut record = ExecutionRecord::new(
            &self.name,
            self.plan.config.fields(),
            self.plan.resources.fields(),
        );
        record.wiring = self.wiring();
        record
    }

    /// Where the inputs come from and which program runs. Results depend on
    /// both, so they reconcile as immutable fields.
    fn wiring(&self) -> Fields {
        let mut fields = Fields::new();
        for (input, handle) in &self.plan.inputs {
            fields.insert(format!("input.{}", input), Value::String(handle.to_string()));
        }
        let program = self.writer.signature();
        if !program.is_null() {
            fields.insert("program".to_string(), program);
        }
        fields
    }

    /// Brings a loaded record in line with the plan. Drift in strict mode is
    /// an error unless `reset`, in which case the record is rebuilt.
    pub fn reconcile(
        &self,
        record: Option<ExecutionRecord>,
        reset: bool,
    ) -> Result<(ExecutionRecord, Reconciled)> {
        let Some(mut record) = record else {
            return Ok((self.fresh_record(), Reconciled::Fresh));
        };
        let owner = self.logname();

        // Nothing has consumed the inputs of an unstaged task yet.
        let wiring_plan = if record.status == TaskStatus::Unstaged {
            TaskConfig::new(Fields::new()).with_class(self.wiring(), FieldClass::Safe)
        } else {
            TaskConfig::new(self.wiring())
        };
        let merged = merge(&record.config, &self.plan.config, self.mode, &owner).and_then(
            |(config, mut changes)| {
                let (wiring, wiring_changes) =
                    merge(&record.wiring, &wiring_plan, self.mode, &owner)?;
                changes.extend(wiring_changes);
                Ok((config, wiring, changes))
            },
        );
        let (config, wiring, mut changes) = match merged {
            Ok(merged) => merged,
            Err(drift) if reset => {
                tracing::warn!("{}, discarding the record.", drift);
                return Ok((self.fresh_record(), Reconciled::Reset));
            }
            Err(drift) => return Err(drift.into()),
        };
        let (resources, resource_changes) = merge(
            &record.resources,
            &self.plan.resources,
            ReconcileMode::Lenient,
            &owner,
        )?;
        changes.extend(resource_changes);

        if !changes.is_changed() {
            return Ok((record, Reconciled::Unchanged));
        }
        record.config = config;
        record.wiring = wiring;
        record.resources = resources;
        Ok((record, Reconciled::Updated(changes)))
    }

    /// Reconciles the record on disk without ticking and persists what
    /// changed.
    pub fn verify(&self, reset: bool) -> Result<Reconciled> {
        let (record, outcome) = self.reconcile(self.load_record()?, reset)?;
        if matches!(outcome, Reconciled::Updated(_) | Reconciled::Reset) {
            record.save(&self.record_path())?;
        }
        Ok(outcome)
    }

    /// Drops the record so the next tick starts over.
    pub fn discard(&self) -> Result<bool> {
        let path = self.record_path();
        if !path.exists() {
            return Ok(false);
        }
        tracing::warn!("{}: discarding record {}", self.logname(), path.display());
        fs_err::remove_file(&path)?;
        Ok(true)
    }

    fn directives(&self, record: &ExecutionRecord) -> Result<ResourceDirectives> {
        let hints = ResourceHints::from_fields(&record.resources)?;
        Ok(resolve_for_task(
            &self.name,
            self.env.scheduler(),
            &self.env.config().resources,
            Some(&hints),
        ))
    }

    fn runner(&self, record: &ExecutionRecord) -> Result<Runner> {
        Ok(Runner::new(
            self.backend.clone(),
            self.directives(record)?,
            self.env.mpirun(),
            record.runner.clone(),
        ))
    }

    fn context<'a>(&'a self, record: &'a ExecutionRecord, effective: &'a Fields) -> StageContext<'a> {
        StageContext {
            name: &self.name,
            dir: &self.dir,
            config: effective,
            inputs: &record.inputs,
            env: &self.env,
        }
    }

    fn write_inputs(&self, record: &ExecutionRecord) -> Result<()> {
        let effective = record.diagnosis.apply_to(&record.config);
        self.writer.write_inputs(&self.context(record, &effective))
    }

    fn enqueue_attempt(&self, record: &ExecutionRecord, runner: &mut Runner) {
        let effective = record.diagnosis.apply_to(&record.config);
        runner.extend(self.writer.run_lines(&self.context(record, &effective)));
    }

    /// Advances the task by one step and persists the record.
    ///
    /// Returns the status reached. Only drift and I/O problems are errors;
    /// queue hiccups and failed runs are handled here.
    pub fn nextstep(&self, upstream: &dyn ArtifactSource, reset: bool) -> Result<TaskStatus> {
        let span = tracing::info_span!("task", task = %self.name, path = %self.dir.display());
        let _guard = span.enter();

        let (mut record, reconciled) = self.reconcile(self.load_record()?, reset)?;
        if let Reconciled::Updated(changes) = &reconciled {
            tracing::debug!("{} field(s) updated from the plan", changes.applied.len() + changes.added.len());
        }

        if record.status == TaskStatus::Failed {
            tracing::warn!(
                "Parked after {} restart(s), needs human intervention: {}",
                record.retry_count,
                record.diagnosis.note.as_deref().unwrap_or("no diagnosis")
            );
            record.save(&self.record_path())?;
            return Ok(record.status);
        }

        if record.status == TaskStatus::Unstaged && !self.stage(&mut record, upstream)? {
            record.save(&self.record_path())?;
            return Ok(record.status);
        }

        if let Some(script) = &record.bundle_script {
            tracing::debug!("Waiting for a bundle to pick up {}", script.display());
            record.save(&self.record_path())?;
            return Ok(record.status);
        }

        let mut runner = self.runner(&record)?;
        let resolved = resolve_status(
            &runner,
            &record.reader,
            &self.dir,
            &self.writer.expected_outputs(&self.name),
        );
        tracing::debug!("Resolved status: {}", resolved);

        match resolved {
            ResolvedStatus::Done | ResolvedStatus::Running => {
                record.set_status(resolved.into(), None);
            }
            ResolvedStatus::NotStarted => {
                if !runner.has_pending() {
                    self.enqueue_attempt(&record, &mut runner);
                }
                if record.status != TaskStatus::Retrying {
                    record.set_status(TaskStatus::NotStarted, None);
                }
            }
            ResolvedStatus::ReadyForAnalysis => {
                record.set_status(TaskStatus::ReadyForAnalysis, None);
                self.analyze(&mut record, &mut runner)?;
            }
        }

        self.dispatch(&mut record, &mut runner)?;
        record.runner = runner.into_state();
        record.save(&self.record_path())?;
        Ok(record.status)
    }

    /// Resolves dependencies and writes inputs. `false` means an upstream
    /// artifact is not ready and the task stays unstaged.
    fn stage(&self, record: &mut ExecutionRecord, upstream: &dyn ArtifactSource) -> Result<bool> {
        let mut resolved = BTreeMap::new();
        for (input, handle) in &self.plan.inputs {
            match upstream.export(handle)? {
                Export::Ready(path) => {
                    resolved.insert(input.clone(), path);
                }
                Export::NotReady => {
                    tracing::info!("Input '{}' waits for {}", input, handle);
                    return Ok(false);
                }
            }
        }

        fs_err::create_dir_all(&self.dir)?;
        // Outputs left by a discarded record belong to another configuration.
        for file in self.writer.expected_outputs(&self.name) {
            let path = self.dir.join(&file);
            if path.exists() {
                tracing::warn!("Moving stale output {} aside", file);
                fs_err::rename(&path, set_aside(&path, "stale"))?;
            }
        }
        record.inputs = resolved;
        self.write_inputs(record)?;
        record.set_status(TaskStatus::Staged, None);
        tracing::info!("Staged");
        Ok(true)
    }

    fn analyze(&self, record: &mut ExecutionRecord, runner: &mut Runner) -> Result<()> {
        let effective = record.diagnosis.apply_to(&record.config);
        let collected = match self.reader.collect(&self.context(record, &effective)) {
            Ok(collected) => collected,
            Err(e) => {
                tracing::error!("Could not read results, needs human intervention: {}", e);
                record.diagnosis.note = Some(e.to_string());
                record.set_status(TaskStatus::Failed, Some(e.to_string()));
                return Ok(());
            }
        };
        let Collected {
            outcome,
            output,
            artifacts,
            message,
        } = collected;
        record.reader.last_outcome = Some(outcome);

        match outcome {
            Outcome::Success => {
                record.reader.completed = true;
                record.reader.output = output;
                record.artifact_refs = artifacts;
                record.set_status(TaskStatus::Done, message);
                tracing::info!("Finished after {} restart(s)", record.retry_count);
                if record.diagnosis.needs_verification() {
                    let relaxed = self.plan.recovery.relax(&record.diagnosis);
                    tracing::info!("Succeeded with temporary recovery settings, rerunning without them");
                    self.restart(record, runner, relaxed)?;
                }
            }
            Outcome::Failure(kind) => {
                let reason = message.unwrap_or_else(|| format!("{:?}", kind).to_lowercase());
                if kind.is_recoverable() && self.plan.recovery.can_retry(record.retry_count) {
                    tracing::warn!(
                        "Attempt {} failed ({}), restarting",
                        record.retry_count,
                        reason
                    );
                    let next = self
                        .plan
                        .recovery
                        .escalate(record.retry_count, &record.diagnosis);
                    self.restart(record, runner, next)?;
                } else {
                    tracing::error!(
                        "Attempt {} failed ({}), giving up after {} restart(s); needs human intervention",
                        record.retry_count,
                        reason,
                        record.retry_count
                    );
                    record.diagnosis.note = Some(reason.clone());
                    record.set_status(TaskStatus::Failed, Some(reason));
                }
            }
        }
        Ok(())
    }

    /// Archives the last attempt, applies `next`, rewrites inputs and queues
    /// the next attempt.
    fn restart(
        &self,
        record: &mut ExecutionRecord,
        runner: &mut Runner,
        next: DiagnosisState,
    ) -> Result<()> {
        let attempt = record.retry_count;
        let mut archived = self.writer.attempt_files(&self.name);

        if let Some(reseed) = &next.reseed {
            let from = self.dir.join(&reseed.from);
            if from.exists() {
                fs_err::copy(&from, self.dir.join(&reseed.to))?;
                tracing::debug!("Seeding {} from {}", reseed.to, reseed.from);
            }
            if !archived.contains(&reseed.from) {
                archived.push(reseed.from.clone());
            }
        }

        for file in &archived {
            let path = self.dir.join(file);
            if path.exists() {
                fs_err::rename(&path, set_aside(&path, &attempt.to_string()))?;
            }
        }

        let note = next.note.clone();
        record.diagnosis = next;
        record.retry_count += 1;
        record.reader = ReaderState::default();
        record.artifact_refs.clear();
        self.write_inputs(record)?;
        self.enqueue_attempt(record, runner);
        record.set_status(TaskStatus::Retrying, note);
        Ok(())
    }

    fn dispatch(&self, record: &mut ExecutionRecord, runner: &mut Runner) -> Result<()> {
        if !runner.has_pending() {
            return Ok(());
        }
        if self.plan.bundle {
            let path = self.dir.join(format!(
                "{}.{}",
                sanitize_name(&self.name),
                scripts::LOCAL_EXT
            ));
            if runner.script(&path)? {
                tracing::info!("Script {} is ready for bundling", path.display());
                record.bundle_script = Some(path);
            }
            return Ok(());
        }
        match runner.submit(&self.name, &self.dir) {
            SubmitOutcome::Submitted(id) => {
                tracing::info!("Submitted as {}", id);
                record.set_status(TaskStatus::Running, Some(format!("submitted as {}", id)));
            }
            SubmitOutcome::Deferred(reason) => {
                tracing::debug!("Submission deferred: {}", reason);
            }
            SubmitOutcome::Nothing => {}
        }
        Ok(())
    }

    /// Adopts the id of a bundle this task's script was submitted in.
    pub fn record_submission(&self, id: &ExternalJobId) -> Result<()> {
        let Some(mut record) = self.load_record()? else {
            return Err(ManagerError::Program {
                task: self.logname(),
                message: "no record to attach a submission to".to_string(),
            });
        };
        record.runner.job_ids.retain(|known| known != id);
        record.runner.job_ids.push(id.clone());
        record.bundle_script = None;
        record.set_status(TaskStatus::Running, Some(format!("bundled as {}", id)));
        record.save(&self.record_path())
    }

    /// Hands a finished artifact to a dependent task, ticking this task first
    /// when it is not done yet.
    pub fn export(&self, upstream: &dyn ArtifactSource, artifact: &str) -> Result<Export> {
        let mut status = self.status()?;
        if !status.is_ok() && status != TaskStatus::Failed {
            status = self.nextstep(upstream, false)?;
        }
        if !status.is_ok() {
            return Ok(Export::NotReady);
        }
        let record = self.load_record()?.unwrap_or_else(|| self.fresh_record());
        match record.artifact_refs.get(artifact) {
            Some(reference) => Ok(Export::Ready(self.dir.join(reference))),
            None => Err(ManagerError::MissingArtifact {
                task: self.logname(),
                artifact: artifact.to_string(),
            }),
        }
    }
}

/// The sibling of `path` named `<prefix>.<file name>`.
fn set_aside(path: &Path, prefix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().unwrap_or(path);
    parent.join(format!("{}.{}", prefix, name))
}

impl Bundleable for TaskManager {
    fn bundle_entry(&self) -> Option<BundleEntry> {
        let record = self.load_record().ok()??;
        let script = record.bundle_script.clone()?;
        if record.status.is_terminal() {
            return None;
        }
        let nodes = self.directives(&record).ok()?.nodes();
        Some(BundleEntry {
            key: self.logname(),
            dir: self.dir.clone(),
            script,
            nodes,
        })
    }
}
