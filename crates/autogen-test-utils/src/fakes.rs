use autogen_client::error::{ClientError, Result as ClientResult};
use autogen_client::runner::ScriptLine;
use autogen_client::script::BatchScript;
use autogen_client::targets::QueueBackend;
use autogen_core::model::{ExternalJobId, QueueStatus, SchedulerType};
use autogen_manager::error::Result;
use autogen_manager::program::{Collected, FailureKind, Reader, StageContext, Writer};
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSubmission {
    pub id: ExternalJobId,
    pub name: String,
    pub dir: PathBuf,
    pub script: String,
}

/// A queue that hands out sequential ids and reports whatever the test
/// scripted. Optionally runs each script body with bash so its files appear.
pub struct FakeBackend {
    run_scripts: bool,
    default_status: Mutex<QueueStatus>,
    statuses: Mutex<VecDeque<QueueStatus>>,
    refusals: Mutex<u32>,
    polls: AtomicUsize,
    submissions: Mutex<Vec<RecordedSubmission>>,
}

impl FakeBackend {
    /// Every poll reports `Finished` unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            run_scripts: false,
            default_status: Mutex::new(QueueStatus::Finished),
            statuses: Mutex::new(VecDeque::new()),
            refusals: Mutex::new(0),
            polls: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Like `new`, but each submitted script runs to completion in its
    /// directory before `submit` returns.
    pub fn executing() -> Self {
        Self {
            run_scripts: true,
            ..Self::new()
        }
    }

    pub fn set_status(&self, status: QueueStatus) {
        *self.default_status.lock().expect("lock") = status;
    }

    /// Statuses returned by the next polls, one per job id, before falling
    /// back to the default.
    pub fn push_statuses(&self, statuses: &[QueueStatus]) {
        self.statuses.lock().expect("lock").extend(statuses);
    }

    pub fn refuse_next(&self, count: u32) {
        *self.refusals.lock().expect("lock") = count;
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().expect("lock").clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueBackend for FakeBackend {
    fn scheduler(&self) -> SchedulerType {
        SchedulerType::Slurm
    }

    fn submit(&self, script: &BatchScript, dir: &Path) -> ClientResult<ExternalJobId> {
        {
            let mut refusals = self.refusals.lock().expect("lock");
            if *refusals > 0 {
                *refusals -= 1;
                return Err(ClientError::CommandFailed {
                    backend: "fake".into(),
                    command: "submit".into(),
                    stderr: "queue is closed".into(),
                });
            }
        }

        if self.run_scripts {
            let status = Command::new("bash")
                .arg("-c")
                .arg(script.lines.join("\n"))
                .current_dir(dir)
                .status()
                .map_err(|source| ClientError::Spawn {
                    command: "bash -c".into(),
                    source,
                })?;
            if !status.success() {
                eprintln!("fake backend: script '{}' exited with {}", script.name, status);
            }
        }

        let mut submissions = self.submissions.lock().expect("lock");
        let id = ExternalJobId(format!("{}", 1000 + submissions.len()));
        submissions.push(RecordedSubmission {
            id: id.clone(),
            name: script.name.clone(),
            dir: dir.to_path_buf(),
            script: script.render(SchedulerType::Slurm),
        });
        Ok(id)
    }

    fn status(&self, _id: &ExternalJobId) -> ClientResult<QueueStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.statuses.lock().expect("lock").pop_front();
        Ok(scripted.unwrap_or(*self.default_status.lock().expect("lock")))
    }

    fn cancel(&self, _id: &ExternalJobId) -> ClientResult<()> {
        Ok(())
    }
}

/// Writes `<name>.in` and runs `touch <name>.out`.
pub struct TouchWriter;

impl TouchWriter {
    pub fn input(name: &str) -> String {
        format!("{}.in", name)
    }

    pub fn output(name: &str) -> String {
        format!("{}.out", name)
    }
}

impl Writer for TouchWriter {
    fn write_inputs(&self, ctx: &StageContext<'_>) -> Result<()> {
        let document = json!({"config": ctx.config, "inputs": ctx.inputs});
        std::fs::write(
            ctx.dir.join(Self::input(ctx.name)),
            serde_json::to_string_pretty(&document)?,
        )?;
        Ok(())
    }

    fn run_lines(&self, ctx: &StageContext<'_>) -> Vec<ScriptLine> {
        vec![ScriptLine::Task(format!("touch {}", Self::output(ctx.name)))]
    }

    fn input_files(&self, name: &str) -> Vec<String> {
        vec![Self::input(name)]
    }

    fn expected_outputs(&self, name: &str) -> Vec<String> {
        vec![Self::output(name)]
    }
}

/// Returns scripted results in order, repeating the last one.
#[derive(Clone)]
pub struct ScriptedReader {
    results: Arc<Mutex<VecDeque<Collected>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedReader {
    pub fn new(results: Vec<Collected>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(vec![Collected::success(json!({"energy": -1.125}))])
    }

    pub fn failing(kind: FailureKind) -> Self {
        Self::new(vec![Collected::failure(kind, "scripted failure")])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reader for ScriptedReader {
    fn collect(&self, _ctx: &StageContext<'_>) -> Result<Collected> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().expect("lock");
        let next = if results.len() > 1 {
            results.pop_front()
        } else {
            results.front().cloned()
        };
        Ok(next.unwrap_or_else(|| Collected::success(json!({}))))
    }
}
