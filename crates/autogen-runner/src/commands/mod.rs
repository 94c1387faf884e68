use crate::error::CliError;
use autogen_client::targets::{backend_for, QueueBackend};
use autogen_core::config;
use autogen_core::constants::files;
use autogen_core::environment::Environment;
use autogen_core::model::{SchedulerType, TaskStatus};
use autogen_manager::ensemble::{EnsembleReport, JobEnsemble};
use autogen_manager::job::JobOutcome;
use autogen_manager::plan::PlanFile;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod info;
pub mod nextstep;
pub mod status;

/// Everything a plan-driven command needs: the plan, where its jobs live,
/// and the queue they are submitted to.
pub struct AppContext {
    pub plan_path: PathBuf,
    pub root: PathBuf,
    pub env: Arc<Environment>,
    pub backend: Arc<dyn QueueBackend>,
}

impl AppContext {
    pub fn new(
        plan_path: &Path,
        config_path: Option<&Path>,
        scheduler: Option<&str>,
    ) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => config::load_config_from(path)?,
            None => config::load_config()?,
        };
        let mut env = Environment::new(config)?;
        if let Some(name) = scheduler {
            let scheduler = name
                .parse::<SchedulerType>()
                .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
            env = env.with_scheduler(scheduler);
        }
        tracing::debug!("Using the {} scheduler", env.scheduler());

        let env = Arc::new(env);
        let backend = backend_for(&env);
        let root = match plan_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self {
            plan_path: plan_path.to_path_buf(),
            root,
            env,
            backend,
        })
    }

    pub fn ensemble(&self) -> Result<JobEnsemble, CliError> {
        let plan = PlanFile::load(&self.plan_path)?;
        tracing::info!(
            "Loaded {} job(s) from '{}'",
            plan.jobs.len(),
            self.plan_path.display()
        );
        Ok(plan.build(&self.root, self.env.clone(), self.backend.clone())?)
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join(files::REPORT)
    }
}

pub(crate) fn status_cell(status: TaskStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        TaskStatus::Done => cell.fg(Color::Green),
        TaskStatus::Failed => cell.fg(Color::Red).add_attribute(Attribute::Bold),
        TaskStatus::Running | TaskStatus::NotStarted => cell.fg(Color::Yellow),
        TaskStatus::Retrying | TaskStatus::ReadyForAnalysis => cell.fg(Color::Magenta),
        TaskStatus::Unstaged | TaskStatus::Staged => cell,
    }
}

pub(crate) fn header(columns: &[&str]) -> Vec<Cell> {
    columns
        .iter()
        .map(|c| Cell::new(c).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect()
}

fn outcome_text(outcome: &Option<JobOutcome>) -> String {
    match outcome {
        Some(JobOutcome::Advanced { stage, status }) => format!("{} -> {}", stage, status),
        Some(JobOutcome::Complete) => "complete".to_string(),
        Some(JobOutcome::Drift(msg)) => format!("drift: {}", msg),
        Some(JobOutcome::Error(msg)) => format!("error: {}", msg),
        None => String::new(),
    }
}

pub(crate) fn render_report(report: &EnsembleReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header(&["Job", "Stage", "Status", "Retries", "Queue IDs", "Last tick"]));

    for job in &report.jobs {
        let outcome = outcome_text(&job.outcome);
        if job.stages.is_empty() {
            table.add_row(vec![
                Cell::new(&job.id),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new(&outcome),
            ]);
            continue;
        }
        for (i, stage) in job.stages.iter().enumerate() {
            table.add_row(vec![
                Cell::new(if i == 0 { job.id.as_str() } else { "" }),
                Cell::new(&stage.name),
                status_cell(stage.status),
                Cell::new(stage.retry_count),
                Cell::new(stage.external_job_ids.join(", ")),
                Cell::new(if i == 0 { outcome.as_str() } else { "" }),
            ]);
        }
    }
    table
}
