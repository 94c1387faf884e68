//! The persisted state of one task.
//!
//! A record holds everything needed to resume after a restart and to decide
//! whether an edited plan would invalidate results already produced.

use crate::error::{ManagerError, Result};
use crate::program::ReaderState;
use crate::recovery::DiagnosisState;
use autogen_client::runner::RunnerState;
use autogen_core::model::TaskStatus;
use autogen_core::reconcile::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub status: TaskStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionRecord {
    pub name: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub config: Fields,
    pub resources: Fields,
    /// Input handles and program signature the task was staged with.
    pub wiring: Fields,
    /// Upstream artifacts as resolved at staging time.
    pub inputs: BTreeMap<String, PathBuf>,
    pub runner: RunnerState,
    /// Script written for a bundled submission that has not been submitted.
    pub bundle_script: Option<PathBuf>,
    pub reader: ReaderState,
    pub artifact_refs: BTreeMap<String, String>,
    pub diagnosis: DiagnosisState,
    pub history: Vec<Transition>,
}

impl ExecutionRecord {
    pub fn new(name: &str, config: Fields, resources: Fields) -> Self {
        Self {
            name: name.to_string(),
            config,
            resources,
            ..Default::default()
        }
    }

    /// Records a status change. Repeating the current status is a no-op.
    pub fn set_status(&mut self, status: TaskStatus, note: Option<String>) {
        if self.status == status && note.is_none() {
            return;
        }
        self.status = status;
        self.history.push(Transition {
            status,
            attempt: self.retry_count,
            note,
        });
    }

    /// Reads a record, `None` when the file does not exist. Keys the current
    /// layout does not know, or no longer has, are tolerated with a warning.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs_err::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content).map_err(|source| ManagerError::Record {
            path: path.to_path_buf(),
            source,
        })?;
        warn_schema_drift(path, &value);
        let record = serde_json::from_value(value).map_err(|source| ManagerError::Record {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Replaces the file atomically; a crash leaves the previous record.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn external_job_ids(&self) -> Vec<String> {
        self.runner.job_ids.iter().map(|id| id.to_string()).collect()
    }
}

fn warn_schema_drift(path: &Path, value: &Value) {
    let Value::Object(found) = value else {
        return;
    };
    let Ok(Value::Object(known)) = serde_json::to_value(ExecutionRecord::default()) else {
        return;
    };
    for key in found.keys().filter(|k| !known.contains_key(*k)) {
        tracing::warn!(
            "{}: unknown field '{}' in record, ignoring it.",
            path.display(),
            key
        );
    }
    for key in known.keys().filter(|k| !found.contains_key(*k)) {
        tracing::warn!(
            "{}: record has no field '{}', using the default.",
            path.display(),
            key
        );
    }
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs_err::create_dir_all(&dir)?;
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    file.write_all(content.as_bytes())?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
