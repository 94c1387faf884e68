use super::{header, status_cell};
use crate::cli::InfoArgs;
use crate::error::CliError;
use autogen_core::constants::files;
use autogen_manager::record::ExecutionRecord;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Cell, Table};
use std::path::Path;
use walkdir::WalkDir;

fn is_record(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(&format!(".{}", files::RECORD_SUFFIX)))
}

/// Lists every execution record below `args.path`, whether or not a plan
/// still names it.
pub fn handle_info(args: InfoArgs) -> Result<(), CliError> {
    if !args.path.is_dir() {
        return Err(CliError::InvalidArgument(format!(
            "'{}' is not a directory",
            args.path.display()
        )));
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header(&["Record", "Task", "Status", "Retries", "Queue IDs", "Output"]));

    let mut found = 0;
    for entry in WalkDir::new(&args.path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_record(e.path()))
    {
        let record = match ExecutionRecord::load(entry.path()) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Skipping unreadable record: {}", e);
                continue;
            }
        };
        let shown = entry
            .path()
            .strip_prefix(&args.path)
            .unwrap_or(entry.path());
        let output = if record.reader.output.is_null() {
            String::new()
        } else {
            serde_json::to_string(&record.reader.output)?
        };
        table.add_row(vec![
            Cell::new(shown.display()),
            Cell::new(&record.name),
            status_cell(record.status),
            Cell::new(record.retry_count),
            Cell::new(record.external_job_ids().join(", ")),
            Cell::new(output),
        ]);
        found += 1;
    }

    if found == 0 {
        println!("No execution records under '{}'.", args.path.display());
    } else {
        println!("{}", table);
    }
    Ok(())
}
