use super::{render_report, AppContext};
use crate::error::CliError;

pub fn handle_status(context: &AppContext) -> Result<(), CliError> {
    let ensemble = context.ensemble()?;
    let report = ensemble.report()?;
    if report.jobs.is_empty() {
        println!("No jobs in '{}'.", context.plan_path.display());
        return Ok(());
    }
    println!("{}", render_report(&report));
    Ok(())
}
