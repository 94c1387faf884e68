use super::{render_report, AppContext};
use crate::cli::NextstepArgs;
use crate::error::CliError;
use autogen_client::bundler::{BundleSettings, Bundler};
use autogen_manager::job::JobOutcome;
use colored::Colorize;

pub fn handle_nextstep(args: NextstepArgs, context: &AppContext) -> Result<(), CliError> {
    let mut ensemble = context.ensemble()?;
    let _span = tracing::info_span!("nextstep", root = %context.root.display()).entered();

    let tick = ensemble.nextstep(args.reset);

    if tick.is_ok() && args.bundle {
        let mut bundler = Bundler::new(
            context.backend.clone(),
            BundleSettings::from_config(&context.env.config().bundle),
            &context.root,
        );
        let submitted = ensemble.submit_bundles(&mut bundler)?;
        if submitted > 0 {
            println!("Submitted {} bundled task(s).", submitted);
        }
    }

    let report = ensemble.write_report(&context.report_path())?;
    println!("{}", render_report(&report));
    tracing::debug!("Report written to '{}'", context.report_path().display());

    tick?;

    let plan = ensemble.executed_plan();
    let complete = plan
        .iter()
        .filter(|r| r.outcome == Some(JobOutcome::Complete))
        .count();
    let drifted = plan
        .iter()
        .filter(|r| matches!(r.outcome, Some(JobOutcome::Drift(_))))
        .count();
    let errored = plan
        .iter()
        .filter(|r| matches!(r.outcome, Some(JobOutcome::Error(_))))
        .count();

    if complete == plan.len() && !plan.is_empty() {
        println!("{}", "All jobs are complete.".green());
    } else {
        println!("{} of {} job(s) complete.", complete, plan.len());
    }

    if ensemble.has_drift() {
        return Err(CliError::Drift { count: drifted });
    }
    if ensemble.has_errors() {
        return Err(CliError::TickFailed { count: errored });
    }
    Ok(())
}
