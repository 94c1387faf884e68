pub mod cli;
pub mod commands;
pub mod error;

use cli::{Cli, Commands};
use commands::AppContext;
use error::CliError;

pub fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Info(args) => commands::info::handle_info(args),
        Commands::Nextstep(args) => {
            let context = AppContext::new(&cli.plan, cli.config.as_deref(), cli.scheduler.as_deref())?;
            commands::nextstep::handle_nextstep(args, &context)
        }
        Commands::Status => {
            let context = AppContext::new(&cli.plan, cli.config.as_deref(), cli.scheduler.as_deref())?;
            commands::status::handle_status(&context)
        }
    }
}
