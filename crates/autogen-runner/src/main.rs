use autogen_core::{config, logging};
use autogen_runner::cli::Cli;
use clap::Parser;
use colored::Colorize;

fn main() {
    let cli = Cli::parse();

    let logging_config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .map(|c| c.logging)
    .unwrap_or_default();

    if cli.verbose > 0 {
        logging::set_log_level(logging::LogLevel::from_verbosity(cli.verbose));
    } else {
        logging::set_log_level_from_env();
    }

    if let Err(e) = logging::init_session_logger(&logging_config) {
        eprintln!(
            "{}",
            format!("[ERROR] Failed to initialize logger: {}", e).red()
        );
        logging::init_stderr_logger();
    }

    if let Err(e) = autogen_runner::run(cli) {
        eprintln!("{}", format!("[ERROR] {}", e).red());
        std::process::exit(1);
    }
}
