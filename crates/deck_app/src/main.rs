use std::process::ExitCode;

use clap::Parser;
use deck_app::cli::{self, Cli};
use deck_core::{DeckConfig, logging};
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = cli
        .config_path()
        .and_then(|p| DeckConfig::load_from(p).ok())
        .map(|c| c.log_level)
        .unwrap_or_else(|| "info".to_string());
    let filter = logging::default_filter(&level, cli.verbose);
    let _log_guard = match &cli.log_dir {
        Some(dir) => match logging::init_logging_to_dir(dir, &filter) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("error: failed to initialize logging: {e:#}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            if let Err(e) = logging::init_logging(&filter) {
                eprintln!("error: failed to initialize logging: {e:#}");
                return ExitCode::FAILURE;
            }
            None
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
