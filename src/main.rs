use clap::Parser;
use dorg::cli::{AppError, Cli, run_cli};
use dorg::context::AppPaths;
use dorg::logging::init_logger;
use dorg::output::OutputFormatter;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = match AppPaths::from_current_exe(cli.config.as_deref()) {
        Ok(paths) => paths,
        Err(e) => {
            let e = AppError::AppDir(e);
            OutputFormatter::error(&e.to_string());
            return ExitCode::from(e.exit_code());
        }
    };

    let _guard = match init_logger(&paths.log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            OutputFormatter::error(&e.to_string());
            return ExitCode::from(e.exit_code());
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %paths.config_file.display(),
        log = %paths.log_file().display(),
        "dorg starting"
    );

    // SIGINT, SIGTERM and SIGHUP (Ctrl-C / Ctrl-Break on Windows) all request a graceful stop
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to set Ctrl-C handler: {e}");
    }

    match run_cli(&cli, paths, &stop) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            OutputFormatter::error(&e.to_string());
            ExitCode::from(e.exit_code())
        }
    }
}
