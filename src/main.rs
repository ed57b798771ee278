use clap::Parser;
use clap::error::ErrorKind;
use geiger_exporter::app::{self, Options};
use std::panic::{self, PanicHookInfo};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Install the global log subscriber. `RUST_LOG` takes precedence over the
/// verbosity flag.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = match Options::try_parse() {
        Ok(options) => options,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            init_tracing(false);
            error!("Invalid arguments: {}", err.to_string().trim_end());
            std::process::exit(EXIT_ERROR);
        }
    };
    init_tracing(options.verbose);

    // handlers go in before anything else starts so an early Ctrl-C still
    // takes the graceful path
    let shutdown = match app::shutdown_signal() {
        Ok(shutdown) => shutdown,
        Err(err) => {
            error!(%err, "Failed to install signal handlers");
            std::process::exit(EXIT_ERROR);
        }
    };

    match app::run(options, shutdown).await {
        Ok(stats) => {
            info!(polls = stats.polls, published = stats.published, "Stopped");
            std::process::exit(EXIT_SUCCESS)
        }
        Err(why) => {
            error!("{}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
