//! Entrypoint of the sessiondb binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use dotenvy::dotenv;
use sessiondb_clap_blocks::tokio::TokioIoConfig;
use trogging::{
    TroggingGuard,
    cli::LoggingConfigBuilderExt,
    tracing_subscriber::{Registry, prelude::*},
};

mod commands {
    pub(crate) mod serve;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "sessiondb",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_flag = true,
    arg(
        clap::Arg::new("help")
            .short('h')
            .long("help")
            .help("Print help information")
            .action(clap::ArgAction::Help)
            .global(true)
    ),
    about = "Session event persistence service",
    long_about = r#"Session event persistence service

Consumes session events from an upstream log, buffers them per session and commits them to
Postgres on a fixed cadence. The upstream offset is acknowledged only after a commit succeeded.

Examples:
    # Persist events from a log file
    sessiondb serve --postgres-dsn postgresql://localhost/sessions --source-file events.jsonl

    # Same, with extra verbose logging
    sessiondb serve -v --postgres-dsn postgresql://localhost/sessions --source-file events.jsonl

    # Full debug logging specified with LOG_FILTER
    LOG_FILTER=debug sessiondb serve --postgres-dsn postgresql://localhost/sessions --source-file events.jsonl
"#
)]
struct Config {
    #[clap(flatten)]
    runtime_config: TokioIoConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Run the persistence service
    Serve(commands::serve::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = config.runtime_config.builder()?.build()?;

    tokio_runtime.block_on(async move {
        fn handle_init_logs(r: Result<TroggingGuard, trogging::Error>) -> TroggingGuard {
            match r {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("Initializing logs failed: {e}");
                    std::process::exit(ReturnCode::Failure as _);
                }
            }
        }

        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Serve(config)) => {
                let _tracing_guard =
                    handle_init_logs(init_logs_and_tracing(&config.logging_config));
                if let Err(e) = commands::serve::command(config).await {
                    eprintln!("Serve command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is fine, clap applies the defaults
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}

fn init_logs_and_tracing(
    config: &trogging::cli::LoggingConfig,
) -> Result<TroggingGuard, trogging::Error> {
    let log_layer = trogging::Builder::new()
        .with_default_log_filter("info")
        .with_logging_config(config)
        .build()?;

    let subscriber = Registry::default().with(log_layer);
    trogging::install_global(subscriber)
}
