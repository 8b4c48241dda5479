use anyhow::{Context, Result};
use clap::Parser;
use stepflow::cli::{Command, RootArgs};
use stepflow::config::resolve_config;
use stepflow::workflow;
use tracing_subscriber::EnvFilter;

/// Env var holding a `tracing` filter; wins over the config's `log_filter`.
const LOG_ENV: &str = "STEPFLOW_LOG";

fn main() -> Result<()> {
    let args = RootArgs::parse();
    let (config_path, scenario) = args.command.config_inputs();
    let config = resolve_config(config_path, scenario)?;
    let verbose = matches!(&args.command, Command::Simulate(simulate) if simulate.verbose);
    init_tracing(config.log_filter.as_deref(), verbose);

    match args.command {
        Command::Init(args) => workflow::run_init(args),
        Command::Validate(args) => workflow::run_validate(args, &config),
        Command::Simulate(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("start tokio runtime")?;
            runtime.block_on(workflow::run_simulate(args, &config))
        }
    }
}

fn init_tracing(config_filter: Option<&str>, verbose: bool) {
    let fallback = if verbose {
        "stepflow=debug"
    } else {
        config_filter.unwrap_or("info")
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
