//! CLI argument parsing for stepflow.
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "stepflow",
    version,
    about = "Drive keyed two-phase action pipelines against a simulated ledger",
    after_help = "Commands:\n  init --dir <dir>              Write stepflow.json and an example scenario\n  validate --scenario <path>    Check a scenario and its config\n  simulate --scenario <path>    Run a scenario and print its transcript\n\nExamples:\n  stepflow init --dir /tmp/flows\n  stepflow validate --scenario /tmp/flows/scenario.json\n  stepflow simulate --scenario /tmp/flows/scenario.json --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Validate(ValidateArgs),
    Simulate(SimulateArgs),
}

/// Init command inputs.
#[derive(Parser, Debug)]
#[command(about = "Write a config and an example scenario")]
pub struct InitArgs {
    /// Directory receiving stepflow.json and scenario.json
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Validate a scenario and the config it runs under")]
pub struct ValidateArgs {
    /// Scenario JSON file
    #[arg(long, value_name = "PATH")]
    pub scenario: PathBuf,

    /// Config file (defaults to stepflow.json beside the scenario)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Run a scenario against the simulated ledger")]
pub struct SimulateArgs {
    /// Scenario JSON file
    #[arg(long, value_name = "PATH")]
    pub scenario: PathBuf,

    /// Config file (defaults to stepflow.json beside the scenario)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit the transcript as JSON
    #[arg(long)]
    pub json: bool,

    /// Include snapshots and ledger calls in the text transcript
    #[arg(long)]
    pub verbose: bool,
}

impl Command {
    /// Config path and scenario the command runs under, if any.
    pub fn config_inputs(&self) -> (Option<&Path>, Option<&Path>) {
        match self {
            Command::Init(_) => (None, None),
            Command::Validate(args) => (args.config.as_deref(), Some(args.scenario.as_path())),
            Command::Simulate(args) => (args.config.as_deref(), Some(args.scenario.as_path())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_flags_parse() {
        let args = RootArgs::try_parse_from([
            "stepflow",
            "simulate",
            "--scenario",
            "flow.json",
            "--json",
        ])
        .expect("parse");
        let Command::Simulate(simulate) = args.command else {
            panic!("expected simulate");
        };
        assert!(simulate.json);
        assert!(!simulate.verbose);
        assert_eq!(simulate.scenario, PathBuf::from("flow.json"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(RootArgs::try_parse_from(["stepflow"]).is_err());
    }
}
