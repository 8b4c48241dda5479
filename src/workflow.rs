//! Command handlers behind the CLI.
use crate::cli::{InitArgs, SimulateArgs, ValidateArgs};
use crate::config::{config_stub, StepflowConfig, CONFIG_FILE_NAME};
use crate::simulate::{load_scenario, render_transcript, run_scenario, scenario_stub, validate_scenario};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

pub const SCENARIO_FILE_NAME: &str = "scenario.json";

/// Write `stepflow.json` and an example scenario into `args.dir`.
pub fn run_init(args: InitArgs) -> Result<()> {
    fs::create_dir_all(&args.dir)
        .with_context(|| format!("create {}", args.dir.display()))?;
    let config_path = args.dir.join(CONFIG_FILE_NAME);
    let scenario_path = args.dir.join(SCENARIO_FILE_NAME);
    if !args.force {
        for path in [&config_path, &scenario_path] {
            if path.exists() {
                return Err(anyhow!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
        }
    }
    write_text(&config_path, &config_stub()?)?;
    write_text(&scenario_path, &scenario_stub()?)?;
    tracing::info!(dir = %args.dir.display(), "initialized");
    println!("wrote {}", config_path.display());
    println!("wrote {}", scenario_path.display());
    Ok(())
}

pub fn run_validate(args: ValidateArgs, config: &StepflowConfig) -> Result<()> {
    let scenario = load_scenario(&args.scenario)?;
    validate_scenario(&scenario)
        .with_context(|| format!("validate {}", args.scenario.display()))?;
    println!(
        "ok: {} ({} events, network {}, policy {})",
        scenario.action,
        scenario.events.len(),
        scenario.network_id.unwrap_or(config.network_id),
        config.sequence_policy
    );
    Ok(())
}

pub async fn run_simulate(args: SimulateArgs, config: &StepflowConfig) -> Result<()> {
    let scenario = load_scenario(&args.scenario)?;
    let transcript = run_scenario(&scenario, config.network_id, config.sequence_policy)
        .await
        .with_context(|| format!("simulate {}", args.scenario.display()))?;
    if args.json {
        let text = serde_json::to_string_pretty(&transcript).context("serialize transcript")?;
        println!("{text}");
    } else {
        print!("{}", render_transcript(&transcript, args.verbose));
    }
    Ok(())
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))
}
