//! Stepflow configuration helpers.
//!
//! The config is a small JSON file holding the defaults a simulated session
//! runs under. Scenario files may override the network; everything else is
//! fixed per run.
use crate::cache::SequencePolicy;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// File name `init` writes and `simulate` looks for next to a scenario.
pub const CONFIG_FILE_NAME: &str = "stepflow.json";
pub const DEFAULT_NETWORK_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepflowConfig {
    pub schema_version: u32,
    #[serde(default = "default_network_id")]
    pub network_id: u64,
    #[serde(default)]
    pub sequence_policy: SequencePolicy,
    /// `tracing` filter directive used when `STEPFLOW_LOG` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

fn default_network_id() -> u64 {
    DEFAULT_NETWORK_ID
}

/// Build the config used when none is present.
pub fn default_config() -> StepflowConfig {
    StepflowConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        network_id: DEFAULT_NETWORK_ID,
        sequence_policy: SequencePolicy::default(),
        log_filter: Some("info".to_string()),
    }
}

/// Render a pretty JSON config stub for `init`.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

/// User-level config location (`<config dir>/stepflow/config.json`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stepflow").join("config.json"))
}

pub fn load_config(path: &Path) -> Result<StepflowConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: StepflowConfig =
        serde_json::from_slice(&bytes).context("parse stepflow config JSON")?;
    Ok(config)
}

/// Persist a config to disk in a stable JSON format.
pub fn write_config(path: &Path, config: &StepflowConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize stepflow config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn validate_config(config: &StepflowConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported stepflow config schema_version {}",
            config.schema_version
        ));
    }
    if config.network_id == 0 {
        return Err(anyhow!("network_id must be non-zero"));
    }
    if let Some(filter) = config.log_filter.as_deref() {
        if filter.trim().is_empty() {
            return Err(anyhow!("log_filter must be non-empty when set"));
        }
        EnvFilter::try_new(filter).with_context(|| format!("invalid log_filter {filter:?}"))?;
    }
    Ok(())
}

/// Pick the config for a run: the explicit path, then `stepflow.json` beside
/// `scenario`, then the user-level file, then defaults.
pub fn resolve_config(explicit: Option<&Path>, scenario: Option<&Path>) -> Result<StepflowConfig> {
    if let Some(path) = explicit {
        let config = load_config(path)?;
        validate_config(&config)?;
        return Ok(config);
    }
    let beside_scenario = scenario
        .and_then(Path::parent)
        .map(|dir| dir.join(CONFIG_FILE_NAME));
    for candidate in beside_scenario.into_iter().chain(default_config_path()) {
        if candidate.is_file() {
            let config = load_config(&candidate)?;
            validate_config(&config)
                .with_context(|| format!("validate {}", candidate.display()))?;
            return Ok(config);
        }
    }
    Ok(default_config())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
