use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_CAPTURE_COST: u64 = 20_000;
const DEFAULT_MAX_CHECKPOINTS: usize = 20;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Ceiling for the format capture cost estimate. `None` disables it.
    pub max_capture_cost: Option<u64>,
    /// Checkpoints kept per workbook; the oldest are evicted first.
    pub max_checkpoints: usize,
    pub backups_enabled: bool,
    pub log_filter: String,
    /// Classification for tool names the policy table does not know.
    pub unknown_tools_mutate: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_capture_cost: Some(DEFAULT_MAX_CAPTURE_COST),
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            backups_enabled: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            unknown_tools_mutate: true,
        }
    }
}

impl GuardConfig {
    pub fn from_args(args: GuardArgs) -> Result<Self> {
        let GuardArgs {
            config,
            max_capture_cost: cli_max_capture_cost,
            max_checkpoints: cli_max_checkpoints,
            backups: cli_backups,
            log_filter: cli_log_filter,
            unknown_tools_mutate: cli_unknown_tools_mutate,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            max_capture_cost: file_max_capture_cost,
            max_checkpoints: file_max_checkpoints,
            backups_enabled: file_backups_enabled,
            log_filter: file_log_filter,
            unknown_tools_mutate: file_unknown_tools_mutate,
        } = file_config;

        let max_capture_cost = cli_max_capture_cost
            .or(file_max_capture_cost)
            .unwrap_or(DEFAULT_MAX_CAPTURE_COST);
        let max_capture_cost = if max_capture_cost == 0 {
            None
        } else {
            Some(max_capture_cost)
        };

        let max_checkpoints = cli_max_checkpoints
            .or(file_max_checkpoints)
            .unwrap_or(DEFAULT_MAX_CHECKPOINTS)
            .max(1);

        let backups_enabled = cli_backups.or(file_backups_enabled).unwrap_or(true);

        let log_filter = cli_log_filter
            .or(file_log_filter)
            .map(|filter| filter.trim().to_string())
            .filter(|filter| !filter.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let unknown_tools_mutate = cli_unknown_tools_mutate
            .or(file_unknown_tools_mutate)
            .unwrap_or(true);

        Ok(Self {
            max_capture_cost,
            max_checkpoints,
            backups_enabled,
            log_filter,
            unknown_tools_mutate,
        })
    }

    /// The ceiling as the recovery engine expects it (0 = unlimited).
    pub fn capture_cost_ceiling(&self) -> u64 {
        self.max_capture_cost.unwrap_or(0)
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "workbook-guard",
    about = "Write coordination and recovery checkpoints for shared workbooks",
    version
)]
pub struct GuardArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "WORKBOOK_GUARD_MAX_CAPTURE_COST",
        value_name = "UNITS",
        help = "Skip backups whose estimated capture cost exceeds this (default: 20000; 0 disables)",
        value_parser = clap::value_parser!(u64)
    )]
    pub max_capture_cost: Option<u64>,

    #[arg(
        long,
        env = "WORKBOOK_GUARD_MAX_CHECKPOINTS",
        value_name = "N",
        help = "Checkpoints retained per workbook (default: 20)",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_checkpoints: Option<usize>,

    #[arg(
        long,
        env = "WORKBOOK_GUARD_BACKUPS",
        value_name = "BOOL",
        help = "Capture a recovery checkpoint before mutating tools (default: true)",
        value_parser = clap::value_parser!(bool)
    )]
    pub backups: Option<bool>,

    #[arg(
        long,
        env = "WORKBOOK_GUARD_LOG",
        value_name = "FILTER",
        help = "Default tracing filter when RUST_LOG is unset (default: info)"
    )]
    pub log_filter: Option<String>,

    #[arg(
        long,
        env = "WORKBOOK_GUARD_UNKNOWN_TOOLS_MUTATE",
        value_name = "BOOL",
        help = "Treat tools missing from the policy table as mutating (default: true)",
        value_parser = clap::value_parser!(bool)
    )]
    pub unknown_tools_mutate: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    max_capture_cost: Option<u64>,
    max_checkpoints: Option<usize>,
    backups_enabled: Option<bool>,
    log_filter: Option<String>,
    unknown_tools_mutate: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
