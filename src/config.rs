//! Configuration file support for backtests.
//!
//! Allows loading backtest configurations from TOML files for reproducibility.

use crate::data::DataConfig;
use crate::error::{BacktestError, Result};
use crate::export::ExportConfig;
use crate::simulator::SimulationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete backtest configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

/// Simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_share_size")]
    pub share_size: u64,
    /// Stop-loss as a fraction of the entry price (0.05 = 5%).
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,
    /// Take-profit as a fraction of the entry price (0.10 = 10%).
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: f64,
}

fn default_balance() -> f64 { 10_000.0 }
fn default_share_size() -> u64 { 10 }
fn default_stop_loss() -> f64 { 0.05 }
fn default_take_profit() -> f64 { 0.10 }

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_balance(),
            share_size: default_share_size(),
            stop_loss_pct: default_stop_loss(),
            take_profit_pct: default_take_profit(),
        }
    }
}

/// Input and output table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    #[serde(default = "default_input")]
    pub input: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_column: Option<String>,
}

fn default_input() -> PathBuf { PathBuf::from("strategy_output.csv") }
fn default_output() -> PathBuf { PathBuf::from("backtest_output.csv") }
fn default_delimiter() -> String { ",".to_string() }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
            delimiter: default_delimiter(),
            date_format: None,
            date_column: None,
        }
    }
}

/// Extra outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Decimal places for the Balance column.
    #[serde(default = "default_precision")]
    pub precision: usize,
    /// Optional fill log CSV path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fills: Option<PathBuf>,
    /// Optional JSON summary path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PathBuf>,
}

fn default_precision() -> usize { 4 }

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            precision: default_precision(),
            fills: None,
            summary: None,
        }
    }
}

fn parse_delimiter(s: &str) -> Result<u8> {
    match s {
        "\\t" | "\t" | "tab" => Ok(b'\t'),
        _ if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        _ => Err(BacktestError::InvalidConfig(format!(
            "delimiter must be a single ASCII character, got '{}'",
            s
        ))),
    }
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&content)?;
        config.to_simulation_config().validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn to_simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            initial_balance: self.simulation.initial_balance,
            share_size: self.simulation.share_size,
            stop_loss_pct: self.simulation.stop_loss_pct,
            take_profit_pct: self.simulation.take_profit_pct,
        }
    }

    pub fn to_data_config(&self) -> Result<DataConfig> {
        Ok(DataConfig {
            date_format: self.data.date_format.clone(),
            delimiter: parse_delimiter(&self.data.delimiter)?,
            date_column: self.data.date_column.clone(),
        })
    }

    pub fn to_export_config(&self) -> Result<ExportConfig> {
        Ok(ExportConfig {
            precision: self.output.precision,
            delimiter: parse_delimiter(&self.data.delimiter)?,
            ..Default::default()
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Cicada backtest configuration

[simulation]
initial_balance = 10000.0
share_size = 10
stop_loss_pct = 0.05    # 5% below the entry price
take_profit_pct = 0.10  # 10% above the entry price

[data]
input = "strategy_output.csv"
output = "backtest_output.csv"
delimiter = ","
# date_format = "%Y-%m-%d"
# date_column = "Date"

[output]
precision = 4
# fills = "fills.csv"
# summary = "summary.json"
"#
        .to_string()
    }
}
