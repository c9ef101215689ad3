//! Export utilities for backtest results.
//!
//! The main output is the input table written back unchanged with two extra
//! columns, `Balance` (the equity curve) and `Daily_Return`. The fill log
//! and a JSON summary can be written alongside it.

use crate::analytics::{daily_returns, PerformanceMetrics};
use crate::engine::BacktestResult;
use crate::error::{BacktestError, Result};
use crate::simulator::SimulationConfig;
use crate::types::{Fill, PriceSignalSeries};
use chrono::{DateTime, Utc};
use csv::{StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const BALANCE_COLUMN: &str = "Balance";
pub const DAILY_RETURN_COLUMN: &str = "Daily_Return";

/// Configuration for exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Date format used when the series has no raw rows to echo.
    pub date_format: String,
    /// Decimal places for balances and prices.
    pub precision: usize,
    /// Decimal places for daily returns.
    pub return_precision: usize,
    pub delimiter: u8,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y-%m-%d".to_string(),
            precision: 4,
            return_precision: 6,
            delimiter: b',',
        }
    }
}

/// Headline numbers written to the JSON summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub config: SimulationConfig,
    pub metrics: PerformanceMetrics,
    pub fills: Vec<Fill>,
}

impl PerformanceSummary {
    pub fn from_result(result: &BacktestResult) -> Self {
        Self {
            start_time: result.start_time,
            end_time: result.end_time,
            config: result.config.clone(),
            metrics: result.metrics.clone(),
            fills: result.fills.clone(),
        }
    }
}

/// Writes a backtest result next to the series it was run on.
pub struct Exporter<'a> {
    series: &'a PriceSignalSeries,
    result: &'a BacktestResult,
    config: ExportConfig,
}

impl<'a> Exporter<'a> {
    pub fn new(series: &'a PriceSignalSeries, result: &'a BacktestResult) -> Result<Self> {
        Self::with_config(series, result, ExportConfig::default())
    }

    pub fn with_config(
        series: &'a PriceSignalSeries,
        result: &'a BacktestResult,
        config: ExportConfig,
    ) -> Result<Self> {
        if series.len() != result.equity_curve.len() {
            return Err(BacktestError::InvalidInput(format!(
                "series has {} rows but the equity curve has {}",
                series.len(),
                result.equity_curve.len()
            )));
        }
        Ok(Self {
            series,
            result,
            config,
        })
    }

    /// Write the augmented table to any writer.
    pub fn write_backtest_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.config.delimiter)
            .from_writer(writer);

        let balances = self.result.balances();
        let returns = daily_returns(&balances);
        let prec = self.config.precision;
        let ret_prec = self.config.return_precision;

        let (mut headers, rows): (StringRecord, Vec<StringRecord>) =
            match self.series.passthrough() {
                Some(passthrough) => (passthrough.headers.clone(), passthrough.records.clone()),
                None => (
                    StringRecord::from(vec!["Date", "Close", "Position"]),
                    self.series
                        .steps()
                        .iter()
                        .map(|step| {
                            StringRecord::from(vec![
                                step.timestamp.format(&self.config.date_format).to_string(),
                                format!("{:.prec$}", step.close),
                                step.delta.to_string(),
                            ])
                        })
                        .collect(),
                ),
            };

        // Reuse result columns already present, e.g. when re-running on a
        // previous output file.
        let balance_at = column_slot(&mut headers, BALANCE_COLUMN);
        let return_at = column_slot(&mut headers, DAILY_RETURN_COLUMN);
        writer.write_record(&headers)?;

        for (i, row) in rows.into_iter().enumerate() {
            let daily = match i {
                0 => String::new(),
                _ => format!("{:.ret_prec$}", returns[i - 1]),
            };
            let mut cells: Vec<String> = row.iter().map(str::to_string).collect();
            cells.resize(headers.len(), String::new());
            cells[balance_at] = format!("{:.prec$}", balances[i]);
            cells[return_at] = daily;
            writer.write_record(&cells)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Write the augmented table to a CSV file.
    pub fn export_backtest_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.write_backtest_csv(BufWriter::new(File::create(path)?))?;
        info!("Wrote {} rows to {}", self.series.len(), path.display());
        Ok(())
    }

    /// Write the fill log to any writer.
    pub fn write_fills_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.config.delimiter)
            .from_writer(writer);
        let prec = self.config.precision;

        writer.write_record([
            "index",
            "timestamp",
            "side",
            "quantity",
            "price",
            "reason",
            "realized_pnl",
        ])?;
        for fill in &self.result.fills {
            writer.write_record([
                fill.index.to_string(),
                fill.timestamp.format(&self.config.date_format).to_string(),
                fill.side.to_string(),
                fill.quantity.to_string(),
                format!("{:.prec$}", fill.price),
                fill.reason.to_string(),
                fill.realized_pnl.map(|pnl| format!("{:.prec$}", pnl)).unwrap_or_default(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Write the fill log to a CSV file.
    pub fn export_fills_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.write_fills_csv(BufWriter::new(File::create(path)?))?;
        info!("Wrote {} fills to {}", self.result.fills.len(), path.display());
        Ok(())
    }

    /// Write config, metrics and fills as JSON.
    pub fn export_summary_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let summary = PerformanceSummary::from_result(self.result);
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &summary)?;
        Ok(())
    }
}

/// Index of `name` in `headers`, appending the column if it is missing.
fn column_slot(headers: &mut StringRecord, name: &str) -> usize {
    match headers.iter().position(|h| h.trim() == name) {
        Some(index) => index,
        None => {
            headers.push_field(name);
            headers.len() - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{parse_csv_str, DataConfig};
    use crate::engine::Engine;
    use crate::types::{SignalDelta, Timestep};
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    const INPUT: &str = "\
Date,Close,RSI,Position
2023-01-03,100.0,45.1,
2023-01-04,100.0,28.0,1.0
2023-01-05,102.0,33.3,0.0
2023-01-06,103.0,71.9,-1.0
";

    fn run(input: &str) -> (PriceSignalSeries, BacktestResult) {
        let series = parse_csv_str(input, &DataConfig::default()).unwrap();
        let result = Engine::with_defaults().run(&series).unwrap();
        (series, result)
    }

    fn render(exporter: &Exporter) -> String {
        let mut buf = Vec::new();
        exporter.write_backtest_csv(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_export_config_default() {
        let config = ExportConfig::default();
        assert_eq!(config.precision, 4);
        assert_eq!(config.delimiter, b',');
    }

    #[test]
    fn test_backtest_csv_keeps_columns_and_adds_balance() {
        let (series, result) = run(INPUT);
        let exporter = Exporter::new(&series, &result).unwrap();
        let csv = render(&exporter);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "Date,Close,RSI,Position,Balance,Daily_Return");
        assert_eq!(lines[1], "2023-01-03,100.0,45.1,,10000.0000,");
        assert_eq!(lines[2], "2023-01-04,100.0,28.0,1.0,10000.0000,0.000000");
        assert_eq!(lines[3], "2023-01-05,102.0,33.3,0.0,10020.0000,0.002000");
        assert_eq!(lines[4], "2023-01-06,103.0,71.9,-1.0,10030.0000,0.000998");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_backtest_csv_without_passthrough() {
        let steps = vec![
            Timestep::new(
                Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap(),
                100.0,
                SignalDelta::Enter,
            ),
            Timestep::new(
                Utc.with_ymd_and_hms(2023, 1, 4, 0, 0, 0).unwrap(),
                101.0,
                SignalDelta::Hold,
            ),
        ];
        let series = PriceSignalSeries::new(steps).unwrap();
        let result = Engine::with_defaults().run(&series).unwrap();
        let exporter = Exporter::new(&series, &result).unwrap();
        let csv = render(&exporter);

        assert!(csv.starts_with("Date,Close,Position,Balance,Daily_Return\n"));
        assert!(csv.contains("2023-01-03,100.0000,1,10000.0000,\n"));
        assert!(csv.contains("2023-01-04,101.0000,0,10010.0000,0.001000\n"));
    }

    #[test]
    fn test_exporter_rejects_mismatched_lengths() {
        let (series, _) = run(INPUT);
        let (_, other) = run("Date,Close,Position\n2023-01-03,100,0\n");
        assert!(Exporter::new(&series, &other).is_err());
    }

    #[test]
    fn test_rerun_on_output_overwrites_result_columns() {
        let (series, result) = run(INPUT);
        let first = render(&Exporter::new(&series, &result).unwrap());

        let (series, result) = run(&first);
        let second = render(&Exporter::new(&series, &result).unwrap());
        let lines: Vec<&str> = second.lines().collect();

        assert_eq!(lines[0], "Date,Close,RSI,Position,Balance,Daily_Return");
        let headers: Vec<&str> = lines[0].split(',').collect();
        for column in [BALANCE_COLUMN, DAILY_RETURN_COLUMN] {
            assert_eq!(headers.iter().filter(|h| **h == column).count(), 1);
        }
        assert_eq!(second, first);
    }

    #[test]
    fn test_existing_result_columns_are_replaced_in_place() {
        let input = "\
Date,Balance,Close,Position
2023-01-03,1.0,100.0,1
2023-01-04,2.0,110.0,0
";
        let (series, result) = run(input);
        let csv = render(&Exporter::new(&series, &result).unwrap());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Date,Balance,Close,Position,Daily_Return");
        assert_eq!(lines[1], "2023-01-03,10000.0000,100.0,1,");
        assert_eq!(lines[2], "2023-01-04,10100.0000,110.0,0,0.010000");
    }

    fn render_fills(exporter: &Exporter) -> String {
        let mut buf = Vec::new();
        exporter.write_fills_csv(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_fills_csv_uses_configured_delimiter() {
        let (series, result) = run(INPUT);
        let config = ExportConfig {
            delimiter: b';',
            ..Default::default()
        };
        let exporter = Exporter::with_config(&series, &result, config).unwrap();
        let csv = render_fills(&exporter);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "index;timestamp;side;quantity;price;reason;realized_pnl");
        assert_eq!(lines[2], "3;2023-01-06;SELL;10;103.0000;signal;30.0000");
    }

    #[test]
    fn test_fills_csv() {
        let (series, result) = run(INPUT);
        let exporter = Exporter::new(&series, &result).unwrap();
        let csv = render_fills(&exporter);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,2023-01-04,BUY,10,100.0000,entry,");
        assert_eq!(lines[2], "3,2023-01-06,SELL,10,103.0000,signal,30.0000");
    }

    #[test]
    fn test_export_files() {
        let (series, result) = run(INPUT);
        let exporter = Exporter::new(&series, &result).unwrap();

        let out = NamedTempFile::new().unwrap();
        exporter.export_backtest_csv(out.path()).unwrap();
        let content = std::fs::read_to_string(out.path()).unwrap();
        assert!(content.contains("Balance"));

        let fills = NamedTempFile::new().unwrap();
        exporter.export_fills_csv(fills.path()).unwrap();
        let content = std::fs::read_to_string(fills.path()).unwrap();
        assert!(content.starts_with("index,timestamp,side"));

        let summary = NamedTempFile::new().unwrap();
        exporter.export_summary_json(summary.path()).unwrap();
        let content = std::fs::read_to_string(summary.path()).unwrap();
        assert!(content.contains("sharpe_ratio"));
        assert!(content.contains("max_drawdown"));
        assert!(content.contains("\"take_profit_pct\""));
    }
}
