//! Loading price/signal tables from CSV.
//!
//! The input is a date-indexed table with at least a `Close` and a
//! `Position` column. Every column, including ones the backtester does not
//! read, is kept so it can be written back next to the results.

use crate::error::{BacktestError, Result};
use crate::types::{Passthrough, PriceSignalSeries, SignalDelta, Timestep};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const DATE_ALIASES: &[&str] = &[
    "Date", "date", "DATE", "Datetime", "datetime", "Timestamp", "timestamp", "Time", "time",
];
const CLOSE_ALIASES: &[&str] = &["Close", "close", "CLOSE", "Adj Close", "adj_close"];
const POSITION_ALIASES: &[&str] = &["Position", "position", "POSITION"];

/// Input table configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string tried before the built-in formats.
    pub date_format: Option<String>,
    /// CSV delimiter.
    pub delimiter: u8,
    /// Name of the date column. Defaults to a known alias or the first column.
    pub date_column: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: b',',
            date_column: None,
        }
    }
}

/// Positions of the columns the backtester reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    date: usize,
    close: usize,
    position: usize,
}

fn find_column(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h.trim() == *alias))
}

fn resolve_columns(headers: &StringRecord, config: &DataConfig) -> Result<ColumnMap> {
    let date = match &config.date_column {
        Some(name) => headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| {
                BacktestError::InvalidInput(format!("date column '{}' not found", name))
            })?,
        None => find_column(headers, DATE_ALIASES).unwrap_or(0),
    };

    let close = find_column(headers, CLOSE_ALIASES).ok_or_else(|| {
        BacktestError::InvalidInput("missing required column 'Close'".to_string())
    })?;
    let position = find_column(headers, POSITION_ALIASES).ok_or_else(|| {
        BacktestError::InvalidInput("missing required column 'Position'".to_string())
    })?;

    Ok(ColumnMap {
        date,
        close,
        position,
    })
}

/// Parse a date string with multiple format attempts.
pub fn parse_datetime(s: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)));
        }
    }

    // Offset-aware timestamps, e.g. "2023-01-03 00:00:00-05:00".
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%b-%Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)));
        }
    }

    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(BacktestError::InvalidInput(format!(
        "could not parse date: '{}'",
        s
    )))
}

/// Parse a `Position` cell.
///
/// Blank cells and `NaN` read as hold: a signal differenced from the
/// previous row has no value on the first row.
pub fn parse_signal(cell: &str) -> Option<SignalDelta> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Some(SignalDelta::Hold);
    }
    cell.parse::<f64>().ok().and_then(SignalDelta::from_value)
}

fn field<'a>(record: &'a StringRecord, index: usize, row: usize, name: &str) -> Result<&'a str> {
    record.get(index).ok_or_else(|| {
        BacktestError::InvalidInput(format!("row {}: missing '{}' field", row, name))
    })
}

fn parse_row(
    record: &StringRecord,
    row: usize,
    columns: ColumnMap,
    config: &DataConfig,
) -> Result<Timestep> {
    let date = field(record, columns.date, row, "date")?;
    let timestamp = parse_datetime(date, config.date_format.as_deref())
        .map_err(|e| BacktestError::InvalidInput(format!("row {}: {}", row, e)))?;

    let close_cell = field(record, columns.close, row, "Close")?;
    let close: f64 = close_cell.trim().parse().map_err(|_| {
        BacktestError::InvalidInput(format!("row {}: invalid Close value '{}'", row, close_cell))
    })?;

    let position_cell = field(record, columns.position, row, "Position")?;
    let delta = parse_signal(position_cell).ok_or_else(|| {
        BacktestError::InvalidInput(format!(
            "row {}: Position must be -1, 0 or 1, got '{}'",
            row, position_cell
        ))
    })?;

    Ok(Timestep::new(timestamp, close, delta))
}

/// Read a price/signal table from any reader.
pub fn read_series<R: Read>(reader: R, config: &DataConfig) -> Result<PriceSignalSeries> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let columns = resolve_columns(&headers, config)?;
    debug!("Resolved columns: {:?}", columns);

    let mut steps = Vec::new();
    let mut records = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let record = result?;
        steps.push(parse_row(&record, row, columns, config)?);
        records.push(record);
    }

    if steps.is_empty() {
        return Err(BacktestError::InvalidInput(
            "input table has no data rows".to_string(),
        ));
    }

    PriceSignalSeries::new(steps)?.with_passthrough(Passthrough { headers, records })
}

/// Parse a price/signal table held in memory.
pub fn parse_csv_str(content: &str, config: &DataConfig) -> Result<PriceSignalSeries> {
    read_series(content.as_bytes(), config)
}

/// Load a price/signal table from a CSV file.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<PriceSignalSeries> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let series = read_series(File::open(path)?, config)?;

    info!(
        "Loaded {} rows from {} to {}",
        series.len(),
        series.first_timestamp(),
        series.last_timestamp()
    );

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
Date,Close,Short_MA,Long_MA,Signal,Position
2023-01-03,100.0,100.0,100.0,0,
2023-01-04,101.5,100.7,100.7,1,1.0
2023-01-05,99.0,100.2,100.2,1,0.0
2023-01-06,104.0,101.1,101.1,0,-1.0
";

    #[test]
    fn test_parse_sample() {
        let series = parse_csv_str(SAMPLE, &DataConfig::default()).unwrap();
        assert_eq!(series.len(), 4);
        let deltas: Vec<_> = series.steps().iter().map(|s| s.delta).collect();
        assert_eq!(
            deltas,
            vec![
                SignalDelta::Hold,
                SignalDelta::Enter,
                SignalDelta::Hold,
                SignalDelta::Exit
            ]
        );
        assert_eq!(series.closes(), vec![100.0, 101.5, 99.0, 104.0]);
        assert_eq!(series.first_timestamp().day(), 3);

        let passthrough = series.passthrough().unwrap();
        assert_eq!(passthrough.headers.len(), 6);
        assert_eq!(&passthrough.records[1][2], "100.7");
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("1"), Some(SignalDelta::Enter));
        assert_eq!(parse_signal(" -1.0 "), Some(SignalDelta::Exit));
        assert_eq!(parse_signal("0.0"), Some(SignalDelta::Hold));
        assert_eq!(parse_signal(""), Some(SignalDelta::Hold));
        assert_eq!(parse_signal("NaN"), Some(SignalDelta::Hold));
        assert_eq!(parse_signal("2.0"), None);
        assert_eq!(parse_signal("-2"), None);
        assert_eq!(parse_signal("buy"), None);
    }

    #[test]
    fn test_out_of_range_signal_rejected() {
        let csv = "Date,Close,Position\n2023-01-03,100,0\n2023-01-04,101,2.0\n";
        let err = parse_csv_str(csv, &DataConfig::default()).unwrap_err();
        match err {
            BacktestError::InvalidInput(msg) => assert!(msg.contains("row 2")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_columns_rejected() {
        let csv = "Date,Close\n2023-01-03,100\n";
        assert!(matches!(
            parse_csv_str(csv, &DataConfig::default()),
            Err(BacktestError::InvalidInput(_))
        ));

        let csv = "Date,Open,Position\n2023-01-03,100,0\n";
        assert!(matches!(
            parse_csv_str(csv, &DataConfig::default()),
            Err(BacktestError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_table_rejected() {
        let csv = "Date,Close,Position\n";
        assert!(matches!(
            parse_csv_str(csv, &DataConfig::default()),
            Err(BacktestError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let csv = "Date,Close,Position\n2023-01-03,0,0\n";
        assert!(matches!(
            parse_csv_str(csv, &DataConfig::default()),
            Err(BacktestError::InvalidInput(_))
        ));
        let csv = "Date,Close,Position\n2023-01-03,abc,0\n";
        assert!(matches!(
            parse_csv_str(csv, &DataConfig::default()),
            Err(BacktestError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unordered_dates_rejected() {
        let csv = "Date,Close,Position\n2023-01-04,100,0\n2023-01-03,101,0\n";
        assert!(matches!(
            parse_csv_str(csv, &DataConfig::default()),
            Err(BacktestError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_adj_close_alias_and_unnamed_index() {
        let csv = ",Adj Close,Position\n2023-01-03,100,0\n2023-01-04,101,1\n";
        let series = parse_csv_str(csv, &DataConfig::default()).unwrap();
        assert_eq!(series.closes(), vec![100.0, 101.0]);
    }

    #[test]
    fn test_close_preferred_over_adj_close() {
        let csv = "Date,Adj Close,Close,Position\n2023-01-03,99,100,0\n";
        let series = parse_csv_str(csv, &DataConfig::default()).unwrap();
        assert_eq!(series.closes(), vec![100.0]);
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap();
        assert_eq!(parse_datetime("2023-01-03", None).unwrap(), expected);
        assert_eq!(parse_datetime("2023-01-03 00:00:00", None).unwrap(), expected);
        assert_eq!(parse_datetime("2023/01/03", None).unwrap(), expected);
        assert_eq!(parse_datetime("01/03/2023", None).unwrap(), expected);
        assert_eq!(
            parse_datetime("2023-01-03 00:00:00-05:00", None).unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 3, 5, 0, 0).unwrap()
        );
        assert_eq!(
            parse_datetime("03.01.2023", Some("%d.%m.%Y")).unwrap(),
            expected
        );
        assert!(parse_datetime("not a date", None).is_err());
    }

    #[test]
    fn test_semicolon_delimiter() {
        let csv = "Date;Close;Position\n2023-01-03;100;1\n";
        let config = DataConfig {
            delimiter: b';',
            ..Default::default()
        };
        let series = parse_csv_str(csv, &config).unwrap();
        assert_eq!(series.steps()[0].delta, SignalDelta::Enter);
    }

    #[test]
    fn test_explicit_date_column() {
        let csv = "Close,Position,When\n100,0,2023-01-03\n";
        let config = DataConfig {
            date_column: Some("When".to_string()),
            ..Default::default()
        };
        let series = parse_csv_str(csv, &config).unwrap();
        assert_eq!(series.first_timestamp().day(), 3);

        let config = DataConfig {
            date_column: Some("Missing".to_string()),
            ..Default::default()
        };
        assert!(parse_csv_str(csv, &config).is_err());
    }

    #[test]
    fn test_load_csv_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();
        let series = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(series.len(), 4);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_csv("/nonexistent/strategy_output.csv", &DataConfig::default());
        assert!(matches!(result, Err(BacktestError::IoError(_))));
    }
}
