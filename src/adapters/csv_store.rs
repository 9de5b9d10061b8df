//! CSV file data adapter.
//!
//! One file per symbol under a base directory, named `{SYMBOL}.csv` with
//! columns `timestamp,open,high,low,close,volume`. Timestamps accept
//! `%Y-%m-%d %H:%M:%S` or a bare `%Y-%m-%d` (read as midnight).

use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::error::TickreplayError;
use crate::domain::ohlcv::Candle;
use crate::domain::series::Series;
use crate::ports::data_port::DataPort;

pub struct CsvStore {
    base_path: PathBuf,
}

impl CsvStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}.csv"))
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(ts);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn field<'a>(
    record: &'a csv::StringRecord,
    column: usize,
    name: &str,
    symbol: &str,
) -> Result<&'a str, TickreplayError> {
    record.get(column).ok_or_else(|| TickreplayError::Data {
        symbol: symbol.to_string(),
        reason: format!("missing {name} column"),
    })
}

fn numeric<T: std::str::FromStr>(
    text: &str,
    name: &str,
    symbol: &str,
) -> Result<T, TickreplayError> {
    text.parse().map_err(|_| TickreplayError::Data {
        symbol: symbol.to_string(),
        reason: format!("invalid {name} value '{text}'"),
    })
}

/// Parse one CSV file into a series. Rows are sorted by timestamp before
/// series construction, which still rejects duplicates.
pub fn read_series_file(path: &Path, symbol: &str) -> Result<Series, TickreplayError> {
    let content = fs::read_to_string(path).map_err(|e| TickreplayError::Data {
        symbol: symbol.to_string(),
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut candles = Vec::new();

    for result in rdr.records() {
        let record = result.map_err(|e| TickreplayError::Data {
            symbol: symbol.to_string(),
            reason: format!("CSV parse error: {e}"),
        })?;

        let ts_str = field(&record, 0, "timestamp", symbol)?;
        let timestamp = parse_timestamp(ts_str).ok_or_else(|| TickreplayError::Data {
            symbol: symbol.to_string(),
            reason: format!("invalid timestamp '{ts_str}'"),
        })?;

        let open: f64 = numeric(field(&record, 1, "open", symbol)?, "open", symbol)?;
        let high: f64 = numeric(field(&record, 2, "high", symbol)?, "high", symbol)?;
        let low: f64 = numeric(field(&record, 3, "low", symbol)?, "low", symbol)?;
        let close: f64 = numeric(field(&record, 4, "close", symbol)?, "close", symbol)?;
        let volume: i64 = numeric(field(&record, 5, "volume", symbol)?, "volume", symbol)?;

        candles.push(Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    candles.sort_by_key(|c| c.timestamp);
    Series::new(symbol, candles)
}

impl DataPort for CsvStore {
    fn fetch_series(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Series, TickreplayError> {
        let path = self.csv_path(symbol);
        if !path.exists() {
            return Err(TickreplayError::NoData {
                symbol: symbol.to_string(),
            });
        }
        let series = read_series_file(&path, symbol)?;

        let filtered: Vec<Candle> = series
            .candles()
            .iter()
            .filter(|c| {
                start.is_none_or(|s| c.timestamp >= s) && end.is_none_or(|e| c.timestamp <= e)
            })
            .cloned()
            .collect();
        Series::new(symbol, filtered)
    }

    fn list_symbols(&self) -> Result<Vec<String>, TickreplayError> {
        let entries = fs::read_dir(&self.base_path)?;
        let mut symbols = Vec::new();

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(symbol) = name_str.strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
