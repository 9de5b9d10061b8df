//! Shared helpers for integration tests.

#![allow(dead_code)]

use chrono::{Days, NaiveDate, NaiveDateTime};
use std::collections::HashMap;

use tickreplay::domain::error::TickreplayError;
use tickreplay::domain::ohlcv::Candle;
use tickreplay::domain::series::Series;
use tickreplay::ports::data_port::DataPort;

pub fn day(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn hour(d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

pub fn make_candle(timestamp: NaiveDateTime, close: f64) -> Candle {
    Candle {
        timestamp,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000,
    }
}

/// Daily candles starting 2024-01-01.
pub fn make_series(symbol: &str, closes: &[f64]) -> Series {
    let start = day(1);
    let candles = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| make_candle(start + Days::new(i as u64), close))
        .collect();
    Series::new(symbol, candles).unwrap()
}

/// Candles at explicit (day, close) points.
pub fn make_sparse_series(symbol: &str, points: &[(u32, f64)]) -> Series {
    let candles = points
        .iter()
        .map(|&(d, close)| make_candle(day(d), close))
        .collect();
    Series::new(symbol, candles).unwrap()
}

pub struct MockDataPort {
    series: HashMap<String, Series>,
}

impl MockDataPort {
    pub fn new() -> Self {
        MockDataPort {
            series: HashMap::new(),
        }
    }

    pub fn with_series(mut self, series: Series) -> Self {
        self.series.insert(series.symbol().to_string(), series);
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_series(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Series, TickreplayError> {
        let series = self.series.get(symbol).ok_or_else(|| TickreplayError::NoData {
            symbol: symbol.to_string(),
        })?;
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
        let mut symbols: Vec<String> = self.series.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}
