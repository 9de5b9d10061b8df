//! Time-ordered candle series and period aggregation.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::TickreplayError;
use crate::domain::ohlcv::Candle;

/// Candle granularity, ordered finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    Second,
    Minute,
    Minute15,
    Minute30,
    Hour,
    Hour2,
    Day,
    Week,
    Month,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Period::Second => "second",
            Period::Minute => "minute",
            Period::Minute15 => "15-minute",
            Period::Minute30 => "30-minute",
            Period::Hour => "hour",
            Period::Hour2 => "2-hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Period {
    type Err = TickreplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "second" | "sec" | "1s" => Ok(Period::Second),
            "minute" | "min" | "1m" => Ok(Period::Minute),
            "15min" | "15m" => Ok(Period::Minute15),
            "30min" | "30m" => Ok(Period::Minute30),
            "hour" | "1h" => Ok(Period::Hour),
            "2hour" | "2h" => Ok(Period::Hour2),
            "day" | "1d" => Ok(Period::Day),
            "week" | "1w" => Ok(Period::Week),
            "month" | "1mo" => Ok(Period::Month),
            other => Err(TickreplayError::parameter(format!(
                "unknown period '{other}'"
            ))),
        }
    }
}

/// Start of the calendar-aligned bucket containing `ts`.
///
/// Weeks start on Monday; months on the 1st.
pub fn bucket_start(ts: NaiveDateTime, period: Period) -> NaiveDateTime {
    let date = ts.date();
    match period {
        Period::Second => ts.with_nanosecond(0).unwrap(),
        Period::Minute => ts.with_second(0).unwrap().with_nanosecond(0).unwrap(),
        Period::Minute15 => {
            let m = ts.minute();
            ts.with_minute(m - m % 15)
                .unwrap()
                .with_second(0)
                .unwrap()
                .with_nanosecond(0)
                .unwrap()
        }
        Period::Minute30 => {
            let m = ts.minute();
            ts.with_minute(m - m % 30)
                .unwrap()
                .with_second(0)
                .unwrap()
                .with_nanosecond(0)
                .unwrap()
        }
        Period::Hour => date.and_hms_opt(ts.hour(), 0, 0).unwrap(),
        Period::Hour2 => {
            let h = ts.hour();
            date.and_hms_opt(h - h % 2, 0, 0).unwrap()
        }
        Period::Day => date.and_hms_opt(0, 0, 0).unwrap(),
        Period::Week => {
            let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
            monday.and_hms_opt(0, 0, 0).unwrap()
        }
        Period::Month => date.with_day(1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
    }
}

/// Immutable, strictly time-ordered candle sequence for one symbol.
#[derive(Debug, Clone)]
pub struct Series {
    symbol: String,
    candles: Vec<Candle>,
    time_index: HashMap<NaiveDateTime, usize>,
}

impl Series {
    /// Build a series, rejecting out-of-order or duplicate timestamps.
    pub fn new(symbol: impl Into<String>, candles: Vec<Candle>) -> Result<Self, TickreplayError> {
        let symbol = symbol.into();
        for pair in candles.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(TickreplayError::parameter(format!(
                    "{symbol}: candles must be strictly increasing, violated at {}",
                    pair[1].timestamp
                )));
            }
        }
        let time_index = candles
            .iter()
            .enumerate()
            .map(|(i, c)| (c.timestamp, i))
            .collect();
        Ok(Series {
            symbol,
            candles,
            time_index,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candle(&self, index: usize) -> &Candle {
        &self.candles[index]
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Local index of the candle at exactly `ts`, if any.
    pub fn index_at(&self, ts: NaiveDateTime) -> Option<usize> {
        self.time_index.get(&ts).copied()
    }
}

/// Aggregate a finer-period series into a strictly coarser one.
///
/// Each output candle covers one calendar-aligned bucket of `to`: open from
/// the first source candle, close from the last, high/low are extremes,
/// volume is summed. Buckets without source candles produce nothing.
pub fn resample(series: &Series, from: Period, to: Period) -> Result<Series, TickreplayError> {
    if to <= from {
        return Err(TickreplayError::InvalidPeriod { from, to });
    }

    let mut out: Vec<Candle> = Vec::new();
    for candle in series.candles() {
        let start = bucket_start(candle.timestamp, to);
        let extends_last = out.last().is_some_and(|b| b.timestamp == start);
        if extends_last {
            if let Some(bucket) = out.last_mut() {
                bucket.high = bucket.high.max(candle.high);
                bucket.low = bucket.low.min(candle.low);
                bucket.close = candle.close;
                bucket.volume += candle.volume;
            }
        } else {
            out.push(Candle {
                timestamp: start,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
            });
        }
    }

    Series::new(series.symbol().to_string(), out)
}
