//! Data access port trait.
//!
//! The import boundary: whatever produces a series must hand the core a
//! strictly time-ordered, duplicate-free candle sequence. Import failures
//! surface as errors; the core performs no retries.

use chrono::NaiveDateTime;

use crate::domain::error::TickreplayError;
use crate::domain::series::Series;

pub trait DataPort {
    fn fetch_series(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Series, TickreplayError>;

    fn list_symbols(&self) -> Result<Vec<String>, TickreplayError>;
}
