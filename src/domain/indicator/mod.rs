//! Indicator computation engine.
//!
//! Every indicator exposes one capability: [`Indicator::value_at`], returning
//! a [`Tick`] aligned 1:1 with the bound series. Three recurrence strategies
//! implement it: [`WindowIndicator`] (stateless window),
//! [`CumulativeIndicator`] (seed + left-to-right recurrence) and
//! [`SmoothedIndicator`] (exponential smoothing with a per-index factor).
//! All three share the same lazy forward-fill cache: the first access at
//! index `i` materializes everything up to `i` in a single pass, later
//! accesses are O(1), and out-of-order access resumes from the highest
//! cached index.

pub mod cumulative;
pub mod smoothing;
pub mod window;

pub use cumulative::{obv, CumulativeIndicator};
pub use smoothing::{atr, ema, rsi, Rsi, SmoothedIndicator};
pub use window::{sma, stddev, wma, WindowIndicator};

use std::cell::RefCell;
use std::rc::Rc;

use crate::domain::series::Series;
use crate::domain::tick::Tick;

/// A lazily-materialized, randomly-indexable tick sequence bound to a series.
pub trait Indicator {
    fn len(&self) -> usize;

    /// The tick at `index`. Panics if `index >= len()`; an in-range tick with
    /// insufficient history carries an absent value instead.
    fn value_at(&self, index: usize) -> Tick;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Indicator + ?Sized> Indicator for Rc<T> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn value_at(&self, index: usize) -> Tick {
        (**self).value_at(index)
    }
}

impl<T: Indicator + ?Sized> Indicator for &T {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn value_at(&self, index: usize) -> Tick {
        (**self).value_at(index)
    }
}

/// Shared forward-fill cache. Values are computed strictly left-to-right;
/// a request beyond the filled prefix extends it, never recomputing earlier
/// indices.
pub(crate) struct ForwardCache {
    values: RefCell<Vec<Option<f64>>>,
}

impl ForwardCache {
    pub(crate) fn new(capacity: usize) -> Self {
        ForwardCache {
            values: RefCell::new(Vec::with_capacity(capacity)),
        }
    }

    /// Value at `index`, extending the filled prefix as needed. `step`
    /// receives the index being filled and the previous output.
    pub(crate) fn get_or_fill(
        &self,
        index: usize,
        mut step: impl FnMut(usize, Option<f64>) -> Option<f64>,
    ) -> Option<f64> {
        let mut values = self.values.borrow_mut();
        while values.len() <= index {
            let i = values.len();
            let prev = if i == 0 { None } else { values[i - 1] };
            let next = step(i, prev);
            values.push(next);
        }
        values[index]
    }

    #[cfg(test)]
    pub(crate) fn filled(&self) -> usize {
        self.values.borrow().len()
    }
}

/// Raw candle field exposed through the indicator capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl PriceField {
    fn extract(&self, series: &Series, index: usize) -> f64 {
        let candle = series.candle(index);
        match self {
            PriceField::Open => candle.open,
            PriceField::High => candle.high,
            PriceField::Low => candle.low,
            PriceField::Close => candle.close,
            PriceField::Volume => candle.volume as f64,
        }
    }
}

/// A price field viewed as an indicator; every tick is present.
#[derive(Clone)]
pub struct PriceSeries {
    series: Rc<Series>,
    field: PriceField,
}

impl PriceSeries {
    pub fn new(series: Rc<Series>, field: PriceField) -> Self {
        PriceSeries { series, field }
    }
}

impl Indicator for PriceSeries {
    fn len(&self) -> usize {
        self.series.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        Tick::present(
            self.series.candle(index).timestamp,
            self.field.extract(&self.series, index),
        )
    }
}
