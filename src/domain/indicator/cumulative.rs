//! Cumulative-recurrence indicator strategy.
//!
//! Output at the initial index comes from a seed function; every later
//! output is `step(prev, i)`. Indices before the initial index are absent
//! unless a constant warmup value is supplied.

use std::rc::Rc;

use crate::domain::indicator::{ForwardCache, Indicator};
use crate::domain::series::Series;
use crate::domain::tick::Tick;

pub struct CumulativeIndicator {
    series: Rc<Series>,
    initial_index: usize,
    seed: Box<dyn Fn(&Series, usize) -> f64>,
    step: Box<dyn Fn(&Series, f64, usize) -> f64>,
    warmup: Option<f64>,
    cache: ForwardCache,
}

impl CumulativeIndicator {
    pub fn new(
        series: Rc<Series>,
        initial_index: usize,
        seed: impl Fn(&Series, usize) -> f64 + 'static,
        step: impl Fn(&Series, f64, usize) -> f64 + 'static,
    ) -> Self {
        let cache = ForwardCache::new(series.len());
        CumulativeIndicator {
            series,
            initial_index,
            seed: Box::new(seed),
            step: Box::new(step),
            warmup: None,
            cache,
        }
    }

    /// Replace the absent pre-seed ticks with a constant value.
    pub fn with_warmup(mut self, value: f64) -> Self {
        self.warmup = Some(value);
        self
    }
}

impl Indicator for CumulativeIndicator {
    fn len(&self) -> usize {
        self.series.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let timestamp = self.series.candle(index).timestamp;
        let value = self.cache.get_or_fill(index, |i, prev| {
            if i < self.initial_index {
                self.warmup
            } else if i == self.initial_index {
                Some((self.seed)(&self.series, i))
            } else {
                prev.map(|p| (self.step)(&self.series, p, i))
            }
        });
        Tick { timestamp, value }
    }
}

/// On-balance volume: running volume total signed by the close-to-close move.
pub fn obv(series: Rc<Series>) -> CumulativeIndicator {
    CumulativeIndicator::new(
        series,
        0,
        |_, _| 0.0,
        |series, prev, i| {
            let delta = series.candle(i).close - series.candle(i - 1).close;
            let volume = series.candle(i).volume as f64;
            if delta > 0.0 {
                prev + volume
            } else if delta < 0.0 {
                prev - volume
            } else {
                prev
            }
        },
    )
}
