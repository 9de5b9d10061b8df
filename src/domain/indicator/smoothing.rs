//! Exponential-smoothing indicator strategy.
//!
//! `out[seed] = seed_value(seed)`; for `i > seed`:
//! `out[i] = alpha(i) * raw(i) + (1 - alpha(i)) * out[i-1]`. The smoothing
//! factor is a function of the index, so adaptive schemes fit the same shape.

use std::rc::Rc;

use crate::domain::error::TickreplayError;
use crate::domain::indicator::{ForwardCache, Indicator};
use crate::domain::series::Series;
use crate::domain::tick::Tick;

pub struct SmoothedIndicator {
    series: Rc<Series>,
    seed_index: usize,
    seed: Box<dyn Fn(&Series, usize) -> f64>,
    raw: Box<dyn Fn(&Series, usize) -> f64>,
    alpha: Box<dyn Fn(usize) -> f64>,
    cache: ForwardCache,
}

impl SmoothedIndicator {
    pub fn new(
        series: Rc<Series>,
        seed_index: usize,
        seed: impl Fn(&Series, usize) -> f64 + 'static,
        raw: impl Fn(&Series, usize) -> f64 + 'static,
        alpha: impl Fn(usize) -> f64 + 'static,
    ) -> Self {
        let cache = ForwardCache::new(series.len());
        SmoothedIndicator {
            series,
            seed_index,
            seed: Box::new(seed),
            raw: Box::new(raw),
            alpha: Box::new(alpha),
            cache,
        }
    }

    /// Fixed smoothing factor; rejects factors outside `(0, 1]`.
    pub fn with_constant_alpha(
        series: Rc<Series>,
        seed_index: usize,
        seed: impl Fn(&Series, usize) -> f64 + 'static,
        raw: impl Fn(&Series, usize) -> f64 + 'static,
        alpha: f64,
    ) -> Result<Self, TickreplayError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(TickreplayError::parameter(format!(
                "smoothing factor must be in (0, 1], got {alpha}"
            )));
        }
        Ok(Self::new(series, seed_index, seed, raw, move |_| alpha))
    }
}

impl Indicator for SmoothedIndicator {
    fn len(&self) -> usize {
        self.series.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let timestamp = self.series.candle(index).timestamp;
        let value = self.cache.get_or_fill(index, |i, prev| {
            if i < self.seed_index {
                None
            } else if i == self.seed_index {
                Some((self.seed)(&self.series, i))
            } else {
                prev.map(|p| {
                    let a = (self.alpha)(i);
                    a * (self.raw)(&self.series, i) + (1.0 - a) * p
                })
            }
        });
        Tick { timestamp, value }
    }
}

fn check_periods(periods: usize) -> Result<(), TickreplayError> {
    if periods == 0 {
        Err(TickreplayError::parameter(
            "smoothing period must be positive",
        ))
    } else {
        Ok(())
    }
}

/// Exponential moving average: k = 2/(n+1), seeded with the first SMA.
pub fn ema(series: Rc<Series>, periods: usize) -> Result<SmoothedIndicator, TickreplayError> {
    check_periods(periods)?;
    let k = 2.0 / (periods as f64 + 1.0);
    SmoothedIndicator::with_constant_alpha(
        series,
        periods - 1,
        move |series, i| {
            series.candles()[..=i].iter().map(|c| c.close).sum::<f64>() / periods as f64
        },
        |series, i| series.candle(i).close,
        k,
    )
}

fn true_range_at(series: &Series, i: usize) -> f64 {
    if i == 0 {
        let c = series.candle(0);
        c.high - c.low
    } else {
        series.candle(i).true_range(series.candle(i - 1).close)
    }
}

/// Average true range with Wilder smoothing, seeded by the first-window mean.
pub fn atr(series: Rc<Series>, periods: usize) -> Result<SmoothedIndicator, TickreplayError> {
    check_periods(periods)?;
    SmoothedIndicator::with_constant_alpha(
        series,
        periods - 1,
        move |series, i| {
            (0..=i).map(|j| true_range_at(series, j)).sum::<f64>() / periods as f64
        },
        |series, i| true_range_at(series, i),
        1.0 / periods as f64,
    )
}

fn gain_at(series: &Series, i: usize) -> f64 {
    (series.candle(i).close - series.candle(i - 1).close).max(0.0)
}

fn loss_at(series: &Series, i: usize) -> f64 {
    (series.candle(i - 1).close - series.candle(i).close).max(0.0)
}

/// Relative strength index (Wilder). Built from two smoothed recurrences,
/// one over gains and one over losses; both share the caching machinery.
pub struct Rsi {
    avg_gain: SmoothedIndicator,
    avg_loss: SmoothedIndicator,
}

pub fn rsi(series: Rc<Series>, periods: usize) -> Result<Rsi, TickreplayError> {
    check_periods(periods)?;
    let n = periods as f64;
    let avg_gain = SmoothedIndicator::with_constant_alpha(
        series.clone(),
        periods,
        move |series, i| (i + 1 - periods..=i).map(|j| gain_at(series, j)).sum::<f64>() / n,
        |series, i| gain_at(series, i),
        1.0 / n,
    )?;
    let avg_loss = SmoothedIndicator::with_constant_alpha(
        series,
        periods,
        move |series, i| (i + 1 - periods..=i).map(|j| loss_at(series, j)).sum::<f64>() / n,
        |series, i| loss_at(series, i),
        1.0 / n,
    )?;
    Ok(Rsi { avg_gain, avg_loss })
}

impl Indicator for Rsi {
    fn len(&self) -> usize {
        self.avg_gain.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let gain = self.avg_gain.value_at(index);
        let loss = self.avg_loss.value_at(index);
        let value = match (gain.value, loss.value) {
            (Some(g), Some(l)) => {
                if l == 0.0 {
                    Some(100.0)
                } else {
                    Some(100.0 - 100.0 / (1.0 + g / l))
                }
            }
            _ => None,
        };
        Tick {
            timestamp: gain.timestamp,
            value,
        }
    }
}
