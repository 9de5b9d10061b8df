//! Stateless-window indicator strategy.
//!
//! `value_at(i)` applies a pure function to the raw candles in the window
//! ending at `i`; outputs never depend on earlier outputs. The first
//! `periods - 1` ticks are absent.

use std::rc::Rc;

use crate::domain::error::TickreplayError;
use crate::domain::indicator::{ForwardCache, Indicator};
use crate::domain::ohlcv::Candle;
use crate::domain::series::Series;
use crate::domain::tick::Tick;

pub struct WindowIndicator {
    series: Rc<Series>,
    periods: usize,
    compute: Box<dyn Fn(&[Candle]) -> f64>,
    cache: ForwardCache,
}

impl WindowIndicator {
    pub fn new(
        series: Rc<Series>,
        periods: usize,
        compute: impl Fn(&[Candle]) -> f64 + 'static,
    ) -> Result<Self, TickreplayError> {
        if periods == 0 {
            return Err(TickreplayError::parameter(
                "window length must be positive",
            ));
        }
        let cache = ForwardCache::new(series.len());
        Ok(WindowIndicator {
            series,
            periods,
            compute: Box::new(compute),
            cache,
        })
    }
}

impl Indicator for WindowIndicator {
    fn len(&self) -> usize {
        self.series.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let timestamp = self.series.candle(index).timestamp;
        let value = self.cache.get_or_fill(index, |i, _| {
            if i + 1 < self.periods {
                None
            } else {
                let window = &self.series.candles()[i + 1 - self.periods..=i];
                Some((self.compute)(window))
            }
        });
        Tick { timestamp, value }
    }
}

/// Simple moving average of closes.
pub fn sma(series: Rc<Series>, periods: usize) -> Result<WindowIndicator, TickreplayError> {
    WindowIndicator::new(series, periods, move |window| {
        window.iter().map(|c| c.close).sum::<f64>() / window.len() as f64
    })
}

/// Linearly weighted moving average of closes; the most recent candle gets
/// weight `periods`.
pub fn wma(series: Rc<Series>, periods: usize) -> Result<WindowIndicator, TickreplayError> {
    let denominator = (periods * (periods + 1)) as f64 / 2.0;
    WindowIndicator::new(series, periods, move |window| {
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(j, c)| c.close * (j + 1) as f64)
            .sum();
        weighted / denominator
    })
}

/// Population standard deviation of closes over the window.
pub fn stddev(series: Rc<Series>, periods: usize) -> Result<WindowIndicator, TickreplayError> {
    WindowIndicator::new(series, periods, move |window| {
        let n = window.len() as f64;
        let mean = window.iter().map(|c| c.close).sum::<f64>() / n;
        let variance = window
            .iter()
            .map(|c| {
                let diff = c.close - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        variance.sqrt()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_series;

    #[test]
    fn window_warmup_is_absent() {
        let series = make_series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let ind = sma(series, 3).unwrap();

        assert!(!ind.value_at(0).is_present());
        assert!(!ind.value_at(1).is_present());
        assert!(ind.value_at(2).is_present());
    }

    #[test]
    fn sma_basic() {
        let series = make_series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let ind = sma(series, 3).unwrap();

        assert_eq!(ind.value_at(2).value, Some(2.0));
        assert_eq!(ind.value_at(3).value, Some(3.0));
        assert_eq!(ind.value_at(4).value, Some(4.0));
    }

    #[test]
    fn sma_out_of_order_access() {
        let series = make_series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let ind = sma(series, 3).unwrap();

        // Jump to the end first, then read earlier indices from the cache.
        assert_eq!(ind.value_at(4).value, Some(4.0));
        assert_eq!(ind.value_at(2).value, Some(2.0));
        assert_eq!(ind.value_at(0).value, None);
    }

    #[test]
    fn sma_window_one_is_close() {
        let series = make_series(&[10.0, 20.0, 30.0]);
        let ind = sma(series, 1).unwrap();
        assert_eq!(ind.value_at(0).value, Some(10.0));
        assert_eq!(ind.value_at(2).value, Some(30.0));
    }

    #[test]
    fn zero_periods_rejected() {
        let series = make_series(&[1.0, 2.0]);
        assert!(matches!(
            sma(series, 0),
            Err(TickreplayError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn wma_weights_recent_candles() {
        let series = make_series(&[10.0, 20.0, 30.0]);
        let ind = wma(series, 3).unwrap();

        // (10*1 + 20*2 + 30*3) / 6 = 140/6
        let expected = 140.0 / 6.0;
        assert!((ind.value_at(2).value.unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn stddev_constant_closes_is_zero() {
        let series = make_series(&[100.0, 100.0, 100.0, 100.0]);
        let ind = stddev(series, 3).unwrap();
        assert_eq!(ind.value_at(3).value, Some(0.0));
    }

    #[test]
    fn stddev_population() {
        let series = make_series(&[10.0, 20.0, 30.0]);
        let ind = stddev(series, 3).unwrap();

        let mean = 20.0;
        let variance = ((10.0_f64 - mean).powi(2)
            + (20.0_f64 - mean).powi(2)
            + (30.0_f64 - mean).powi(2))
            / 3.0;
        let expected = variance.sqrt();
        assert!((ind.value_at(2).value.unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn window_longer_than_series_is_all_absent() {
        let series = make_series(&[1.0, 2.0]);
        let ind = sma(series, 5).unwrap();
        assert!(!ind.value_at(0).is_present());
        assert!(!ind.value_at(1).is_present());
    }
}
