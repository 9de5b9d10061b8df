//! Derived operations over any indicator output.
//!
//! Each operation is itself an [`Indicator`], so operations stack freely:
//! a `Delta` of a `RollingMean` of an `ema` is just nested values. Absent
//! inputs make the output absent; nothing here ever fails mid-computation.

use crate::domain::error::TickreplayError;
use crate::domain::indicator::Indicator;
use crate::domain::tick::Tick;

/// First difference: `v[i] - v[i-1]`.
pub struct Delta<S: Indicator> {
    inner: S,
}

impl<S: Indicator> Delta<S> {
    pub fn new(inner: S) -> Self {
        Delta { inner }
    }
}

impl<S: Indicator> Indicator for Delta<S> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let current = self.inner.value_at(index);
        if index == 0 {
            return Tick::absent(current.timestamp);
        }
        let value = match (current.value, self.inner.value_at(index - 1).value) {
            (Some(now), Some(prev)) => Some(now - prev),
            _ => None,
        };
        Tick {
            timestamp: current.timestamp,
            value,
        }
    }
}

/// Relative change in percent: `(v[i] - v[i-1]) / v[i-1] * 100`. Absent when
/// the previous value is absent or zero.
pub struct RateOfChange<S: Indicator> {
    inner: S,
}

impl<S: Indicator> RateOfChange<S> {
    pub fn new(inner: S) -> Self {
        RateOfChange { inner }
    }
}

impl<S: Indicator> Indicator for RateOfChange<S> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let current = self.inner.value_at(index);
        if index == 0 {
            return Tick::absent(current.timestamp);
        }
        let value = match (current.value, self.inner.value_at(index - 1).value) {
            (Some(now), Some(prev)) if prev != 0.0 => Some((now - prev) / prev * 100.0),
            _ => None,
        };
        Tick {
            timestamp: current.timestamp,
            value,
        }
    }
}

/// Collect the window of inner values ending at `index`, or `None` if the
/// window is incomplete or any member is absent.
fn window_values<S: Indicator>(inner: &S, window: usize, index: usize) -> Option<Vec<f64>> {
    if index + 1 < window {
        return None;
    }
    (index + 1 - window..=index)
        .map(|i| inner.value_at(i).value)
        .collect()
}

/// Arithmetic mean over a fixed trailing window of inner values.
pub struct RollingMean<S: Indicator> {
    inner: S,
    window: usize,
}

impl<S: Indicator> RollingMean<S> {
    pub fn new(inner: S, window: usize) -> Result<Self, TickreplayError> {
        if window == 0 {
            return Err(TickreplayError::parameter(
                "rolling window must be positive",
            ));
        }
        Ok(RollingMean { inner, window })
    }
}

impl<S: Indicator> Indicator for RollingMean<S> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let timestamp = self.inner.value_at(index).timestamp;
        let value = window_values(&self.inner, self.window, index)
            .map(|values| values.iter().sum::<f64>() / values.len() as f64);
        Tick { timestamp, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandSide {
    Upper,
    Lower,
}

/// Rolling mean ± `mult` population standard deviations.
pub struct RollingBand<S: Indicator> {
    inner: S,
    window: usize,
    mult: f64,
    side: BandSide,
}

impl<S: Indicator> RollingBand<S> {
    pub fn new(inner: S, window: usize, mult: f64, side: BandSide) -> Result<Self, TickreplayError> {
        if window == 0 {
            return Err(TickreplayError::parameter(
                "rolling window must be positive",
            ));
        }
        Ok(RollingBand {
            inner,
            window,
            mult,
            side,
        })
    }
}

impl<S: Indicator> Indicator for RollingBand<S> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn value_at(&self, index: usize) -> Tick {
        let timestamp = self.inner.value_at(index).timestamp;
        let value = window_values(&self.inner, self.window, index).map(|values| {
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values
                .iter()
                .map(|v| {
                    let diff = v - mean;
                    diff * diff
                })
                .sum::<f64>()
                / n;
            let offset = self.mult * variance.sqrt();
            match self.side {
                BandSide::Upper => mean + offset,
                BandSide::Lower => mean - offset,
            }
        });
        Tick { timestamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_series;
    use crate::domain::indicator::{sma, PriceField, PriceSeries};

    fn closes(values: &[f64]) -> PriceSeries {
        PriceSeries::new(make_series(values), PriceField::Close)
    }

    #[test]
    fn delta_basic() {
        let ind = Delta::new(closes(&[10.0, 12.0, 9.0]));
        assert_eq!(ind.value_at(0).value, None);
        assert_eq!(ind.value_at(1).value, Some(2.0));
        assert_eq!(ind.value_at(2).value, Some(-3.0));
    }

    #[test]
    fn delta_propagates_absence() {
        let series = make_series(&[1.0, 2.0, 3.0, 4.0]);
        let ind = Delta::new(sma(series, 3).unwrap());

        // sma(3) is absent at 0 and 1, so delta is absent through index 2.
        assert_eq!(ind.value_at(1).value, None);
        assert_eq!(ind.value_at(2).value, None);
        assert!(ind.value_at(3).is_present());
    }

    #[test]
    fn rate_of_change_percent() {
        let ind = RateOfChange::new(closes(&[100.0, 110.0, 99.0]));
        assert_eq!(ind.value_at(0).value, None);
        assert!((ind.value_at(1).value.unwrap() - 10.0).abs() < 1e-10);
        assert!((ind.value_at(2).value.unwrap() - (-10.0)).abs() < 1e-10);
    }

    #[test]
    fn rate_of_change_zero_base_is_absent() {
        let ind = RateOfChange::new(closes(&[0.0, 5.0]));
        assert_eq!(ind.value_at(1).value, None);
    }

    #[test]
    fn rolling_mean_over_closes() {
        let ind = RollingMean::new(closes(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3).unwrap();

        assert_eq!(ind.value_at(0).value, None);
        assert_eq!(ind.value_at(1).value, None);
        assert_eq!(ind.value_at(2).value, Some(2.0));
        assert_eq!(ind.value_at(3).value, Some(3.0));
        assert_eq!(ind.value_at(4).value, Some(4.0));
    }

    #[test]
    fn rolling_mean_zero_window_rejected() {
        let result = RollingMean::new(closes(&[1.0]), 0);
        assert!(matches!(
            result,
            Err(TickreplayError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn operations_compose() {
        // delta(rolling_mean(3))[i] == rolling_mean(3)[i] - rolling_mean(3)[i-1]
        let mean = RollingMean::new(closes(&[1.0, 2.0, 4.0, 7.0, 11.0]), 3).unwrap();
        let also_mean = RollingMean::new(closes(&[1.0, 2.0, 4.0, 7.0, 11.0]), 3).unwrap();
        let delta = Delta::new(mean);

        for i in 3..5 {
            let expected =
                also_mean.value_at(i).value.unwrap() - also_mean.value_at(i - 1).value.unwrap();
            assert!((delta.value_at(i).value.unwrap() - expected).abs() < 1e-10);
        }
        // First defined mean has no predecessor mean.
        assert_eq!(delta.value_at(2).value, None);
    }

    #[test]
    fn band_brackets_the_mean() {
        let data = [10.0, 12.0, 11.0, 14.0, 13.0];
        let upper = RollingBand::new(closes(&data), 3, 2.0, BandSide::Upper).unwrap();
        let lower = RollingBand::new(closes(&data), 3, 2.0, BandSide::Lower).unwrap();
        let mean = RollingMean::new(closes(&data), 3).unwrap();

        for i in 2..5 {
            let m = mean.value_at(i).value.unwrap();
            let u = upper.value_at(i).value.unwrap();
            let l = lower.value_at(i).value.unwrap();
            assert!(u >= m && m >= l);
            // Symmetric around the mean.
            assert!(((u - m) - (m - l)).abs() < 1e-10);
        }
    }

    #[test]
    fn band_on_constant_input_collapses_to_mean() {
        let upper = RollingBand::new(closes(&[5.0, 5.0, 5.0]), 3, 2.0, BandSide::Upper).unwrap();
        assert_eq!(upper.value_at(2).value, Some(5.0));
    }
}
