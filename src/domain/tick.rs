//! Timestamped optional values produced by indicators and operations.

use chrono::NaiveDateTime;

/// One computed sample. `value` is `None` whenever insufficient history
/// exists at that index; downstream operations and rule leaves propagate the
/// absence instead of failing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
}

impl Tick {
    pub fn present(timestamp: NaiveDateTime, value: f64) -> Self {
        Tick {
            timestamp,
            value: Some(value),
        }
    }

    pub fn absent(timestamp: NaiveDateTime) -> Self {
        Tick {
            timestamp,
            value: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}
