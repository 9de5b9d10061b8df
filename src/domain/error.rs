//! Domain error types.
//!
//! Everything here is raised at construction or configuration time. Missing
//! history during evaluation is never an error: it travels as an absent
//! [`Tick`](crate::domain::tick::Tick) value instead.

use crate::domain::series::Period;

/// A parse error with position information for rule expression parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for tickreplay.
#[derive(Debug, thiserror::Error)]
pub enum TickreplayError {
    #[error("cannot aggregate {from} series into {to}: target period must be coarser")]
    InvalidPeriod { from: Period, to: Period },

    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("name already registered: {0}")]
    DuplicateName(String),

    #[error("unknown name: {0}")]
    UnknownName(String),

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("data error for {symbol}: {reason}")]
    Data { symbol: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TickreplayError {
    pub fn parameter(reason: impl Into<String>) -> Self {
        TickreplayError::InvalidParameter {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        TickreplayError::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

impl From<&TickreplayError> for std::process::ExitCode {
    fn from(err: &TickreplayError) -> Self {
        let code: u8 = match err {
            TickreplayError::Io(_) => 1,
            TickreplayError::ConfigParse { .. }
            | TickreplayError::ConfigMissing { .. }
            | TickreplayError::ConfigInvalid { .. }
            | TickreplayError::InvalidConfiguration { .. } => 2,
            TickreplayError::RuleParse(_)
            | TickreplayError::DuplicateName(_)
            | TickreplayError::UnknownName(_) => 4,
            TickreplayError::InvalidPeriod { .. }
            | TickreplayError::InvalidParameter { .. }
            | TickreplayError::NoData { .. }
            | TickreplayError::Data { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_with_context() {
        let err = ParseError {
            message: "expected number".into(),
            position: 4,
        };
        let shown = err.display_with_context("sma(x)");
        assert!(shown.starts_with("sma(x)\n    ^\n"));
        assert!(shown.contains("position 4"));
    }

    #[test]
    fn invalid_period_message_names_both_periods() {
        let err = TickreplayError::InvalidPeriod {
            from: Period::Week,
            to: Period::Day,
        };
        let msg = err.to_string();
        assert!(msg.contains("week"));
        assert!(msg.contains("day"));
    }

    #[test]
    fn exit_codes_group_by_kind() {
        use std::process::ExitCode;

        let config = TickreplayError::configuration("no assets");
        assert_eq!(
            format!("{:?}", ExitCode::from(&config)),
            format!("{:?}", ExitCode::from(2u8))
        );

        let unknown = TickreplayError::UnknownName("vwap".into());
        assert_eq!(
            format!("{:?}", ExitCode::from(&unknown)),
            format!("{:?}", ExitCode::from(4u8))
        );
    }
}
