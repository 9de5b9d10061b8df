//! INI run-plan adapter.
//!
//! Turns a config file into everything a backtest run needs: where the CSV
//! data lives, the weighted asset list, the buy/sell rule expressions and
//! the cost model. Rule expressions are kept as text here; the CLI compiles
//! them against a registry.

use configparser::ini::Ini;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::domain::backtest::AllocationPolicy;
use crate::domain::error::TickreplayError;
use crate::domain::series::Period;

#[derive(Debug, Clone, PartialEq)]
pub struct AssetPlan {
    pub symbol: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub data_dir: PathBuf,
    /// Period of the candles on disk.
    pub data_period: Period,
    pub assets: Vec<AssetPlan>,
    pub buy_expr: String,
    pub sell_expr: String,
    pub initial_cash: f64,
    pub fee_rate: f64,
    pub premium: f64,
    pub allocation: AllocationPolicy,
    /// Aggregate each loaded series into this period before the run.
    pub resample_to: Option<Period>,
}

fn missing(section: &str, key: &str) -> TickreplayError {
    TickreplayError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TickreplayError {
    TickreplayError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn require(ini: &Ini, section: &str, key: &str) -> Result<String, TickreplayError> {
    ini.get(section, key).ok_or_else(|| missing(section, key))
}

fn get_float(
    ini: &Ini,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, TickreplayError> {
    match ini.get(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(section, key, format!("'{raw}' is not a number"))),
    }
}

/// Parse `SYM:WEIGHT, SYM:WEIGHT, ...`; a bare symbol gets weight 1.
fn parse_assets(input: &str) -> Result<Vec<AssetPlan>, TickreplayError> {
    let mut assets = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(invalid("assets", "list", "empty asset token"));
        }
        let (symbol, weight) = match trimmed.split_once(':') {
            Some((symbol, weight)) => {
                let weight: f64 = weight.trim().parse().map_err(|_| {
                    invalid(
                        "assets",
                        "list",
                        format!("'{}' has a non-numeric weight", trimmed),
                    )
                })?;
                (symbol.trim().to_uppercase(), weight)
            }
            None => (trimmed.to_uppercase(), 1.0),
        };
        if !seen.insert(symbol.clone()) {
            return Err(invalid(
                "assets",
                "list",
                format!("duplicate symbol {symbol}"),
            ));
        }
        assets.push(AssetPlan { symbol, weight });
    }

    Ok(assets)
}

fn parse_allocation(raw: &str) -> Result<AllocationPolicy, TickreplayError> {
    match raw.to_lowercase().as_str() {
        "all_cash" | "use_all_available_cash" => Ok(AllocationPolicy::UseAllAvailableCash),
        "fixed_weight" | "weight" => Ok(AllocationPolicy::FixedWeight),
        other => Err(invalid(
            "backtest",
            "allocation",
            format!("unknown policy '{other}'"),
        )),
    }
}

impl RunPlan {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TickreplayError> {
        let mut ini = Ini::new();
        ini.load(&path).map_err(|e| TickreplayError::ConfigParse {
            file: path.as_ref().display().to_string(),
            reason: e,
        })?;
        Self::from_ini(&ini)
    }

    pub fn from_string(content: &str) -> Result<Self, TickreplayError> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|e| TickreplayError::ConfigParse {
                file: "<inline>".to_string(),
                reason: e,
            })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, TickreplayError> {
        let data_dir = PathBuf::from(require(ini, "data", "dir")?);
        let data_period = match ini.get("data", "period") {
            None => Period::Day,
            Some(raw) => raw
                .parse::<Period>()
                .map_err(|e| invalid("data", "period", e.to_string()))?,
        };
        let assets = parse_assets(&require(ini, "assets", "list")?)?;
        let buy_expr = require(ini, "rules", "buy")?;
        let sell_expr = require(ini, "rules", "sell")?;

        let initial_cash = get_float(ini, "backtest", "cash", 0.0)?;
        if initial_cash <= 0.0 {
            return Err(invalid(
                "backtest",
                "cash",
                "initial cash must be positive",
            ));
        }
        let fee_rate = get_float(ini, "backtest", "fee_rate", 0.0)?;
        let premium = get_float(ini, "backtest", "premium", 0.0)?;

        let allocation = match ini.get("backtest", "allocation") {
            None => AllocationPolicy::default(),
            Some(raw) => parse_allocation(&raw)?,
        };

        let resample_to = match ini.get("backtest", "resample_to") {
            None => None,
            Some(raw) => Some(raw.parse::<Period>().map_err(|e| {
                invalid("backtest", "resample_to", e.to_string())
            })?),
        };

        Ok(RunPlan {
            data_dir,
            data_period,
            assets,
            buy_expr,
            sell_expr,
            initial_cash,
            fee_rate,
            premium,
            allocation,
            resample_to,
        })
    }
}
