//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use crate::adapters::csv_store::{read_series_file, CsvStore};
use crate::adapters::ini_plan::RunPlan;
use crate::domain::backtest::{Backtest, BacktestResult, Side};
use crate::domain::error::TickreplayError;
use crate::domain::registry::builtin_registry;
use crate::domain::rule::Rule;
use crate::domain::rule_parser::compile;
use crate::domain::series::{resample, Period, Series};
use crate::domain::context::EvalContext;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "tickreplay", about = "Indicator and signal backtester for OHLCV series")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a configured backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the timestamps where a rule expression holds for one CSV file
    Scan {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        rule: String,
    },
    /// Aggregate a CSV series into a coarser period
    Resample {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Show the data range of a CSV file
    Info {
        #[arg(long)]
        csv: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest { config } => run_backtest(&config),
        Command::Scan { csv, rule } => run_scan(&csv, &rule),
        Command::Resample { csv, from, to } => run_resample(&csv, &from, &to),
        Command::Info { csv } => run_info(&csv),
    }
}

fn fail(err: &TickreplayError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

/// Parse-error variant of [`fail`] that points a caret at the offending
/// position in the expression.
fn fail_expr(err: TickreplayError, expr: &str) -> ExitCode {
    if let TickreplayError::RuleParse(parse) = &err {
        eprintln!("error:\n{}", parse.display_with_context(expr));
        return (&err).into();
    }
    fail(&err)
}

fn symbol_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "SERIES".to_string())
}

fn run_backtest(config_path: &Path) -> ExitCode {
    eprintln!("Loading plan from {}", config_path.display());
    let plan = match RunPlan::from_file(config_path) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let registry = Rc::new(builtin_registry());
    let buy_rule = match compile(&plan.buy_expr, &registry) {
        Ok(r) => r,
        Err(e) => return fail_expr(e, &plan.buy_expr),
    };
    let sell_rule = match compile(&plan.sell_expr, &registry) {
        Ok(r) => r,
        Err(e) => return fail_expr(e, &plan.sell_expr),
    };

    let store = CsvStore::new(plan.data_dir.clone());
    let mut builder = Backtest::builder()
        .buy_rule(buy_rule)
        .sell_rule(sell_rule)
        .allocation(plan.allocation)
        .fee_rate(plan.fee_rate)
        .premium(plan.premium)
        .registry(registry);

    for asset in &plan.assets {
        let series = match store.fetch_series(&asset.symbol, None, None) {
            Ok(s) => s,
            Err(e) => return fail(&e),
        };
        let series = match plan.resample_to {
            Some(to) => match resample(&series, plan.data_period, to) {
                Ok(s) => s,
                Err(e) => return fail(&e),
            },
            None => series,
        };
        eprintln!("  {}: {} candles", asset.symbol, series.len());
        builder = builder.asset(Rc::new(series), asset.weight);
    }

    let backtest = match builder.build() {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };

    eprintln!("Replaying...");
    let result = backtest.run(plan.initial_cash);
    print_result(&result);
    ExitCode::SUCCESS
}

fn print_result(result: &BacktestResult) {
    println!(
        "{:<20} {:<8} {:<4} {:>14} {:>12} {:>10}",
        "timestamp", "symbol", "side", "quantity", "price", "fee"
    );
    for tx in &result.transactions {
        let side = match tx.side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        };
        println!(
            "{:<20} {:<8} {:<4} {:>14.6} {:>12.4} {:>10.4}",
            tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
            tx.symbol,
            side,
            tx.quantity,
            tx.price,
            tx.fee
        );
    }

    if !result.open_positions.is_empty() {
        println!();
        for open in &result.open_positions {
            println!(
                "open: {} {:.6} @ {:.4} (entered {}, last close {:.4})",
                open.symbol,
                open.quantity,
                open.entry_price,
                open.entry_timestamp.format("%Y-%m-%d %H:%M:%S"),
                open.last_close
            );
        }
    }

    println!();
    println!("principal:         {:>14.2}", result.principal);
    println!("final balance:     {:>14.2}", result.final_balance);
    println!("corrected balance: {:>14.2}", result.corrected_balance);
    println!(
        "corrected P/L:     {:>13.2}%",
        result.corrected_profit_loss * 100.0
    );
}

fn run_scan(csv: &Path, expr: &str) -> ExitCode {
    let symbol = symbol_from_path(csv);
    let series = match read_series_file(csv, &symbol) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    let registry = Rc::new(builtin_registry());
    let rule: Rule = match compile(expr, &registry) {
        Ok(r) => r,
        Err(e) => return fail_expr(e, expr),
    };

    let series = Rc::new(series);
    let matches = EvalContext::scope(series.clone(), registry, |ctx| rule.scan(ctx));

    eprintln!("{} of {} candles match", matches.len(), series.len());
    for index in matches {
        let candle = series.candle(index);
        println!(
            "{} close={:.4}",
            candle.timestamp.format("%Y-%m-%d %H:%M:%S"),
            candle.close
        );
    }
    ExitCode::SUCCESS
}

fn run_resample(csv: &Path, from: &str, to: &str) -> ExitCode {
    let (from, to) = match (from.parse::<Period>(), to.parse::<Period>()) {
        (Ok(f), Ok(t)) => (f, t),
        (Err(e), _) | (_, Err(e)) => return fail(&e),
    };

    let symbol = symbol_from_path(csv);
    let series = match read_series_file(csv, &symbol) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    let coarse = match resample(&series, from, to) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    println!("timestamp,open,high,low,close,volume");
    for candle in coarse.candles() {
        println!(
            "{},{},{},{},{},{}",
            candle.timestamp.format("%Y-%m-%d %H:%M:%S"),
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume
        );
    }
    ExitCode::SUCCESS
}

fn run_info(csv: &Path) -> ExitCode {
    let symbol = symbol_from_path(csv);
    let series: Series = match read_series_file(csv, &symbol) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    match (series.candles().first(), series.last()) {
        (Some(first), Some(last)) => {
            println!(
                "{}: {} candles, {} .. {}",
                series.symbol(),
                series.len(),
                first.timestamp.format("%Y-%m-%d %H:%M:%S"),
                last.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
        _ => println!("{}: empty", series.symbol()),
    }
    ExitCode::SUCCESS
}
