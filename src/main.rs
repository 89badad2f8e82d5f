use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use macross::config::{threshold_from_raw, BacktestParams};
use macross::price_utils::{load_price_series, ColumnSelector};
use macross::{run_backtest, run_backtest_report, run_backtest_report_with_timestamps};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

const SETTINGS_ENV_PREFIX: &str = "MACROSS_";

#[derive(Parser)]
#[command(name = "macross")]
#[command(about = "Long-only moving-average crossover backtester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest a price series read from a file
    Backtest {
        /// CSV file, or one price per line
        #[arg(long, value_name = "PATH")]
        prices: PathBuf,
        /// Price column: zero-based index or header name
        #[arg(long, default_value = "0")]
        column: ColumnSelector,
        /// Timestamp column (index or header name); enables CAGR in the report
        #[arg(long)]
        time_column: Option<ColumnSelector>,
        /// Fast moving-average window
        #[arg(long)]
        fast: Option<usize>,
        /// Slow moving-average window
        #[arg(long)]
        slow: Option<usize>,
        /// Fee rate charged on entry and exit notional
        #[arg(long)]
        fee_rate: Option<f64>,
        /// Adverse slippage per fill in basis points
        #[arg(long)]
        slippage_bps: Option<f64>,
        /// Take-profit threshold as a fraction (non-positive disables)
        #[arg(long, allow_hyphen_values = true)]
        take_profit: Option<f64>,
        /// Stop-loss threshold as a fraction (non-positive disables)
        #[arg(long, allow_hyphen_values = true)]
        stop_loss: Option<f64>,
        /// Starting cash
        #[arg(long)]
        initial_capital: Option<f64>,
        /// Print trades, equity curve and extra metrics
        #[arg(long)]
        report: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Backtest {
            prices,
            column,
            time_column,
            fast,
            slow,
            fee_rate,
            slippage_bps,
            take_profit,
            stop_loss,
            initial_capital,
            report,
        } => {
            let mut params = BacktestParams::from_settings_map(&settings_from_env())?;
            if let Some(value) = fast {
                params.fast_window = value;
            }
            if let Some(value) = slow {
                params.slow_window = value;
            }
            if let Some(value) = fee_rate {
                params.fee_rate = value;
            }
            if let Some(value) = slippage_bps {
                params.slippage_bps = value;
            }
            if let Some(value) = take_profit {
                params.take_profit = threshold_from_raw(value);
            }
            if let Some(value) = stop_loss {
                params.stop_loss = threshold_from_raw(value);
            }
            if let Some(value) = initial_capital {
                params.initial_capital = value;
            }

            let series = load_price_series(&prices, &column, time_column.as_ref())?;
            info!(
                "Loaded {} prices from {}",
                series.prices.len(),
                prices.display()
            );

            let output = match (report, series.timestamps.as_deref()) {
                (true, Some(timestamps)) => serde_json::to_string_pretty(
                    &run_backtest_report_with_timestamps(&series.prices, timestamps, &params)?,
                )?,
                (true, None) => {
                    serde_json::to_string_pretty(&run_backtest_report(&series.prices, &params)?)?
                }
                (false, _) => serde_json::to_string_pretty(&run_backtest(&series.prices, &params)?)?,
            };
            println!("{output}");
        }
    }

    Ok(())
}

fn settings_from_env() -> HashMap<String, String> {
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(SETTINGS_ENV_PREFIX)
                .map(|stripped| (stripped.to_string(), value))
        })
        .collect()
}
