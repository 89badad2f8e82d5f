pub mod backtester;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod performance;
pub mod price_utils;
pub mod signals;

pub use backtester::{run_backtest, run_backtest_report, run_backtest_report_with_timestamps};
pub use config::BacktestParams;
pub use error::BacktestError;
pub use models::{BacktestReport, BacktestSummary};
