use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub quantity: f64,
    /// Fill price of the entry, slippage included
    pub entry_price: f64,
    pub entry_index: usize,
    pub entry_fee: f64,
}

/// Mutable account state of a single run.
///
/// Holding the position as an `Option` keeps quantity and entry price defined
/// together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub position: Option<OpenPosition>,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    pub trades_closed: u32,
    pub wins: u32,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            position: None,
            peak_equity: initial_capital,
            max_drawdown: 0.0,
            trades_closed: 0,
            wins: 0,
        }
    }

    pub fn is_long(&self) -> bool {
        self.position.is_some()
    }

    pub fn position_qty(&self) -> f64 {
        self.position.map(|p| p.quantity).unwrap_or(0.0)
    }

    pub fn entry_price(&self) -> Option<f64> {
        self.position.map(|p| p.entry_price)
    }

    /// Cash plus the open position marked at `price`.
    pub fn equity_at(&self, price: f64) -> f64 {
        self.cash + self.position_qty() * price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    CrossDown,
    EndOfSeries,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::CrossDown => "cross_down",
            ExitReason::EndOfSeries => "end_of_series",
        }
    }
}

/// A completed entry/exit round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub entry_index: usize,
    pub exit_index: usize,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Entry and exit fees combined
    pub fees: f64,
    pub pnl: f64,
    pub exit_reason: ExitReason,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.exit_price > self.entry_price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub index: usize,
    pub equity: f64,
}

/// The five headline metrics of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub final_equity: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub n_trades: u32,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub summary: BacktestSummary,
    pub initial_capital: f64,
    /// Timestamp of the first and last candle, when the series carries them
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    /// Compound annual growth rate over `start_ts..end_ts`
    pub cagr: Option<f64>,
    pub benchmark_return: f64,
    pub sharpe_ratio: f64,
    pub total_fees: f64,
    /// Wall-clock time spent simulating, in seconds
    pub elapsed_sec: f64,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
}
