use crate::engine::BacktestLoopResult;
use crate::models::*;
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_YEAR: f64 = 365.0;
/// Floor on the CAGR span so identical timestamps do not divide by zero.
const MIN_SPAN_DAYS: f64 = 1e-9;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Headline metrics from the final state of a run.
    ///
    /// The position has been liquidated by now, so final equity is cash.
    pub fn summarize(state: &PortfolioState, initial_capital: f64) -> BacktestSummary {
        let final_equity = if state.cash >= 0.0 { state.cash } else { 0.0 };

        let total_return = if initial_capital > 0.0 {
            final_equity / initial_capital - 1.0
        } else {
            0.0
        };

        let win_rate = if state.trades_closed > 0 {
            state.wins as f64 / state.trades_closed as f64
        } else {
            0.0
        };

        BacktestSummary {
            final_equity,
            total_return,
            max_drawdown: state.max_drawdown,
            n_trades: state.trades_closed,
            win_rate,
        }
    }

    /// Full report for a finished run. `timestamps`, when given, are aligned
    /// with `prices` and enable the CAGR.
    pub fn build_report(
        result: BacktestLoopResult,
        prices: &[f64],
        timestamps: Option<&[DateTime<Utc>]>,
        initial_capital: f64,
        elapsed_sec: f64,
    ) -> BacktestReport {
        let summary = Self::summarize(&result.state, initial_capital);
        let total_fees = result.closed_trades.iter().map(|t| t.fees).sum();

        let (start_ts, end_ts) = match timestamps {
            Some(ts) => (ts.first().copied(), ts.last().copied()),
            None => (None, None),
        };
        let cagr = match (start_ts, end_ts) {
            (Some(start), Some(end)) => {
                Some(Self::calculate_cagr(summary.total_return, start, end))
            }
            _ => None,
        };

        BacktestReport {
            summary,
            initial_capital,
            start_ts,
            end_ts,
            cagr,
            benchmark_return: Self::benchmark_return(prices),
            sharpe_ratio: Self::calculate_sharpe_ratio(&result.equity_curve),
            total_fees,
            elapsed_sec,
            trades: result.closed_trades,
            equity_curve: result.equity_curve,
        }
    }

    /// `(1 + total_return)^(1 / years) - 1` over the span from `start` to `end`.
    ///
    /// Returns 0 when the result does not fit in an `f64`, e.g. a large gain
    /// over a span of minutes.
    pub fn calculate_cagr(total_return: f64, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
        let years = (seconds / SECONDS_PER_DAY).max(MIN_SPAN_DAYS) / DAYS_PER_YEAR;

        let cagr = (1.0 + total_return).powf(1.0 / years) - 1.0;
        if cagr.is_finite() {
            cagr
        } else {
            0.0
        }
    }

    /// Buy-and-hold return from the first to the last price.
    pub fn benchmark_return(prices: &[f64]) -> f64 {
        let (Some(&first), Some(&last)) = (prices.first(), prices.last()) else {
            return 0.0;
        };
        if prices.len() < 2 || first.is_nan() || first <= 0.0 || !last.is_finite() {
            return 0.0;
        }
        last / first - 1.0
    }

    /// Mean over standard deviation of candle-to-candle equity returns.
    ///
    /// Not annualized: candle spacing is unknown here.
    pub fn calculate_sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
        if equity_curve.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                let prev_value = window[0].equity;
                let curr_value = window[1].equity;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();

        if !std_dev.is_finite() || std_dev == 0.0 || !mean_return.is_finite() {
            return 0.0;
        }

        mean_return / std_dev
    }
}
