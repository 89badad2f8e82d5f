use crate::config::BacktestParams;
use crate::engine::{BacktestLoopResult, Engine};
use crate::error::BacktestError;
use crate::indicators::fill_sma;
use crate::models::{BacktestReport, BacktestSummary};
use crate::performance::PerformanceCalculator;
use chrono::{DateTime, Utc};
use log::info;
use std::time::Instant;

struct Simulation {
    params: BacktestParams,
    result: BacktestLoopResult,
    elapsed_sec: f64,
}

/// Runs one backtest and returns the headline metrics.
pub fn run_backtest(
    prices: &[f64],
    params: &BacktestParams,
) -> Result<BacktestSummary, BacktestError> {
    let sim = simulate(prices, params)?;
    Ok(PerformanceCalculator::summarize(
        &sim.result.state,
        sim.params.initial_capital,
    ))
}

/// Runs one backtest and returns metrics together with the trade log and
/// equity curve.
pub fn run_backtest_report(
    prices: &[f64],
    params: &BacktestParams,
) -> Result<BacktestReport, BacktestError> {
    report(prices, None, params)
}

/// Like [`run_backtest_report`] for a series with one timestamp per price,
/// which adds the start/end times and CAGR to the report.
pub fn run_backtest_report_with_timestamps(
    prices: &[f64],
    timestamps: &[DateTime<Utc>],
    params: &BacktestParams,
) -> Result<BacktestReport, BacktestError> {
    if timestamps.len() != prices.len() {
        return Err(BacktestError::InvalidInput(format!(
            "timestamp count {} does not match price count {}",
            timestamps.len(),
            prices.len()
        )));
    }
    report(prices, Some(timestamps), params)
}

/// Checks the inputs the engine relies on. Returns the sanitized parameters.
pub fn validate_inputs(
    prices: &[f64],
    params: &BacktestParams,
) -> Result<BacktestParams, BacktestError> {
    let params = params.sanitized();

    if !params.initial_capital.is_finite() || params.initial_capital <= 0.0 {
        return Err(BacktestError::InvalidInput(format!(
            "initial capital must be a positive finite number (value: {})",
            params.initial_capital
        )));
    }

    if prices.is_empty() {
        return Err(BacktestError::InvalidInput(
            "price series is empty".to_string(),
        ));
    }

    let required = params.min_series_len();
    if prices.len() < required {
        return Err(BacktestError::InvalidInput(format!(
            "not enough data for slow moving average: {} prices, need at least {} for slow window {}",
            prices.len(),
            required,
            params.slow_window
        )));
    }

    Ok(params)
}

fn report(
    prices: &[f64],
    timestamps: Option<&[DateTime<Utc>]>,
    params: &BacktestParams,
) -> Result<BacktestReport, BacktestError> {
    let sim = simulate(prices, params)?;
    Ok(PerformanceCalculator::build_report(
        sim.result,
        prices,
        timestamps,
        sim.params.initial_capital,
        sim.elapsed_sec,
    ))
}

fn simulate(prices: &[f64], params: &BacktestParams) -> Result<Simulation, BacktestError> {
    let params = validate_inputs(prices, params)?;
    let started = Instant::now();

    let mut fast_ma = allocate_average_buffer("fast moving average", prices.len())?;
    let mut slow_ma = allocate_average_buffer("slow moving average", prices.len())?;
    fill_sma(&mut fast_ma, prices, params.fast_window);
    fill_sma(&mut slow_ma, prices, params.slow_window);

    info!(
        "Running MA cross backtest on {} prices (fast {}, slow {}, fee {}, slippage {} bps)",
        prices.len(),
        params.fast_window,
        params.slow_window,
        params.fee_rate,
        params.slippage_bps
    );

    let engine = Engine::new(params.clone());
    let result = engine.run_backtest_loop(prices, &fast_ma, &slow_ma);
    let elapsed_sec = started.elapsed().as_secs_f64();

    info!(
        "Backtest finished in {:.3} ms: {} trades, cash {:.2}, max drawdown {:.4}",
        elapsed_sec * 1000.0,
        result.state.trades_closed,
        result.state.cash,
        result.state.max_drawdown
    );

    Ok(Simulation {
        params,
        result,
        elapsed_sec,
    })
}

fn allocate_average_buffer(
    buffer: &'static str,
    len: usize,
) -> Result<Vec<Option<f64>>, BacktestError> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(len)
        .map_err(|_| BacktestError::AllocationFailure { buffer, len })?;
    Ok(values)
}
