use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_FAST_WINDOW: usize = 9;
pub const DEFAULT_SLOW_WINDOW: usize = 21;
pub const DEFAULT_FEE_RATE: f64 = 0.0004;
pub const DEFAULT_SLIPPAGE_BPS: f64 = 1.0;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;

pub const MAX_FEE_RATE: f64 = 0.05;
pub const MAX_SLIPPAGE_BPS: f64 = 1000.0;

/// Parameters of a single moving-average crossover backtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub fast_window: usize,
    pub slow_window: usize,
    /// Fraction of notional charged on both entry and exit
    pub fee_rate: f64,
    /// Adverse price adjustment applied to every fill, in basis points
    pub slippage_bps: f64,
    /// Unrealized return that closes the position, `None` when disabled
    pub take_profit: Option<f64>,
    /// Unrealized loss (as a positive fraction) that closes the position, `None` when disabled
    pub stop_loss: Option<f64>,
    pub initial_capital: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            fast_window: DEFAULT_FAST_WINDOW,
            slow_window: DEFAULT_SLOW_WINDOW,
            fee_rate: DEFAULT_FEE_RATE,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            take_profit: None,
            stop_loss: None,
            initial_capital: DEFAULT_INITIAL_CAPITAL,
        }
    }
}

impl BacktestParams {
    /// Range-bound every parameter so the engine only sees sane values.
    ///
    /// Initial capital is left alone; it is rejected rather than clamped.
    pub fn sanitized(&self) -> Self {
        let fast_window = self.fast_window.max(1);
        let slow_window = self.slow_window.max(fast_window);

        Self {
            fast_window,
            slow_window,
            fee_rate: clamp_or_zero(self.fee_rate, MAX_FEE_RATE),
            slippage_bps: clamp_or_zero(self.slippage_bps, MAX_SLIPPAGE_BPS),
            take_profit: self.take_profit.and_then(threshold_from_raw),
            stop_loss: self.stop_loss.and_then(threshold_from_raw),
            initial_capital: self.initial_capital,
        }
    }

    /// Smallest price series these (already sanitized) parameters can run on.
    ///
    /// Saturates, so an absurd slow window yields a length no series can reach.
    pub fn min_series_len(&self) -> usize {
        self.slow_window.saturating_add(2)
    }

    /// Builds parameters from string settings, keeping defaults for absent keys.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let fast_window = optional_setting_usize(settings, "FAST_WINDOW")?;
        let slow_window = optional_setting_usize(settings, "SLOW_WINDOW")?;
        let fee_rate = optional_setting_f64(settings, "FEE_RATE")?;
        let slippage_bps = optional_setting_f64(settings, "SLIPPAGE_BPS")?;
        let take_profit = optional_setting_f64(settings, "TAKE_PROFIT")?;
        let stop_loss = optional_setting_f64(settings, "STOP_LOSS")?;
        let initial_capital = optional_setting_f64(settings, "INITIAL_CAPITAL")?;

        if let Some(capital) = initial_capital {
            if capital <= 0.0 {
                return Err(anyhow!(
                    "Setting INITIAL_CAPITAL must be > 0 (value: {})",
                    capital
                ));
            }
        }

        Ok(Self {
            fast_window: fast_window.unwrap_or(defaults.fast_window),
            slow_window: slow_window.unwrap_or(defaults.slow_window),
            fee_rate: fee_rate.unwrap_or(defaults.fee_rate),
            slippage_bps: slippage_bps.unwrap_or(defaults.slippage_bps),
            take_profit: take_profit.and_then(threshold_from_raw),
            stop_loss: stop_loss.and_then(threshold_from_raw),
            initial_capital: initial_capital.unwrap_or(defaults.initial_capital),
        })
    }
}

/// Maps the "non-positive means disabled" threshold convention onto `Option`.
pub fn threshold_from_raw(raw: f64) -> Option<f64> {
    if raw.is_finite() && raw > 0.0 {
        Some(raw)
    } else {
        None
    }
}

fn clamp_or_zero(value: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, max)
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(settings: &HashMap<String, String>, key: &str) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    Ok(Some(value))
}

fn optional_setting_usize(settings: &HashMap<String, String>, key: &str) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw.parse::<usize>().map_err(|_| {
        anyhow!(
            "Setting {} must be a non-negative integer (value: {})",
            key,
            raw
        )
    })?;
    Ok(Some(value))
}
