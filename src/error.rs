use thiserror::Error;

/// Failures reported before or while setting up a backtest run.
///
/// Bad candles inside an otherwise valid series are not errors; the engine
/// skips them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to allocate {buffer} buffer of {len} values")]
    AllocationFailure { buffer: &'static str, len: usize },
}
