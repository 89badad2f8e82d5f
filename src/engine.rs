use crate::config::BacktestParams;
use crate::models::*;
use crate::signals::{crossover_at, CrossoverSignal};
use log::{debug, warn};

/// Quantity granularity for entries. Rounding down leaves a little cash dust.
pub const LOT_SIZE: f64 = 1e-8;
/// Denominator floor and the most negative post-entry cash still accepted.
pub const CASH_EPSILON: f64 = 1e-12;
/// Negative cash residues smaller than this are treated as rounding noise.
pub const NEGATIVE_CASH_TOLERANCE: f64 = 1e-6;

#[derive(Debug, PartialEq, Eq)]
enum EntryOutcome {
    Executed,
    Skipped { reason: &'static str },
}

pub struct BacktestLoopResult {
    pub state: PortfolioState,
    pub closed_trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Long-only crossover state machine.
pub struct Engine {
    params: BacktestParams,
}

impl Engine {
    /// `params` are used as given; callers pass them through
    /// [`BacktestParams::sanitized`] first.
    pub fn new(params: BacktestParams) -> Self {
        Self { params }
    }

    pub fn run_backtest_loop(
        &self,
        prices: &[f64],
        fast_ma: &[Option<f64>],
        slow_ma: &[Option<f64>],
    ) -> BacktestLoopResult {
        self.run_backtest_loop_observed(prices, fast_ma, slow_ma, |_, _| {})
    }

    /// Same as [`Engine::run_backtest_loop`], calling `observer` with the state
    /// after every processed candle.
    pub fn run_backtest_loop_observed<F>(
        &self,
        prices: &[f64],
        fast_ma: &[Option<f64>],
        slow_ma: &[Option<f64>],
        mut observer: F,
    ) -> BacktestLoopResult
    where
        F: FnMut(usize, &PortfolioState),
    {
        let mut state = PortfolioState::new(self.params.initial_capital);
        let mut closed_trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(prices.len());

        for (index, &price) in prices.iter().enumerate().skip(1) {
            if price.is_nan() || price <= 0.0 {
                warn!("Skipping candle {} with unusable price {}", index, price);
                continue;
            }

            let risk_exit = self.check_risk_exit(&state, price);
            if let Some(reason) = risk_exit {
                if let Some(trade) = self.execute_exit(&mut state, price, index, reason) {
                    closed_trades.push(trade);
                }
            }

            match crossover_at(fast_ma, slow_ma, index) {
                CrossoverSignal::LongEntry if !state.is_long() => {
                    if let EntryOutcome::Skipped { reason } =
                        self.execute_entry(&mut state, price, index)
                    {
                        debug!("Entry at candle {} skipped: {}", index, reason);
                    }
                }
                CrossoverSignal::LongExit if state.is_long() && risk_exit.is_none() => {
                    if let Some(trade) =
                        self.execute_exit(&mut state, price, index, ExitReason::CrossDown)
                    {
                        closed_trades.push(trade);
                    }
                }
                _ => {}
            }

            let equity = state.equity_at(price);
            Self::update_drawdown(&mut state, equity);
            equity_curve.push(EquityPoint { index, equity });

            observer(index, &state);
        }

        if let Some(trade) = self.force_liquidation(&mut state, prices) {
            let exit_index = trade.exit_index;
            closed_trades.push(trade);

            match equity_curve.last_mut() {
                Some(point) if point.index == exit_index => point.equity = state.cash,
                _ => equity_curve.push(EquityPoint {
                    index: exit_index,
                    equity: state.cash,
                }),
            }
        }

        BacktestLoopResult {
            state,
            closed_trades,
            equity_curve,
        }
    }

    /// Take-profit wins over stop-loss when both thresholds are somehow hit.
    fn check_risk_exit(&self, state: &PortfolioState, price: f64) -> Option<ExitReason> {
        let position = state.position?;
        let unrealized = (price - position.entry_price) / position.entry_price;

        if let Some(take_profit) = self.params.take_profit {
            if unrealized >= take_profit {
                return Some(ExitReason::TakeProfit);
            }
        }
        if let Some(stop_loss) = self.params.stop_loss {
            if unrealized <= -stop_loss {
                return Some(ExitReason::StopLoss);
            }
        }
        None
    }

    fn execute_entry(&self, state: &mut PortfolioState, price: f64, index: usize) -> EntryOutcome {
        let fill_price = self.apply_entry_slippage(price);
        let unit_cost = fill_price * (1.0 + self.params.fee_rate);
        if unit_cost.is_nan() || unit_cost <= CASH_EPSILON {
            return EntryOutcome::Skipped {
                reason: "invalid_fill_price",
            };
        }

        let budget = state.cash;
        let quantity = ((budget / unit_cost) / LOT_SIZE).floor() * LOT_SIZE;
        if quantity.is_nan() || quantity <= 0.0 {
            return EntryOutcome::Skipped {
                reason: "quantity_below_lot",
            };
        }

        let cost = quantity * fill_price;
        let fee = cost * self.params.fee_rate;
        let mut new_cash = budget - (cost + fee);
        if new_cash < 0.0 && new_cash.abs() < NEGATIVE_CASH_TOLERANCE {
            new_cash = 0.0;
        }
        if new_cash < -CASH_EPSILON {
            warn!(
                "Entry at candle {} would overdraw cash ({:.12}); skipping",
                index, new_cash
            );
            return EntryOutcome::Skipped {
                reason: "insufficient_cash",
            };
        }

        state.cash = clamp_non_negative(new_cash);
        state.position = Some(OpenPosition {
            quantity,
            entry_price: fill_price,
            entry_index: index,
            entry_fee: fee,
        });
        debug!(
            "BUY {:.8} @ {:.6} (candle {}, fee {:.6}, cash {:.6})",
            quantity, fill_price, index, fee, state.cash
        );
        EntryOutcome::Executed
    }

    /// Closes the open position at `price`; `None` when already flat.
    fn execute_exit(
        &self,
        state: &mut PortfolioState,
        price: f64,
        index: usize,
        reason: ExitReason,
    ) -> Option<ClosedTrade> {
        let position = state.position.take()?;

        let fill_price = self.apply_exit_slippage(price);
        let proceeds = position.quantity * fill_price;
        let fee = proceeds * self.params.fee_rate;
        state.cash = clamp_non_negative(state.cash + proceeds - fee);

        let trade = ClosedTrade {
            entry_index: position.entry_index,
            exit_index: index,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: fill_price,
            fees: position.entry_fee + fee,
            pnl: proceeds - fee - (position.quantity * position.entry_price + position.entry_fee),
            exit_reason: reason,
        };

        if trade.is_win() {
            state.wins += 1;
        }
        state.trades_closed += 1;

        debug!(
            "SELL {:.8} @ {:.6} (candle {}, {}, pnl {:.6}, cash {:.6})",
            trade.quantity,
            fill_price,
            index,
            reason.as_str(),
            trade.pnl,
            state.cash
        );
        Some(trade)
    }

    fn force_liquidation(&self, state: &mut PortfolioState, prices: &[f64]) -> Option<ClosedTrade> {
        if !state.is_long() {
            return None;
        }
        let last_index = prices.len().checked_sub(1)?;
        let last_price = prices[last_index];
        if last_price.is_nan() || last_price <= 0.0 {
            warn!(
                "Last price {} is unusable; position left open at end of series",
                last_price
            );
            return None;
        }
        self.execute_exit(state, last_price, last_index, ExitReason::EndOfSeries)
    }

    fn update_drawdown(state: &mut PortfolioState, equity: f64) {
        if equity > state.peak_equity {
            state.peak_equity = equity;
        }
        if state.peak_equity > 0.0 {
            let drawdown = (state.peak_equity - equity) / state.peak_equity;
            if drawdown > state.max_drawdown {
                state.max_drawdown = drawdown;
            }
        }
    }

    fn apply_entry_slippage(&self, price: f64) -> f64 {
        price * (1.0 + self.params.slippage_bps / 10_000.0)
    }

    fn apply_exit_slippage(&self, price: f64) -> f64 {
        price * (1.0 - self.params.slippage_bps / 10_000.0)
    }
}

fn clamp_non_negative(value: f64) -> f64 {
    if value < 0.0 || value.is_nan() {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frictionless() -> BacktestParams {
        BacktestParams {
            fast_window: 1,
            slow_window: 2,
            fee_rate: 0.0,
            slippage_bps: 0.0,
            take_profit: None,
            stop_loss: None,
            initial_capital: 10_000.0,
        }
    }

    fn long_position(quantity: f64, entry_price: f64) -> OpenPosition {
        OpenPosition {
            quantity,
            entry_price,
            entry_index: 1,
            entry_fee: 0.0,
        }
    }

    /// Averages that cross up at `entry` and down at `exit`.
    fn scripted_crosses(
        len: usize,
        entry: usize,
        exit: Option<usize>,
    ) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
        let slow = vec![Some(100.0); len];
        let fast = (0..len)
            .map(|i| {
                let above = i >= entry && exit.map(|e| i < e).unwrap_or(true);
                Some(if above { 101.0 } else { 99.0 })
            })
            .collect();
        (fast, slow)
    }

    #[test]
    fn entry_rounds_quantity_down_to_lot() {
        let engine = Engine::new(frictionless());
        let mut state = PortfolioState::new(10_000.0);

        let outcome = engine.execute_entry(&mut state, 3.0, 1);
        assert_eq!(outcome, EntryOutcome::Executed);

        let position = state.position.expect("position should be open");
        assert!(position.quantity <= 10_000.0 / 3.0);
        assert!(10_000.0 / 3.0 - position.quantity < LOT_SIZE * 1.5);
        assert!(state.cash >= 0.0);
        assert!(state.cash < 1e-6);
    }

    #[test]
    fn entry_applies_adverse_slippage_and_fee() {
        let params = BacktestParams {
            fee_rate: 0.001,
            slippage_bps: 10.0,
            ..frictionless()
        };
        let engine = Engine::new(params);
        let mut state = PortfolioState::new(10_000.0);

        engine.execute_entry(&mut state, 100.0, 4);

        let position = state.position.expect("position should be open");
        assert!((position.entry_price - 100.1).abs() < 1e-9);
        assert_eq!(position.entry_index, 4);
        let spent = position.quantity * position.entry_price * 1.001;
        assert!((10_000.0 - spent - state.cash).abs() < 1e-6);
        assert!((position.entry_fee - position.quantity * 100.1 * 0.001).abs() < 1e-9);
    }

    #[test]
    fn entry_with_no_cash_is_skipped() {
        let engine = Engine::new(frictionless());
        let mut state = PortfolioState::new(10_000.0);
        state.cash = 0.0;

        let outcome = engine.execute_entry(&mut state, 50.0, 2);
        assert_eq!(
            outcome,
            EntryOutcome::Skipped {
                reason: "quantity_below_lot"
            }
        );
        assert!(state.position.is_none());
        assert_eq!(state.cash, 0.0);
    }

    #[test]
    fn exit_counts_win_and_resets_position() {
        let params = BacktestParams {
            fee_rate: 0.001,
            slippage_bps: 5.0,
            ..frictionless()
        };
        let engine = Engine::new(params);
        let mut state = PortfolioState::new(10_000.0);
        state.cash = 0.0;
        state.position = Some(long_position(10.0, 100.0));

        let trade = engine
            .execute_exit(&mut state, 110.0, 7, ExitReason::CrossDown)
            .expect("exit should close the position");

        let fill = 110.0 * (1.0 - 5.0 / 10_000.0);
        assert!((trade.exit_price - fill).abs() < 1e-9);
        assert!((state.cash - (10.0 * fill * 0.999)).abs() < 1e-9);
        assert!(state.position.is_none());
        assert_eq!(state.trades_closed, 1);
        assert_eq!(state.wins, 1);
        assert_eq!(trade.exit_index, 7);
    }

    #[test]
    fn exit_below_entry_is_not_a_win() {
        let engine = Engine::new(frictionless());
        let mut state = PortfolioState::new(0.0);
        state.position = Some(long_position(1.0, 100.0));

        let trade = engine
            .execute_exit(&mut state, 100.0, 3, ExitReason::StopLoss)
            .expect("exit should close the position");
        assert!(!trade.is_win());
        assert_eq!(state.wins, 0);
        assert_eq!(state.trades_closed, 1);
    }

    #[test]
    fn exit_when_flat_does_nothing() {
        let engine = Engine::new(frictionless());
        let mut state = PortfolioState::new(500.0);
        assert!(engine
            .execute_exit(&mut state, 10.0, 1, ExitReason::CrossDown)
            .is_none());
        assert_eq!(state.trades_closed, 0);
        assert_eq!(state.cash, 500.0);
    }

    #[test]
    fn take_profit_checked_before_stop_loss() {
        let params = BacktestParams {
            take_profit: Some(0.02),
            stop_loss: Some(0.05),
            ..frictionless()
        };
        let engine = Engine::new(params);
        let mut state = PortfolioState::new(0.0);
        state.position = Some(long_position(1.0, 100.0));

        assert_eq!(
            engine.check_risk_exit(&state, 102.0),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(
            engine.check_risk_exit(&state, 95.0),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(engine.check_risk_exit(&state, 101.0), None);
    }

    #[test]
    fn disabled_thresholds_never_fire() {
        let params = BacktestParams {
            take_profit: Some(-1.0),
            stop_loss: Some(0.0),
            ..frictionless()
        }
        .sanitized();
        assert_eq!(params.take_profit, None);
        assert_eq!(params.stop_loss, None);

        let engine = Engine::new(params);
        let mut state = PortfolioState::new(0.0);
        state.position = Some(long_position(1.0, 100.0));
        assert_eq!(engine.check_risk_exit(&state, 500.0), None);
        assert_eq!(engine.check_risk_exit(&state, 1.0), None);
    }

    #[test]
    fn risk_exit_takes_priority_over_cross_exit() {
        let params = BacktestParams {
            take_profit: Some(0.02),
            ..frictionless()
        };
        let engine = Engine::new(params);
        let prices = vec![100.0, 100.0, 100.0, 105.0, 105.0];
        let (fast, slow) = scripted_crosses(prices.len(), 2, Some(3));

        let result = engine.run_backtest_loop(&prices, &fast, &slow);

        assert_eq!(result.closed_trades.len(), 1);
        assert_eq!(result.closed_trades[0].exit_reason, ExitReason::TakeProfit);
        assert_eq!(result.closed_trades[0].exit_index, 3);
        assert_eq!(result.state.trades_closed, 1);
        assert_eq!(result.state.wins, 1);
    }

    #[test]
    fn risk_exit_allows_reentry_on_same_candle() {
        let params = BacktestParams {
            stop_loss: Some(0.01),
            ..frictionless()
        };
        let engine = Engine::new(params);
        let prices = vec![100.0, 100.0, 100.0, 90.0, 90.0];
        // Up cross at 1, touch at 2, up cross again at 3.
        let slow = vec![Some(100.0); 5];
        let fast = vec![
            Some(99.0),
            Some(101.0),
            Some(100.0),
            Some(101.0),
            Some(101.0),
        ];

        let result = engine.run_backtest_loop(&prices, &fast, &slow);

        let reasons: Vec<ExitReason> = result.closed_trades.iter().map(|t| t.exit_reason).collect();
        assert_eq!(reasons, vec![ExitReason::StopLoss, ExitReason::EndOfSeries]);
        assert_eq!(result.closed_trades[1].entry_index, 3);
    }

    #[test]
    fn bad_price_candle_leaves_state_untouched() {
        let engine = Engine::new(frictionless());
        let prices = vec![100.0, 100.0, -1.0, f64::NAN, 100.0];
        let (fast, slow) = scripted_crosses(prices.len(), 2, None);

        let mut observed = Vec::new();
        let result =
            engine.run_backtest_loop_observed(&prices, &fast, &slow, |index, _| observed.push(index));

        assert_eq!(observed, vec![1, 4]);
        assert!(result.equity_curve.iter().all(|p| p.index != 2 && p.index != 3));
        // The cross at index 2 is lost with the skipped candle.
        assert_eq!(result.state.trades_closed, 0);
        assert_eq!(result.state.cash, 10_000.0);
    }

    #[test]
    fn forced_liquidation_closes_open_position() {
        let engine = Engine::new(frictionless());
        let prices = vec![100.0, 100.0, 120.0, 130.0];
        let (fast, slow) = scripted_crosses(prices.len(), 1, None);

        let result = engine.run_backtest_loop(&prices, &fast, &slow);

        assert!(result.state.position.is_none());
        assert_eq!(result.closed_trades.len(), 1);
        let trade = &result.closed_trades[0];
        assert_eq!(trade.exit_reason, ExitReason::EndOfSeries);
        assert_eq!(trade.exit_index, 3);
        assert!((result.state.cash - 13_000.0).abs() < 1e-3);
        let last = result.equity_curve.last().expect("equity recorded");
        assert_eq!(last.index, 3);
        assert_eq!(last.equity, result.state.cash);
    }

    #[test]
    fn forced_liquidation_skipped_for_bad_last_price() {
        let engine = Engine::new(frictionless());
        let prices = vec![100.0, 100.0, 120.0, 0.0];
        let (fast, slow) = scripted_crosses(prices.len(), 1, None);

        let result = engine.run_backtest_loop(&prices, &fast, &slow);

        assert!(result.state.position.is_some());
        assert_eq!(result.state.trades_closed, 0);
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let engine = Engine::new(frictionless());
        let prices = vec![100.0, 100.0, 120.0, 90.0, 110.0];
        let (fast, slow) = scripted_crosses(prices.len(), 1, None);

        let result = engine.run_backtest_loop(&prices, &fast, &slow);

        assert!((result.state.max_drawdown - 0.25).abs() < 1e-6);
        assert!((result.state.peak_equity - 12_000.0).abs() < 1e-3);
    }
}
