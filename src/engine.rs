use crate::analysis::MultiTimeframeAnalyzer;
use crate::error::{EngineError, Result};
use crate::models::{
    BacktestResult, Candle, Direction, EquityPoint, Position, Side, Trade,
};
use crate::performance::PerformanceCalculator;
use crate::resample::Timeframe;
use crate::strategy::Strategy;
use log::{debug, warn};
use uuid::Uuid;

/// Position sizing rule applied at entry.
#[derive(Debug, Clone, Copy)]
pub enum Sizing {
    /// Fixed currency amount per position.
    FixedNotional(f64),
    /// Fraction of current equity at risk, scaled by the stop distance.
    /// Without a configured stop the fraction applies to notional directly.
    RiskPercent(f64),
}

/// Fill assumption when one bar's range contains both the stop and the
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrabarPolicy {
    StopFirst,
    TargetFirst,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_capital: f64,
    /// Commission as a fraction of notional, charged on entry and exit
    /// fills.
    pub commission_rate: f64,
    pub sizing: Sizing,
    /// Stop distance as a fraction of entry price.
    pub stop_loss_pct: Option<f64>,
    /// Target distance as a fraction of entry price.
    pub take_profit_pct: Option<f64>,
    pub allow_short: bool,
    pub intrabar_policy: IntrabarPolicy,
    /// Fraction of bars on which the strategy may fail before the whole run
    /// aborts.
    pub max_error_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission_rate: 0.0,
            sizing: Sizing::FixedNotional(1_000.0),
            stop_loss_pct: None,
            take_profit_pct: None,
            allow_short: false,
            intrabar_policy: IntrabarPolicy::StopFirst,
            max_error_rate: 0.1,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if !(self.initial_capital > 0.0) {
            return Err(EngineError::Config(format!(
                "Initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.commission_rate < 0.0 {
            return Err(EngineError::Config(format!(
                "Commission rate must be non-negative, got {}",
                self.commission_rate
            )));
        }
        match self.sizing {
            Sizing::FixedNotional(amount) if !(amount > 0.0) => {
                return Err(EngineError::Config(format!(
                    "Fixed notional must be positive, got {}",
                    amount
                )))
            }
            Sizing::RiskPercent(pct) if !(pct > 0.0 && pct <= 1.0) => {
                return Err(EngineError::Config(format!(
                    "Risk percentage must be in (0, 1], got {}",
                    pct
                )))
            }
            _ => {}
        }
        for (label, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if let Some(v) = value {
                if !(v > 0.0 && v < 1.0) {
                    return Err(EngineError::Config(format!(
                        "{} must be in (0, 1), got {}",
                        label, v
                    )));
                }
            }
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(EngineError::Config(format!(
                "max_error_rate must be in [0, 1], got {}",
                self.max_error_rate
            )));
        }
        Ok(())
    }
}

/// Simulation context for one run: equity, the open position and the
/// accumulated outputs. Never shared across runs, which keeps independent
/// runs safe to execute concurrently.
struct RunState {
    cash: f64,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    strategy_errors: usize,
}

/// Bar-by-bar trade simulator. One instance simulates one symbol at a time;
/// multi-symbol work uses independent runs.
pub struct BacktestEngine {
    config: EngineConfig,
    timeframe: Timeframe,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig, timeframe: Timeframe) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, timeframe })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timeframe(&self) -> &Timeframe {
        &self.timeframe
    }

    /// Run the simulation over `candles` (ascending by timestamp). When an
    /// analyzer is supplied, new entries additionally require the
    /// consolidated higher-timeframe bias to agree with the trade side.
    pub fn run(
        &self,
        symbol: &str,
        strategy: &dyn Strategy,
        candles: &[Candle],
        analyzer: Option<&MultiTimeframeAnalyzer>,
    ) -> Result<BacktestResult> {
        if candles.is_empty() {
            return Err(EngineError::Data(format!(
                "No candles supplied for {}",
                symbol
            )));
        }
        if candles.len() < strategy.min_data_points() {
            return Err(EngineError::Data(format!(
                "Insufficient history for {} with {}: {} candles, need {}",
                symbol,
                strategy.name(),
                candles.len(),
                strategy.min_data_points()
            )));
        }

        let max_errors = (self.config.max_error_rate * candles.len() as f64).floor() as usize;
        let mut state = RunState {
            cash: self.config.initial_capital,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::with_capacity(candles.len()),
            strategy_errors: 0,
        };

        for (index, candle) in candles.iter().enumerate() {
            match strategy.generate_signal(candles, index) {
                Ok(signal) => {
                    if state.position.is_some() {
                        self.check_exits(&mut state, candle, &signal);
                    } else if signal.direction != Direction::Flat {
                        self.try_enter(&mut state, candle, &signal, strategy, analyzer)?;
                    }
                }
                Err(error) => {
                    state.strategy_errors += 1;
                    warn!(
                        "Strategy {} failed on {} at {}: {}",
                        strategy.name(),
                        symbol,
                        candle.timestamp,
                        error
                    );
                    // A failing strategy cannot manage an open position, so
                    // the position is forced flat on this bar.
                    if state.position.is_some() {
                        self.close_position(&mut state, candle.timestamp, candle.close, "strategy_error");
                    }
                    if state.strategy_errors > max_errors {
                        return Err(EngineError::Strategy(format!(
                            "Strategy {} exceeded the error threshold on {}: {} failures over {} bars",
                            strategy.name(),
                            symbol,
                            state.strategy_errors,
                            candles.len()
                        )));
                    }
                }
            }

            let marked = state.cash
                + state
                    .position
                    .as_ref()
                    .map(|p| p.unrealized_pnl(candle.close))
                    .unwrap_or(0.0);
            state.equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                equity: marked,
            });
        }

        // Any position still open when the data runs out closes at the last
        // known price.
        if state.position.is_some() {
            let last = candles.last().expect("candles checked non-empty");
            self.close_position(&mut state, last.timestamp, last.close, "end_of_backtest");
            if let Some(point) = state.equity_curve.last_mut() {
                point.equity = state.cash;
            }
        }

        let final_equity = state.cash;
        let metrics = PerformanceCalculator::calculate(
            &state.trades,
            &state.equity_curve,
            self.config.initial_capital,
            self.timeframe.periods_per_year(),
        );

        let mut timeframes = vec![self.timeframe.label().to_string()];
        if let Some(analyzer) = analyzer {
            timeframes.extend(analyzer.timeframe_labels());
        }

        Ok(BacktestResult {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            strategy_name: strategy.name().to_string(),
            start_date: candles[0].timestamp,
            end_date: candles[candles.len() - 1].timestamp,
            timeframes,
            initial_capital: self.config.initial_capital,
            final_equity,
            trades: state.trades,
            equity_curve: state.equity_curve,
            metrics,
            charts: None,
        })
    }

    fn try_enter(
        &self,
        state: &mut RunState,
        candle: &Candle,
        signal: &crate::models::Signal,
        strategy: &dyn Strategy,
        analyzer: Option<&MultiTimeframeAnalyzer>,
    ) -> Result<()> {
        let side = match signal.direction {
            Direction::Long => Side::Long,
            Direction::Short if self.config.allow_short => Side::Short,
            _ => return Ok(()),
        };

        if let Some(analyzer) = analyzer {
            let bias = analyzer.consolidated_bias(strategy, candle.timestamp)?;
            if !bias.allows_entry(side) {
                debug!(
                    "Entry on {} blocked: consolidated bias {} vs {} signal",
                    candle.timestamp,
                    bias.as_str(),
                    side.as_str()
                );
                return Ok(());
            }
        }

        let entry_price = candle.close;
        if !(entry_price > 0.0) {
            return Ok(());
        }

        let stop_distance = self.config.stop_loss_pct.map(|pct| entry_price * pct);
        let notional = match self.config.sizing {
            Sizing::FixedNotional(amount) => amount,
            Sizing::RiskPercent(pct) => match stop_distance {
                Some(distance) if distance > 0.0 => {
                    let risk_budget = pct * state.cash;
                    risk_budget / distance * entry_price
                }
                _ => pct * state.cash,
            },
        };
        let quantity = notional / entry_price;
        if !(quantity > 0.0) {
            return Ok(());
        }

        let stop_price = self.config.stop_loss_pct.map(|pct| match side {
            Side::Long => entry_price * (1.0 - pct),
            Side::Short => entry_price * (1.0 + pct),
        });
        let target_price = self.config.take_profit_pct.map(|pct| match side {
            Side::Long => entry_price * (1.0 + pct),
            Side::Short => entry_price * (1.0 - pct),
        });

        // Entry commission comes straight out of equity.
        state.cash -= entry_price * quantity * self.config.commission_rate;
        state.position = Some(Position {
            side,
            entry_time: candle.timestamp,
            entry_price,
            quantity,
            stop_price,
            target_price,
        });

        Ok(())
    }

    /// Exit precedence: stop loss, take profit, signal reversal, end of
    /// data. When both stop and target sit inside the bar's range the
    /// intrabar policy picks the fill.
    fn check_exits(&self, state: &mut RunState, candle: &Candle, signal: &crate::models::Signal) {
        let Some(position) = state.position.as_ref() else {
            return;
        };

        let stop_hit = position.stop_price.filter(|stop| match position.side {
            Side::Long => candle.low <= *stop,
            Side::Short => candle.high >= *stop,
        });
        let target_hit = position.target_price.filter(|target| match position.side {
            Side::Long => candle.high >= *target,
            Side::Short => candle.low <= *target,
        });

        let fill = match (stop_hit, target_hit) {
            (Some(stop), Some(target)) => match self.config.intrabar_policy {
                IntrabarPolicy::StopFirst => Some((stop, "stop_loss")),
                IntrabarPolicy::TargetFirst => Some((target, "take_profit")),
            },
            (Some(stop), None) => Some((stop, "stop_loss")),
            (None, Some(target)) => Some((target, "take_profit")),
            (None, None) => None,
        };

        if let Some((price, reason)) = fill {
            self.close_position(state, candle.timestamp, price, reason);
            return;
        }

        let reversed = match position.side {
            Side::Long => signal.direction == Direction::Short,
            Side::Short => signal.direction == Direction::Long,
        };
        if reversed {
            self.close_position(state, candle.timestamp, candle.close, "signal_reversal");
        }
    }

    fn close_position(
        &self,
        state: &mut RunState,
        exit_time: chrono::DateTime<chrono::Utc>,
        exit_price: f64,
        exit_reason: &str,
    ) {
        let Some(position) = state.position.take() else {
            return;
        };

        let exit_commission = exit_price * position.quantity * self.config.commission_rate;
        let profit_loss = (exit_price - position.entry_price)
            * position.quantity
            * position.side.sign()
            - exit_commission;
        let exposure = position.entry_price * position.quantity;
        let roi_pct = if exposure > 0.0 {
            profit_loss / exposure * 100.0
        } else {
            0.0
        };

        state.cash += profit_loss;
        state.trades.push(Trade {
            entry_time: position.entry_time,
            exit_time,
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            profit_loss,
            roi_pct,
            exit_reason: exit_reason.to_string(),
        });
    }
}
