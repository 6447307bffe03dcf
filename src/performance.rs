use crate::models::{EquityPoint, Metrics, Trade};
use statrs::statistics::Statistics;

/// Pure derivation of the performance record from one run's outputs. Every
/// division-by-zero degeneracy resolves to a sentinel or zero, never an
/// error.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
        periods_per_year: f64,
    ) -> Metrics {
        if trades.is_empty() && equity_curve.is_empty() {
            return Metrics::empty();
        }

        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);
        let total_return_pct = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital * 100.0
        } else {
            0.0
        };

        let total_trades = trades.len();
        let mut winning = Vec::new();
        let mut losing = Vec::new();
        let mut breakeven_trades = 0usize;
        for trade in trades {
            if trade.profit_loss > 0.0 {
                winning.push(trade.profit_loss);
            } else if trade.profit_loss < 0.0 {
                losing.push(trade.profit_loss);
            } else {
                breakeven_trades += 1;
            }
        }

        let win_rate = if total_trades > 0 {
            winning.len() as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let gross_profit: f64 = winning.iter().sum();
        let gross_loss: f64 = losing.iter().sum();
        let profit_factor = if total_trades == 0 {
            0.0
        } else if gross_loss == 0.0 {
            if gross_profit > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            gross_profit / gross_loss.abs()
        };

        let expectancy = if total_trades > 0 {
            trades.iter().map(|t| t.profit_loss).sum::<f64>() / total_trades as f64
        } else {
            0.0
        };

        let avg_win = if winning.is_empty() {
            0.0
        } else {
            gross_profit / winning.len() as f64
        };
        let avg_loss = if losing.is_empty() {
            0.0
        } else {
            gross_loss / losing.len() as f64
        };
        let risk_reward_ratio = if avg_loss == 0.0 {
            if avg_win > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            avg_win / avg_loss.abs()
        };

        let (max_drawdown, max_drawdown_ratio) = Self::max_drawdown(equity_curve);
        // Reported as a negative percentage; 0 only when equity never fell
        // below its running peak.
        let max_drawdown_pct = -(max_drawdown_ratio * 100.0);

        let returns = Self::period_returns(equity_curve);
        let sharpe_ratio = Self::sharpe(&returns, periods_per_year);
        let sortino_ratio = Self::sortino(&returns, periods_per_year);

        let calmar_ratio = if max_drawdown_pct == 0.0 {
            0.0
        } else {
            total_return_pct / max_drawdown_pct.abs()
        };

        let total_net_profit = final_equity - initial_capital;
        let recovery_factor = if max_drawdown == 0.0 {
            0.0
        } else {
            total_net_profit / max_drawdown.abs()
        };

        Metrics {
            total_return_pct,
            win_rate,
            profit_factor,
            expectancy,
            avg_win,
            avg_loss,
            risk_reward_ratio,
            max_drawdown_pct,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            recovery_factor,
            total_trades,
            winning_trades: winning.len(),
            losing_trades: losing.len(),
            breakeven_trades,
        }
    }

    fn period_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
        equity_curve
            .windows(2)
            .map(|window| {
                let prev = window[0].equity;
                if prev > 0.0 {
                    (window[1].equity - prev) / prev
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.mean();
        let std_dev = returns.std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }
        mean / std_dev * periods_per_year.sqrt()
    }

    fn sortino(returns: &[f64], periods_per_year: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if downside.len() < 2 {
            return 0.0;
        }
        let downside_dev = downside.std_dev();
        if downside_dev == 0.0 || !downside_dev.is_finite() {
            return 0.0;
        }
        returns.mean() / downside_dev * periods_per_year.sqrt()
    }

    /// Largest peak-to-trough decline, in currency and as a ratio of the
    /// peak.
    fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
        let mut max_drawdown = 0.0f64;
        let mut max_ratio = 0.0f64;
        let mut peak = f64::NEG_INFINITY;

        for point in equity_curve {
            if point.equity > peak {
                peak = point.equity;
            } else if peak > 0.0 {
                let drawdown = peak - point.equity;
                max_drawdown = max_drawdown.max(drawdown);
                max_ratio = max_ratio.max(drawdown / peak);
            }
        }

        (max_drawdown, max_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use chrono::{Duration, TimeZone, Utc};

    fn trade(pnl: f64) -> Trade {
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        Trade {
            entry_time: ts,
            exit_time: ts + Duration::hours(1),
            side: Side::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl / 10.0,
            quantity: 10.0,
            profit_loss: pnl,
            roi_pct: pnl / 1_000.0 * 100.0,
            exit_reason: "signal_reversal".to_string(),
        }
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: start + Duration::hours(i as i64),
                equity,
            })
            .collect()
    }

    const HOURLY: f64 = 365.25 * 24.0;

    #[test]
    fn no_trades_yields_zeroed_metrics() {
        let metrics =
            PerformanceCalculator::calculate(&[], &curve(&[10_000.0, 10_000.0]), 10_000.0, HOURLY);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.expectancy, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
    }

    #[test]
    fn trade_partition_is_exhaustive() {
        let trades = vec![trade(50.0), trade(-20.0), trade(0.0), trade(10.0)];
        let metrics =
            PerformanceCalculator::calculate(&trades, &curve(&[10_000.0, 10_040.0]), 10_000.0, HOURLY);
        assert_eq!(
            metrics.winning_trades + metrics.losing_trades + metrics.breakeven_trades,
            metrics.total_trades
        );
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(metrics.breakeven_trades, 1);
        assert!((metrics.win_rate - 50.0).abs() < 1e-9);
        assert!((metrics.expectancy - 10.0).abs() < 1e-9);
        assert!((metrics.avg_win - 30.0).abs() < 1e-9);
        assert!((metrics.avg_loss + 20.0).abs() < 1e-9);
        assert!((metrics.risk_reward_ratio - 1.5).abs() < 1e-9);
        assert!((metrics.profit_factor - 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_loss_run_hits_the_infinity_sentinel() {
        let trades = vec![trade(50.0), trade(30.0)];
        let metrics =
            PerformanceCalculator::calculate(&trades, &curve(&[10_000.0, 10_080.0]), 10_000.0, HOURLY);
        assert!(metrics.profit_factor.is_infinite() && metrics.profit_factor > 0.0);
        assert!(metrics.risk_reward_ratio.is_infinite());
        assert!((metrics.win_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn all_breakeven_has_zero_profit_factor() {
        let trades = vec![trade(0.0), trade(0.0)];
        let metrics =
            PerformanceCalculator::calculate(&trades, &curve(&[10_000.0, 10_000.0]), 10_000.0, HOURLY);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.risk_reward_ratio, 0.0);
        assert_eq!(metrics.win_rate, 0.0);
    }

    #[test]
    fn drawdown_is_never_positive() {
        let metrics = PerformanceCalculator::calculate(
            &[],
            &curve(&[10_000.0, 11_000.0, 9_900.0, 10_500.0]),
            10_000.0,
            HOURLY,
        );
        assert!(metrics.max_drawdown_pct <= 0.0);
        assert!((metrics.max_drawdown_pct + 10.0).abs() < 1e-9);

        let rising = PerformanceCalculator::calculate(
            &[],
            &curve(&[10_000.0, 10_100.0, 10_200.0]),
            10_000.0,
            HOURLY,
        );
        assert_eq!(rising.max_drawdown_pct, 0.0);
        assert_eq!(rising.calmar_ratio, 0.0);
        assert_eq!(rising.recovery_factor, 0.0);
    }

    #[test]
    fn sharpe_and_sortino_degenerate_to_zero() {
        let flat = PerformanceCalculator::calculate(
            &[],
            &curve(&[10_000.0, 10_000.0, 10_000.0]),
            10_000.0,
            HOURLY,
        );
        assert_eq!(flat.sharpe_ratio, 0.0);
        assert_eq!(flat.sortino_ratio, 0.0);

        let single = PerformanceCalculator::calculate(&[], &curve(&[10_000.0, 10_100.0]), 10_000.0, HOURLY);
        assert_eq!(single.sharpe_ratio, 0.0);
        assert_eq!(single.sortino_ratio, 0.0);
    }

    #[test]
    fn recovery_and_calmar_track_drawdown() {
        let metrics = PerformanceCalculator::calculate(
            &[trade(500.0)],
            &curve(&[10_000.0, 11_000.0, 10_500.0, 10_500.0]),
            10_000.0,
            HOURLY,
        );
        // Peak 11000, trough 10500: 500 currency units, 4.545...%.
        assert!((metrics.max_drawdown_pct + 500.0 / 11_000.0 * 100.0).abs() < 1e-9);
        assert!((metrics.recovery_factor - 1.0).abs() < 1e-9);
        let expected_calmar = 5.0 / (500.0 / 11_000.0 * 100.0);
        assert!((metrics.calmar_ratio - expected_calmar).abs() < 1e-9);
    }
}
