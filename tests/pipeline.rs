use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use stratbench::data::{generate_synthetic, MarketData};
use stratbench::engine::{BacktestEngine, EngineConfig, Sizing};
use stratbench::error::EngineError;
use stratbench::models::{Candle, Signal};
use stratbench::optimizer::{optimize, Objective, OptimizerConfig, ParameterGrid};
use stratbench::resample::{resample, Timeframe};
use stratbench::runner::{BacktestRunner, StrategySpec};
use stratbench::strategy::{create_strategy, FnStrategy};

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

fn hourly_candles(symbol: &str, closes: &[f64]) -> Vec<Candle> {
    let mut prev = closes[0];
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Candle {
                symbol: symbol.to_string(),
                timestamp: start_time() + Duration::hours(i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 10.0,
                complete: true,
            }
        })
        .collect()
}

fn hourly_engine(config: EngineConfig) -> BacktestEngine {
    BacktestEngine::new(config, Timeframe::parse("1h").unwrap()).unwrap()
}

#[test]
fn minute_to_hour_resampling_is_associative() {
    let start = start_time();
    let candles: Vec<Candle> = (0..360)
        .map(|i| {
            let price = 20_000.0 + ((i * 37) % 211) as f64;
            Candle {
                symbol: "BTCUSDT".to_string(),
                timestamp: start + Duration::minutes(i),
                open: price,
                high: price + 15.0,
                low: price - 15.0,
                close: price + 5.0,
                volume: 3.0,
                complete: true,
            }
        })
        .collect();

    let hourly = Timeframe::parse("1h").unwrap();
    let direct = resample(&candles, &hourly);
    let fifteen = resample(&candles, &Timeframe::parse("15m").unwrap());
    let two_step = resample(&fifteen, &hourly);

    assert_eq!(direct.len(), 6);
    assert_eq!(direct.len(), two_step.len());
    for (a, b) in direct.iter().zip(two_step.iter()) {
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.open, b.open);
        assert_eq!(a.high, b.high);
        assert_eq!(a.low, b.low);
        assert_eq!(a.close, b.close);
        assert!((a.volume - b.volume).abs() < 1e-9);
        assert_eq!(a.complete, b.complete);
    }
}

#[test]
fn single_profitable_trade_scenario() {
    // One long from 100 to 110 with quantity 10 and no commission.
    let candles = hourly_candles("BTCUSDT", &[100.0, 100.0, 100.0, 110.0, 110.0]);
    let strategy = FnStrategy::new("scripted", 0, |_: &[Candle], index| {
        Ok(match index {
            2 => Signal::long(1.0),
            3 => Signal::short(1.0),
            _ => Signal::flat(),
        })
    });

    let config = EngineConfig {
        sizing: Sizing::FixedNotional(1_000.0),
        ..EngineConfig::default()
    };
    let result = hourly_engine(config)
        .run("BTCUSDT", &strategy, &candles, None)
        .unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert!((trade.profit_loss - 100.0).abs() < 1e-9);
    assert!((trade.roi_pct - 10.0).abs() < 1e-9);
    assert!((result.final_equity - 10_100.0).abs() < 1e-9);
    assert!((result.metrics.total_return_pct - 1.0).abs() < 1e-9);
}

#[test]
fn zero_trade_run_degrades_gracefully() {
    let candles = hourly_candles("BTCUSDT", &[100.0; 50]);
    let strategy = FnStrategy::new("idle", 0, |_: &[Candle], _| Ok(Signal::flat()));

    let result = hourly_engine(EngineConfig::default())
        .run("BTCUSDT", &strategy, &candles, None)
        .unwrap();

    assert_eq!(result.metrics.total_trades, 0);
    assert_eq!(result.metrics.win_rate, 0.0);
    assert_eq!(result.metrics.profit_factor, 0.0);
    assert_eq!(result.metrics.sharpe_ratio, 0.0);
    assert_eq!(result.equity_curve.len(), candles.len());
    assert!((result.final_equity - 10_000.0).abs() < 1e-9);
}

#[test]
fn trade_partition_always_balances() {
    let candles = hourly_candles(
        "BTCUSDT",
        &[
            100.0, 100.0, 100.0, 110.0, 110.0, 110.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0,
        ],
    );
    // Win (100 -> 110), loss (110 -> 100), breakeven (100 -> 100).
    let strategy = FnStrategy::new("scripted", 0, |_: &[Candle], index| {
        Ok(match index {
            2 => Signal::long(1.0),
            3 => Signal::short(1.0),
            4 => Signal::long(1.0),
            6 => Signal::short(1.0),
            8 => Signal::long(1.0),
            10 => Signal::short(1.0),
            _ => Signal::flat(),
        })
    });

    let result = hourly_engine(EngineConfig::default())
        .run("BTCUSDT", &strategy, &candles, None)
        .unwrap();

    assert_eq!(result.metrics.total_trades, 3);
    assert_eq!(
        result.metrics.winning_trades
            + result.metrics.losing_trades
            + result.metrics.breakeven_trades,
        result.metrics.total_trades
    );
    assert_eq!(result.metrics.winning_trades, 1);
    assert_eq!(result.metrics.losing_trades, 1);
    assert_eq!(result.metrics.breakeven_trades, 1);
    assert!(result.metrics.max_drawdown_pct <= 0.0);
    assert!(result.metrics.profit_factor >= 0.0);
}

/// Pinned scenario: a fixed synthetic series with RSI(2, 30/70) must
/// reproduce exactly two winning trades and these exact numbers on every
/// run.
#[test]
fn rsi_regression_scenario() {
    let closes = [
        100.0, 99.0, 98.0, 97.0, 103.0, 110.0, 111.0, 104.5, 100.0, 99.0, 106.0, 113.0, 114.0,
        108.0, 108.0,
    ];
    let candles = hourly_candles("BTCUSDT", &closes);

    let mut params = HashMap::new();
    params.insert("period".to_string(), 2.0);
    params.insert("oversold_level".to_string(), 30.0);
    params.insert("overbought_level".to_string(), 70.0);
    let strategy = create_strategy("rsi", &params).unwrap();

    let config = EngineConfig {
        sizing: Sizing::FixedNotional(1_030.0),
        ..EngineConfig::default()
    };
    let result = hourly_engine(config)
        .run("BTCUSDT", strategy.as_ref(), &candles, None)
        .unwrap();

    assert_eq!(result.trades.len(), 2);

    let first = &result.trades[0];
    assert_eq!(first.entry_time, start_time() + Duration::hours(4));
    assert_eq!(first.exit_time, start_time() + Duration::hours(7));
    assert!((first.entry_price - 103.0).abs() < 1e-12);
    assert!((first.exit_price - 104.5).abs() < 1e-12);
    assert!((first.quantity - 10.0).abs() < 1e-12);
    assert!((first.profit_loss - 15.0).abs() < 1e-9);
    assert!((first.roi_pct - 15.0 / 1_030.0 * 100.0).abs() < 1e-9);
    assert_eq!(first.exit_reason, "signal_reversal");

    let second = &result.trades[1];
    assert_eq!(second.entry_time, start_time() + Duration::hours(10));
    assert_eq!(second.exit_time, start_time() + Duration::hours(13));
    assert!((second.entry_price - 106.0).abs() < 1e-12);
    assert!((second.exit_price - 108.0).abs() < 1e-12);
    let quantity = 1_030.0 / 106.0;
    assert!((second.quantity - quantity).abs() < 1e-12);
    assert!((second.profit_loss - 2.0 * quantity).abs() < 1e-9);
    assert!((second.roi_pct - 2.0 / 106.0 * 100.0).abs() < 1e-9);

    let final_equity = 10_015.0 + 2.0 * quantity;
    assert!((result.final_equity - final_equity).abs() < 1e-9);
    let total_return_pct = (final_equity - 10_000.0) / 10_000.0 * 100.0;
    assert!((result.metrics.total_return_pct - total_return_pct).abs() < 1e-9);

    assert_eq!(result.metrics.total_trades, 2);
    assert!((result.metrics.win_rate - 100.0).abs() < 1e-9);
    assert!(result.metrics.profit_factor.is_infinite());

    // Deepest dip: equity 10080 after bar 6 falling to 10015 on the first
    // exit.
    let max_drawdown_pct = -(65.0 / 10_080.0 * 100.0);
    assert!((result.metrics.max_drawdown_pct - max_drawdown_pct).abs() < 1e-9);
    assert!(result.metrics.sharpe_ratio > 0.0);
    assert!(result.metrics.sortino_ratio > 0.0);
    let calmar = total_return_pct / max_drawdown_pct.abs();
    assert!((result.metrics.calmar_ratio - calmar).abs() < 1e-9);
    let recovery = (final_equity - 10_000.0) / 65.0;
    assert!((result.metrics.recovery_factor - recovery).abs() < 1e-9);

    assert_eq!(result.equity_curve.len(), candles.len());
}

#[test]
fn grid_evaluates_each_combination_exactly_once() {
    let start = start_time();
    let tf = Timeframe::parse("1h").unwrap();
    let candles = generate_synthetic("BTCUSDT", start, 400, &tf, 20_000.0, 7);

    let grid = ParameterGrid::new()
        .add("short_period", vec![5.0, 10.0])
        .add("long_period", vec![20.0, 30.0]);

    let seen = Mutex::new(Vec::new());
    let engine = hourly_engine(EngineConfig::default());
    let result = optimize(
        &engine,
        "BTCUSDT",
        &candles,
        |params| {
            let mut pair: Vec<(String, f64)> =
                params.iter().map(|(k, v)| (k.clone(), *v)).collect();
            pair.sort_by(|a, b| a.0.cmp(&b.0));
            seen.lock().unwrap().push(pair);
            create_strategy("sma_crossover", params)
        },
        &grid,
        &OptimizerConfig::default(),
        None,
    )
    .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 4);
    let distinct: HashSet<String> = seen.iter().map(|p| format!("{:?}", p)).collect();
    assert_eq!(distinct.len(), 4);
    assert_eq!(result.evaluated, 4);
    assert_eq!(result.skipped, 0);
    assert_eq!(result.all_results.len(), 4);
}

#[test]
fn optimizer_reports_the_exact_argmax() {
    let start = start_time();
    let tf = Timeframe::parse("1h").unwrap();
    let candles = generate_synthetic("BTCUSDT", start, 500, &tf, 20_000.0, 99);

    let grid = ParameterGrid::new()
        .add("period", vec![5.0, 9.0, 14.0])
        .add("oversold_level", vec![25.0, 30.0, 35.0]);

    let engine = hourly_engine(EngineConfig::default());
    let config = OptimizerConfig {
        objective: Objective::TotalReturn,
        timeout: None,
    };
    let run = |_: ()| {
        optimize(
            &engine,
            "BTCUSDT",
            &candles,
            |params| create_strategy("rsi", params),
            &grid,
            &config,
            None,
        )
        .unwrap()
    };

    let result = run(());
    for combination in &result.all_results {
        assert!(result.best_metric_value >= combination.objective_value);
    }
    assert!((result.all_results[0].objective_value - result.best_metric_value).abs() < 1e-12);

    // Scheduling must not leak into the output: a second pass is identical.
    let again = run(());
    assert_eq!(result.best_params, again.best_params);
    let order: Vec<String> = result
        .all_results
        .iter()
        .map(|c| format!("{:?}", c.params))
        .collect();
    let order_again: Vec<String> = again
        .all_results
        .iter()
        .map(|c| format!("{:?}", c.params))
        .collect();
    assert_eq!(order, order_again);
}

#[test]
fn empty_candidate_list_fails_before_simulating() {
    let candles = hourly_candles("BTCUSDT", &[100.0; 10]);
    let grid = ParameterGrid::new().add("period", Vec::new());
    let engine = hourly_engine(EngineConfig::default());

    let called = Mutex::new(0usize);
    let result = optimize(
        &engine,
        "BTCUSDT",
        &candles,
        |params| {
            *called.lock().unwrap() += 1;
            create_strategy("rsi", params)
        },
        &grid,
        &OptimizerConfig::default(),
        None,
    );

    assert!(matches!(result, Err(EngineError::Config(_))));
    assert_eq!(*called.lock().unwrap(), 0);
}

#[test]
fn runner_tolerates_failing_cells_and_ranks_the_rest() {
    let start = start_time();
    let tf = Timeframe::parse("1h").unwrap();

    let mut data = MarketData::new();
    data.insert_series(
        "BTCUSDT",
        generate_synthetic("BTCUSDT", start, 600, &tf, 20_000.0, 3),
    );
    data.insert_series(
        "ETHUSDT",
        generate_synthetic("ETHUSDT", start, 600, &tf, 1_500.0, 4),
    );
    // Far too short for any strategy's warmup.
    data.insert_series(
        "DOGEUSDT",
        generate_synthetic("DOGEUSDT", start, 5, &tf, 0.1, 5),
    );

    let symbols = vec![
        "BTCUSDT".to_string(),
        "DOGEUSDT".to_string(),
        "ETHUSDT".to_string(),
    ];
    let strategies = vec![
        StrategySpec::named("sma_crossover"),
        StrategySpec::named("rsi"),
    ];

    let mut runner = BacktestRunner::new(EngineConfig::default(), tf);
    runner.run_all(&data, &symbols, &strategies).unwrap();

    // The short symbol fails per cell without touching its siblings.
    assert_eq!(runner.results().len(), 4);
    assert_eq!(runner.failed_cells(), 2);
    assert_eq!(runner.distinct_symbols(), 2);
    assert_eq!(runner.distinct_strategies(), 2);

    let by_return = runner.rankings_by_return();
    for pair in by_return.windows(2) {
        let a = pair[0].metrics.total_return_pct;
        let b = pair[1].metrics.total_return_pct;
        assert!(a > b || (a == b && pair[0].strategy_name <= pair[1].strategy_name));
    }
    let by_sharpe = runner.rankings_by_sharpe();
    for pair in by_sharpe.windows(2) {
        assert!(pair[0].metrics.sharpe_ratio >= pair[1].metrics.sharpe_ratio);
    }
}

#[test]
fn summary_report_follows_the_contract() {
    let start = start_time();
    let tf = Timeframe::parse("1h").unwrap();

    let mut data = MarketData::new();
    data.insert_series(
        "BTCUSDT",
        generate_synthetic("BTCUSDT", start, 600, &tf, 20_000.0, 11),
    );
    data.insert_series(
        "ETHUSDT",
        generate_synthetic("ETHUSDT", start, 600, &tf, 1_500.0, 12),
    );

    let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    let strategies = vec![
        StrategySpec::named("sma_crossover"),
        StrategySpec::named("rsi"),
    ];

    let mut runner = BacktestRunner::new(EngineConfig::default(), tf);
    runner.run_all(&data, &symbols, &strategies).unwrap();

    let report = runner.generate_summary_report();
    assert!(report.contains("Backtest Summary Report"));
    assert!(report.contains("Total backtests run: 4"));
    assert!(report.contains("Symbols tested: 2"));
    assert!(report.contains("Strategies tested: 2"));
    assert!(report.contains("Top Strategies by Return:"));
    assert!(report.contains("Top Strategies by Risk-Adjusted Return (Sharpe):"));

    // Every ranking line carries the full triple the contract names.
    let top = runner.rankings_by_return()[0];
    let expected = format!(
        "  {} on {}: {:.2}% return, {:.2}% win rate, {} trades",
        top.strategy_name,
        top.symbol,
        top.metrics.total_return_pct,
        top.metrics.win_rate,
        top.metrics.total_trades
    );
    assert!(report.contains(&expected));

    let top_sharpe = runner.rankings_by_sharpe()[0];
    let expected = format!(
        "  {} on {}: Sharpe {:.2}, {:.2}% return, {:.2}% max drawdown",
        top_sharpe.strategy_name,
        top_sharpe.symbol,
        top_sharpe.metrics.sharpe_ratio,
        top_sharpe.metrics.total_return_pct,
        top_sharpe.metrics.max_drawdown_pct
    );
    assert!(report.contains(&expected));
}

#[test]
fn unknown_strategy_name_fails_the_whole_batch_fast() {
    let start = start_time();
    let tf = Timeframe::parse("1h").unwrap();
    let mut data = MarketData::new();
    data.insert_series(
        "BTCUSDT",
        generate_synthetic("BTCUSDT", start, 100, &tf, 20_000.0, 1),
    );

    let mut runner = BacktestRunner::new(EngineConfig::default(), tf);
    let result = runner.run_all(
        &data,
        &["BTCUSDT".to_string()],
        &[StrategySpec::named("nonexistent")],
    );
    assert!(matches!(result, Err(EngineError::Config(_))));
    assert!(runner.results().is_empty());
}

#[test]
fn result_export_contract_field_names() {
    let candles = hourly_candles("BTCUSDT", &[100.0, 100.0, 100.0, 110.0, 110.0]);
    let strategy = FnStrategy::new("scripted", 0, |_: &[Candle], index| {
        Ok(match index {
            2 => Signal::long(1.0),
            3 => Signal::short(1.0),
            _ => Signal::flat(),
        })
    });

    let result = hourly_engine(EngineConfig::default())
        .run("BTCUSDT", &strategy, &candles, None)
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();

    for field in [
        "symbol",
        "strategy_name",
        "start_date",
        "end_date",
        "timeframes",
        "initial_capital",
        "final_equity",
        "trades",
        "equity_curve",
        "metrics",
    ] {
        assert!(json.get(field).is_some(), "missing field {}", field);
    }
    let metrics = json.get("metrics").unwrap();
    for field in [
        "total_return_pct",
        "win_rate",
        "profit_factor",
        "expectancy",
        "avg_win",
        "avg_loss",
        "risk_reward_ratio",
        "max_drawdown_pct",
        "sharpe_ratio",
        "sortino_ratio",
        "calmar_ratio",
        "recovery_factor",
    ] {
        assert!(metrics.get(field).is_some(), "missing metric {}", field);
    }
    let trade = &json.get("trades").unwrap().as_array().unwrap()[0];
    for field in [
        "entry_time",
        "exit_time",
        "side",
        "entry_price",
        "exit_price",
        "quantity",
        "profit_loss",
        "roi_pct",
        "exit_reason",
    ] {
        assert!(trade.get(field).is_some(), "missing trade field {}", field);
    }
}
