use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use stratbench::analysis::TimeframeSpec;
use stratbench::data::{generate_synthetic, MarketData};
use stratbench::engine::{BacktestEngine, EngineConfig, IntrabarPolicy};
use stratbench::optimizer::{optimize, Objective, OptimizerConfig, ParameterGrid};
use stratbench::resample::Timeframe;
use stratbench::runner::{BacktestRunner, StrategySpec};
use stratbench::strategy::{create_strategy, registered_strategies, Strategy};
use stratbench::MultiTimeframeAnalyzer;

#[derive(Parser)]
#[command(name = "stratbench")]
#[command(about = "Backtest, optimize and compare trading strategies on historical candles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one strategy on one symbol and print the result as JSON
    Backtest {
        /// Path to a JSON candle snapshot
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Symbol to simulate
        #[arg(long)]
        symbol: String,
        /// Registered strategy name
        #[arg(long)]
        strategy: String,
        /// Strategy parameters as a JSON object of numbers
        #[arg(long, default_value = "{}")]
        params: String,
        /// Base timeframe of the candle data
        #[arg(long, default_value = "1h")]
        timeframe: String,
        /// Higher timeframes that must agree before entries, comma separated
        #[arg(long, value_delimiter = ',')]
        higher_timeframes: Vec<String>,
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        /// Commission rate as a fraction of notional
        #[arg(long, default_value_t = 0.0)]
        commission: f64,
        /// Stop loss as a fraction of entry price
        #[arg(long)]
        stop_loss: Option<f64>,
        /// Take profit as a fraction of entry price
        #[arg(long)]
        take_profit: Option<f64>,
        /// Allow short positions
        #[arg(long)]
        allow_short: bool,
        /// Assume the target fills before the stop when both sit in one bar
        #[arg(long)]
        target_first: bool,
        /// Write the full result JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Grid-search strategy parameters on one symbol
    Optimize {
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        strategy: String,
        /// Candidate grid as JSON, e.g. '{"period":[10,14],"oversold_level":[20,30]}'
        #[arg(long)]
        grid: String,
        /// Objective metric: sharpe, total_return, profit_factor, calmar, win_rate
        #[arg(long, default_value = "sharpe")]
        objective: String,
        /// Abandon combinations not started after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        #[arg(long, default_value_t = 0.0)]
        commission: f64,
    },
    /// Backtest every strategy on every symbol and print the comparison
    Compare {
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Symbols to test, comma separated; defaults to every symbol in the
        /// snapshot
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Strategies to test, comma separated; defaults to the full registry
        #[arg(long, value_delimiter = ',')]
        strategies: Vec<String>,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[arg(long, value_delimiter = ',')]
        higher_timeframes: Vec<String>,
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        #[arg(long, default_value_t = 0.0)]
        commission: f64,
    },
    /// Generate a deterministic synthetic candle snapshot
    Synth {
        /// Symbols to generate, comma separated
        #[arg(long, value_delimiter = ',', default_value = "BTCUSDT")]
        symbols: Vec<String>,
        #[arg(long, default_value_t = 1_000)]
        candles: usize,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[arg(long, default_value_t = 20_000.0)]
        base_price: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest {
            data_file,
            symbol,
            strategy,
            params,
            timeframe,
            higher_timeframes,
            capital,
            commission,
            stop_loss,
            take_profit,
            allow_short,
            target_first,
            output,
        } => {
            let data = MarketData::load_snapshot(&data_file)?;
            let timeframe = Timeframe::parse(&timeframe)?;
            let params: HashMap<String, f64> =
                serde_json::from_str(&params).context("--params must be a JSON number map")?;
            let strategy = create_strategy(&strategy, &params)?;

            let config = EngineConfig {
                initial_capital: capital,
                commission_rate: commission,
                stop_loss_pct: stop_loss,
                take_profit_pct: take_profit,
                allow_short,
                intrabar_policy: if target_first {
                    IntrabarPolicy::TargetFirst
                } else {
                    IntrabarPolicy::StopFirst
                },
                ..EngineConfig::default()
            };
            let engine = BacktestEngine::new(config, timeframe)?;

            let candles = data.series(&symbol, strategy.min_data_points())?;
            let analyzer = build_analyzer(&higher_timeframes, candles)?;
            let result = engine.run(&symbol, strategy.as_ref(), candles, analyzer.as_ref())?;

            info!(
                "{} on {}: {:.2}% return, {} trades, Sharpe {:.2}",
                result.strategy_name,
                result.symbol,
                result.metrics.total_return_pct,
                result.metrics.total_trades,
                result.metrics.sharpe_ratio
            );
            let json = serde_json::to_string_pretty(&result)?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{}", json),
            }
        }
        Commands::Optimize {
            data_file,
            symbol,
            strategy,
            grid,
            objective,
            timeout_secs,
            timeframe,
            capital,
            commission,
        } => {
            let data = MarketData::load_snapshot(&data_file)?;
            let timeframe = Timeframe::parse(&timeframe)?;
            let entries: Vec<(String, Vec<f64>)> = {
                let raw: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(&grid).context("--grid must be a JSON object")?;
                raw.into_iter()
                    .map(|(name, value)| {
                        let candidates: Vec<f64> = serde_json::from_value(value)
                            .with_context(|| format!("grid entry '{}' must be a number array", name))?;
                        Ok((name, candidates))
                    })
                    .collect::<Result<_>>()?
            };
            let grid = ParameterGrid::from_entries(entries);

            let config = EngineConfig {
                initial_capital: capital,
                commission_rate: commission,
                ..EngineConfig::default()
            };
            let engine = BacktestEngine::new(config, timeframe)?;
            let optimizer_config = OptimizerConfig {
                objective: Objective::parse(&objective)?,
                timeout: timeout_secs.map(Duration::from_secs),
            };

            let candles = data.series(&symbol, 2)?;
            let strategy_name = strategy.clone();
            let result = optimize(
                &engine,
                &symbol,
                candles,
                |params| create_strategy(&strategy_name, params),
                &grid,
                &optimizer_config,
                None,
            )?;

            info!(
                "Best {} = {:.4} over {} combinations ({} skipped)",
                optimizer_config.objective.label(),
                result.best_metric_value,
                result.evaluated,
                result.skipped
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Compare {
            data_file,
            symbols,
            strategies,
            timeframe,
            higher_timeframes,
            capital,
            commission,
        } => {
            let data = MarketData::load_snapshot(&data_file)?;
            let timeframe = Timeframe::parse(&timeframe)?;
            let symbols = if symbols.is_empty() {
                data.symbols()
            } else {
                symbols
            };
            let strategies: Vec<StrategySpec> = if strategies.is_empty() {
                registered_strategies()
                    .iter()
                    .map(|name| StrategySpec::named(name))
                    .collect()
            } else {
                strategies
                    .iter()
                    .map(|name| StrategySpec::named(name))
                    .collect()
            };

            let config = EngineConfig {
                initial_capital: capital,
                commission_rate: commission,
                ..EngineConfig::default()
            };
            let mut runner = BacktestRunner::new(config, timeframe);
            if !higher_timeframes.is_empty() {
                let specs = higher_timeframes
                    .iter()
                    .map(|spec| Ok(TimeframeSpec::new(Timeframe::parse(spec)?)))
                    .collect::<Result<Vec<_>, stratbench::EngineError>>()?;
                runner = runner.with_higher_timeframes(specs);
            }

            runner.run_all(&data, &symbols, &strategies)?;
            if runner.results().is_empty() {
                return Err(anyhow!("Every backtest cell failed"));
            }
            println!("{}", runner.generate_summary_report());
        }
        Commands::Synth {
            symbols,
            candles,
            timeframe,
            base_price,
            seed,
            output,
        } => {
            let timeframe = Timeframe::parse(&timeframe)?;
            let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

            let mut data = MarketData::new();
            for (index, symbol) in symbols.iter().enumerate() {
                let series = generate_synthetic(
                    symbol,
                    start,
                    candles,
                    &timeframe,
                    base_price,
                    seed.wrapping_add(index as u64),
                );
                data.insert_series(symbol, series);
            }
            data.save_snapshot(&output)?;
            info!(
                "Wrote {} candles for {} symbols to {}",
                data.total_candles(),
                symbols.len(),
                output.display()
            );
        }
    }

    Ok(())
}

fn build_analyzer(
    higher_timeframes: &[String],
    candles: &[stratbench::Candle],
) -> Result<Option<MultiTimeframeAnalyzer>> {
    if higher_timeframes.is_empty() {
        return Ok(None);
    }
    let specs = higher_timeframes
        .iter()
        .map(|spec| Ok(TimeframeSpec::new(Timeframe::parse(spec)?)))
        .collect::<Result<Vec<_>, stratbench::EngineError>>()?;
    Ok(Some(MultiTimeframeAnalyzer::new(specs, candles)?))
}
