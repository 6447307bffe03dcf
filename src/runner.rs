use crate::analysis::{MultiTimeframeAnalyzer, TimeframeSpec};
use crate::data::MarketData;
use crate::engine::{BacktestEngine, EngineConfig};
use crate::error::{EngineError, Result};
use crate::models::BacktestResult;
use crate::resample::Timeframe;
use crate::strategy::create_strategy;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::thread;

/// A named strategy with its parameter map; one cell of the comparison is a
/// (symbol, StrategySpec) pair.
#[derive(Debug, Clone)]
pub struct StrategySpec {
    pub name: String,
    pub params: HashMap<String, f64>,
}

impl StrategySpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: HashMap::new(),
        }
    }
}

struct CellTask {
    symbol: String,
    spec: StrategySpec,
}

struct CellResultMsg {
    symbol: String,
    strategy_name: String,
    run: std::result::Result<BacktestResult, String>,
}

/// Orchestrates the symbols x strategies cross product. The only component
/// holding cross-run state: the accumulated results used for rankings.
pub struct BacktestRunner {
    engine_config: EngineConfig,
    timeframe: Timeframe,
    higher_timeframes: Vec<TimeframeSpec>,
    results: Vec<BacktestResult>,
    failed_cells: usize,
}

impl BacktestRunner {
    pub fn new(engine_config: EngineConfig, timeframe: Timeframe) -> Self {
        Self {
            engine_config,
            timeframe,
            higher_timeframes: Vec::new(),
            results: Vec::new(),
            failed_cells: 0,
        }
    }

    /// Require higher-timeframe agreement for entries in every cell.
    pub fn with_higher_timeframes(mut self, specs: Vec<TimeframeSpec>) -> Self {
        self.higher_timeframes = specs;
        self
    }

    pub fn results(&self) -> &[BacktestResult] {
        &self.results
    }

    pub fn failed_cells(&self) -> usize {
        self.failed_cells
    }

    /// Run every (symbol, strategy) cell. A failing cell is logged and
    /// excluded; its siblings continue. Results are accumulated across
    /// calls and ordered by (symbol, strategy) regardless of completion
    /// order.
    pub fn run_all(
        &mut self,
        data: &MarketData,
        symbols: &[String],
        strategies: &[StrategySpec],
    ) -> Result<()> {
        if symbols.is_empty() || strategies.is_empty() {
            return Err(EngineError::Config(
                "Runner needs at least one symbol and one strategy".to_string(),
            ));
        }
        for spec in strategies {
            // Unknown strategy names fail fast, before any simulation.
            create_strategy(&spec.name, &spec.params)?;
        }

        let mut tasks = Vec::new();
        let mut shared_series: HashMap<String, Arc<Vec<crate::models::Candle>>> = HashMap::new();
        for symbol in symbols {
            match data.series(symbol, 1) {
                Ok(series) => {
                    shared_series.insert(symbol.clone(), Arc::new(series.to_vec()));
                }
                Err(error) => {
                    warn!("Skipping {}: {}", symbol, error);
                    self.failed_cells += strategies.len();
                    continue;
                }
            }
            for spec in strategies {
                tasks.push(CellTask {
                    symbol: symbol.clone(),
                    spec: spec.clone(),
                });
            }
        }
        if tasks.is_empty() {
            return Err(EngineError::Data(
                "No symbol had any candle history".to_string(),
            ));
        }

        let total = tasks.len();
        let num_workers = total.min(num_cpus::get().max(1));
        info!(
            "Running {} backtest cells on {} worker threads",
            total, num_workers
        );

        let (task_tx, task_rx): (Sender<CellTask>, Receiver<CellTask>) = bounded(total);
        let (result_tx, result_rx): (Sender<CellResultMsg>, Receiver<CellResultMsg>) =
            bounded(total);

        let engine_config = self.engine_config.clone();
        let timeframe = self.timeframe.clone();
        let higher = self.higher_timeframes.clone();
        let shared_series = Arc::new(shared_series);

        let mut handles = Vec::new();
        for _ in 0..num_workers {
            let rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let engine_config = engine_config.clone();
            let timeframe = timeframe.clone();
            let higher = higher.clone();
            let shared_series = shared_series.clone();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let run = run_cell(
                        &engine_config,
                        &timeframe,
                        &higher,
                        &shared_series,
                        &task,
                    )
                    .map_err(|e| e.to_string());
                    let message = CellResultMsg {
                        symbol: task.symbol,
                        strategy_name: task.spec.name,
                        run,
                    };
                    if result_tx.send(message).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }

        for task in tasks {
            task_tx
                .send(task)
                .map_err(|e| EngineError::Data(format!("Worker queue closed: {}", e)))?;
        }
        drop(task_tx);
        drop(result_tx);

        let mut completed = 0usize;
        while let Ok(message) = result_rx.recv() {
            completed += 1;
            match message.run {
                Ok(result) => {
                    info!(
                        "Completed {} on {} ({}/{}): {:.2}% return, {} trades",
                        message.strategy_name,
                        message.symbol,
                        completed,
                        total,
                        result.metrics.total_return_pct,
                        result.metrics.total_trades
                    );
                    self.results.push(result);
                }
                Err(error) => {
                    warn!(
                        "Backtest failed for {} on {}: {}",
                        message.strategy_name, message.symbol, error
                    );
                    self.failed_cells += 1;
                }
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        // Completion order depends on scheduling; the stored order must not.
        self.results
            .sort_by(|a, b| (a.symbol.as_str(), a.strategy_name.as_str())
                .cmp(&(b.symbol.as_str(), b.strategy_name.as_str())));

        Ok(())
    }

    /// Results ranked by total return, descending; ties alphabetical by
    /// strategy name, then symbol.
    pub fn rankings_by_return(&self) -> Vec<&BacktestResult> {
        self.ranked_by(|r| r.metrics.total_return_pct)
    }

    /// Results ranked by Sharpe ratio, descending; ties alphabetical by
    /// strategy name, then symbol.
    pub fn rankings_by_sharpe(&self) -> Vec<&BacktestResult> {
        self.ranked_by(|r| r.metrics.sharpe_ratio)
    }

    fn ranked_by<F>(&self, metric: F) -> Vec<&BacktestResult>
    where
        F: Fn(&BacktestResult) -> f64,
    {
        let mut ranked: Vec<&BacktestResult> = self.results.iter().collect();
        ranked.sort_by(|a, b| {
            let ma = guard_nan(metric(a));
            let mb = guard_nan(metric(b));
            mb.partial_cmp(&ma)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.strategy_name.cmp(&b.strategy_name))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ranked
    }

    pub fn distinct_symbols(&self) -> usize {
        self.results
            .iter()
            .map(|r| r.symbol.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn distinct_strategies(&self) -> usize {
        self.results
            .iter()
            .map(|r| r.strategy_name.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Human-readable comparison summary consumed as-is by reporting tools.
    pub fn generate_summary_report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "Backtest Summary Report");
        let _ = writeln!(report, "=======================");
        let _ = writeln!(report, "Total backtests run: {}", self.results.len());
        let _ = writeln!(report, "Symbols tested: {}", self.distinct_symbols());
        let _ = writeln!(report, "Strategies tested: {}", self.distinct_strategies());
        let _ = writeln!(report);

        let _ = writeln!(report, "Top Strategies by Return:");
        for result in self.rankings_by_return().iter().take(5) {
            let _ = writeln!(
                report,
                "  {} on {}: {:.2}% return, {:.2}% win rate, {} trades",
                result.strategy_name,
                result.symbol,
                result.metrics.total_return_pct,
                result.metrics.win_rate,
                result.metrics.total_trades
            );
        }
        let _ = writeln!(report);

        let _ = writeln!(report, "Top Strategies by Risk-Adjusted Return (Sharpe):");
        for result in self.rankings_by_sharpe().iter().take(5) {
            let _ = writeln!(
                report,
                "  {} on {}: Sharpe {:.2}, {:.2}% return, {:.2}% max drawdown",
                result.strategy_name,
                result.symbol,
                result.metrics.sharpe_ratio,
                result.metrics.total_return_pct,
                result.metrics.max_drawdown_pct
            );
        }

        report
    }
}

fn guard_nan(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

fn run_cell(
    engine_config: &EngineConfig,
    timeframe: &Timeframe,
    higher: &[TimeframeSpec],
    shared_series: &HashMap<String, Arc<Vec<crate::models::Candle>>>,
    task: &CellTask,
) -> Result<BacktestResult> {
    let candles = shared_series
        .get(&task.symbol)
        .ok_or_else(|| EngineError::Data(format!("No candle history for {}", task.symbol)))?;

    let strategy = create_strategy(&task.spec.name, &task.spec.params)?;
    let engine = BacktestEngine::new(engine_config.clone(), timeframe.clone())?;

    let analyzer = if higher.is_empty() {
        None
    } else {
        Some(MultiTimeframeAnalyzer::new(higher.to_vec(), candles)?)
    };

    engine.run(&task.symbol, strategy.as_ref(), candles, analyzer.as_ref())
}
