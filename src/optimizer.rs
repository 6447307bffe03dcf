use crate::analysis::MultiTimeframeAnalyzer;
use crate::engine::BacktestEngine;
use crate::error::{EngineError, Result};
use crate::models::{Candle, CombinationResult, Metrics, OptimizationResult};
use crate::strategy::Strategy;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Objective metric a grid search ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Sharpe,
    TotalReturn,
    ProfitFactor,
    Calmar,
    WinRate,
}

impl Objective {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(Self::Sharpe),
            "return" | "total_return" | "total_return_pct" => Ok(Self::TotalReturn),
            "profit_factor" => Ok(Self::ProfitFactor),
            "calmar" | "calmar_ratio" => Ok(Self::Calmar),
            "win_rate" => Ok(Self::WinRate),
            other => Err(EngineError::Config(format!(
                "Unknown optimization objective '{}'",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Sharpe => "sharpe_ratio",
            Self::TotalReturn => "total_return_pct",
            Self::ProfitFactor => "profit_factor",
            Self::Calmar => "calmar_ratio",
            Self::WinRate => "win_rate",
        }
    }

    pub fn score(self, metrics: &Metrics) -> f64 {
        let value = match self {
            Self::Sharpe => metrics.sharpe_ratio,
            Self::TotalReturn => metrics.total_return_pct,
            Self::ProfitFactor => metrics.profit_factor,
            Self::Calmar => metrics.calmar_ratio,
            Self::WinRate => metrics.win_rate,
        };
        // NaN never outranks a real score; +inf sentinels stay comparable.
        if value.is_nan() {
            f64::NEG_INFINITY
        } else {
            value
        }
    }
}

/// Ordered parameter-name -> candidate-values schema. The Cartesian product
/// of candidates defines the search space.
#[derive(Debug, Clone, Default)]
pub struct ParameterGrid {
    entries: Vec<(String, Vec<f64>)>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: &str, candidates: Vec<f64>) -> Self {
        self.entries.push((name.to_string(), candidates));
        self
    }

    pub fn from_entries(entries: Vec<(String, Vec<f64>)>) -> Self {
        Self { entries }
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(EngineError::Config(
                "Parameter grid has no parameters".to_string(),
            ));
        }
        for (name, candidates) in &self.entries {
            if candidates.is_empty() {
                return Err(EngineError::Config(format!(
                    "Parameter '{}' has an empty candidate list",
                    name
                )));
            }
            if let Some(bad) = candidates.iter().find(|v| !v.is_finite()) {
                return Err(EngineError::Config(format!(
                    "Parameter '{}' has a non-finite candidate {}",
                    name, bad
                )));
            }
        }
        Ok(())
    }

    pub fn combination_count(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, candidates)| candidates.len())
            .product()
    }

    /// Full Cartesian product in deterministic order: parameter names sorted
    /// lexicographically, the first name as the most significant digit and
    /// the last cycling fastest.
    pub fn combinations(&self) -> Vec<Vec<(String, f64)>> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let total = sorted
            .iter()
            .map(|(_, candidates)| candidates.len())
            .product();
        let mut combos = Vec::with_capacity(total);
        let mut indices = vec![0usize; sorted.len()];

        loop {
            combos.push(
                sorted
                    .iter()
                    .zip(indices.iter())
                    .map(|((name, candidates), &i)| (name.clone(), candidates[i]))
                    .collect(),
            );

            // Odometer increment, last position fastest.
            let mut pos = sorted.len();
            loop {
                if pos == 0 {
                    return combos;
                }
                pos -= 1;
                indices[pos] += 1;
                if indices[pos] < sorted[pos].1.len() {
                    break;
                }
                indices[pos] = 0;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub objective: Objective,
    /// Wall-clock budget. Combinations not yet started when it elapses are
    /// skipped and counted, finished results are kept.
    pub timeout: Option<Duration>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Sharpe,
            timeout: None,
        }
    }
}

/// Exhaustive grid search. Each combination runs through its own engine pass
/// over the same read-only candles; combinations share no mutable state, so
/// evaluation parallelizes freely while the reported ordering stays
/// deterministic.
pub fn optimize<F>(
    engine: &BacktestEngine,
    symbol: &str,
    candles: &[Candle],
    strategy_factory: F,
    grid: &ParameterGrid,
    config: &OptimizerConfig,
    analyzer: Option<&MultiTimeframeAnalyzer>,
) -> Result<OptimizationResult>
where
    F: Fn(&HashMap<String, f64>) -> Result<Box<dyn Strategy>> + Sync,
{
    grid.validate()?;

    let combos = grid.combinations();
    info!(
        "Optimizing {} over {} combinations (objective: {})",
        symbol,
        combos.len(),
        config.objective.label()
    );

    let progress = ProgressBar::new(combos.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} combinations ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let deadline = config.timeout.map(|t| Instant::now() + t);
    let objective = config.objective;

    #[derive(Debug)]
    enum Outcome {
        Done(CombinationResult),
        Failed,
        Skipped,
    }

    let outcomes: Vec<Outcome> = combos
        .par_iter()
        .map(|combo| {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    progress.inc(1);
                    return Outcome::Skipped;
                }
            }

            let params: HashMap<String, f64> = combo.iter().cloned().collect();
            let run = strategy_factory(&params)
                .and_then(|strategy| engine.run(symbol, strategy.as_ref(), candles, analyzer));
            progress.inc(1);

            match run {
                Ok(result) => Outcome::Done(CombinationResult {
                    params: combo.clone(),
                    objective_value: objective.score(&result.metrics),
                    metrics: result.metrics,
                }),
                Err(error) => {
                    warn!("Combination {:?} failed: {}", combo, error);
                    Outcome::Failed
                }
            }
        })
        .collect();
    progress.finish_and_clear();

    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Skipped))
        .count();

    // Argmax in enumeration order: strictly greater wins, so ties keep the
    // earliest-enumerated combination.
    let mut best: Option<&CombinationResult> = None;
    for outcome in &outcomes {
        if let Outcome::Done(result) = outcome {
            if best.map(|b| result.objective_value > b.objective_value).unwrap_or(true) {
                best = Some(result);
            }
        }
    }
    let best = best.ok_or_else(|| {
        EngineError::Data(format!(
            "No grid combination produced a result for {}",
            symbol
        ))
    })?;
    let best_params = best.params.clone();
    let best_metric_value = best.objective_value;

    let mut all_results: Vec<CombinationResult> = outcomes
        .into_iter()
        .filter_map(|o| match o {
            Outcome::Done(result) => Some(result),
            _ => None,
        })
        .collect();
    let evaluated = all_results.len();
    // Stable sort: equal scores stay in enumeration order.
    all_results.sort_by(|a, b| {
        b.objective_value
            .partial_cmp(&a.objective_value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if skipped > 0 {
        warn!(
            "Optimization deadline reached: {} of {} combinations skipped",
            skipped,
            combos.len()
        );
    }

    Ok(OptimizationResult {
        best_params,
        best_metric_value,
        evaluated,
        skipped,
        all_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_grids_before_running() {
        assert!(matches!(
            ParameterGrid::new().validate(),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            ParameterGrid::new().add("period", Vec::new()).validate(),
            Err(EngineError::Config(_))
        ));
        assert!(ParameterGrid::new().add("period", vec![5.0]).validate().is_ok());
    }

    #[test]
    fn enumerates_the_cartesian_product_once_in_sorted_order() {
        let grid = ParameterGrid::new()
            .add("short_period", vec![5.0, 10.0])
            .add("long_period", vec![20.0, 30.0]);

        let combos = grid.combinations();
        assert_eq!(combos.len(), 4);
        assert_eq!(grid.combination_count(), 4);

        // long_period sorts before short_period and is most significant.
        let expected = [
            vec![("long_period", 20.0), ("short_period", 5.0)],
            vec![("long_period", 20.0), ("short_period", 10.0)],
            vec![("long_period", 30.0), ("short_period", 5.0)],
            vec![("long_period", 30.0), ("short_period", 10.0)],
        ];
        for (combo, expected) in combos.iter().zip(expected.iter()) {
            let actual: Vec<(&str, f64)> =
                combo.iter().map(|(n, v)| (n.as_str(), *v)).collect();
            assert_eq!(&actual, expected);
        }
    }

    #[test]
    fn objective_parsing_and_nan_guard() {
        assert_eq!(Objective::parse("sharpe").unwrap(), Objective::Sharpe);
        assert_eq!(
            Objective::parse("total_return_pct").unwrap(),
            Objective::TotalReturn
        );
        assert!(Objective::parse("alpha").is_err());

        let mut metrics = Metrics::empty();
        metrics.sharpe_ratio = f64::NAN;
        assert_eq!(Objective::Sharpe.score(&metrics), f64::NEG_INFINITY);
        metrics.profit_factor = f64::INFINITY;
        assert_eq!(Objective::ProfitFactor.score(&metrics), f64::INFINITY);
    }
}
