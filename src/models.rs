use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_complete() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// False only on a resampled trailing bucket that the base series did not
    /// fill to the end of its window.
    #[serde(default = "default_complete")]
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Flat => "flat",
        }
    }
}

/// Per-candle output of a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub confidence: Option<f64>,
}

impl Signal {
    pub fn long(confidence: f64) -> Self {
        Self {
            direction: Direction::Long,
            confidence: Some(confidence),
        }
    }

    pub fn short(confidence: f64) -> Self {
        Self {
            direction: Direction::Short,
            confidence: Some(confidence),
        }
    }

    pub fn flat() -> Self {
        Self {
            direction: Direction::Flat,
            confidence: None,
        }
    }
}

/// Cross-timeframe directional agreement. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsolidatedBias {
    Bullish,
    Bearish,
    Neutral,
}

impl ConsolidatedBias {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidatedBias::Bullish => "bullish",
            ConsolidatedBias::Bearish => "bearish",
            ConsolidatedBias::Neutral => "neutral",
        }
    }

    pub fn allows_entry(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (ConsolidatedBias::Bullish, Side::Long) | (ConsolidatedBias::Bearish, Side::Short)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// +1 for long exposure, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// Open exposure held by one simulation run. At most one exists per run.
#[derive(Debug, Clone)]
pub struct Position {
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
}

impl Position {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }
}

/// A closed round trip. Immutable once the position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub profit_loss: f64,
    pub roi_pct: f64,
    pub exit_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Risk-adjusted performance record. Recomputed from scratch each time,
/// never mutated incrementally. Field names are the export contract read by
/// the report renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub total_return_pct: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub risk_reward_ratio: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub recovery_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
}

impl Metrics {
    /// All-zero record for a run that produced no trades.
    pub fn empty() -> Self {
        Self {
            total_return_pct: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            expectancy: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            risk_reward_ratio: 0.0,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            recovery_factor: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            breakeven_trades: 0,
        }
    }
}

/// Outcome of one simulation run. Owned by that run, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub timeframes: Vec<String>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
    /// Chart-name -> image-path mapping attached by an external visualization
    /// collaborator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charts: Option<HashMap<String, String>>,
}

/// One evaluated grid combination with its metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationResult {
    pub params: Vec<(String, f64)>,
    pub metrics: Metrics,
    pub objective_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_params: Vec<(String, f64)>,
    pub best_metric_value: f64,
    pub evaluated: usize,
    /// Combinations skipped because the optimization deadline passed before
    /// they were started.
    pub skipped: usize,
    pub all_results: Vec<CombinationResult>,
}
