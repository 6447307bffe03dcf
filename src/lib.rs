pub mod analysis;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod optimizer;
pub mod params;
pub mod performance;
pub mod resample;
pub mod runner;
pub mod strategy;

pub use analysis::{MultiTimeframeAnalyzer, TimeframeSpec};
pub use data::MarketData;
pub use engine::{BacktestEngine, EngineConfig, IntrabarPolicy, Sizing};
pub use error::{EngineError, Result};
pub use models::{
    BacktestResult, Candle, ConsolidatedBias, Direction, EquityPoint, Metrics,
    OptimizationResult, Signal, Side, Trade,
};
pub use optimizer::{optimize, Objective, OptimizerConfig, ParameterGrid};
pub use performance::PerformanceCalculator;
pub use resample::{resample, Timeframe};
pub use runner::{BacktestRunner, StrategySpec};
pub use strategy::{create_strategy, FnStrategy, Strategy};
