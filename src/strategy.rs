use crate::error::{EngineError, Result};
use crate::models::{Candle, Signal};
use std::collections::HashMap;

/// Signal-producing capability. Implementations look only at candles up to
/// and including `index`; the engine feeds indices in chronological order.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn generate_signal(&self, candles: &[Candle], index: usize) -> Result<Signal>;
    /// Bars of history required before the strategy emits non-flat signals.
    fn min_data_points(&self) -> usize;
}

#[path = "strategies/sma_crossover.rs"]
pub mod sma_crossover;

pub use sma_crossover::SmaCrossoverStrategy;

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::RsiStrategy;

#[path = "strategies/bollinger.rs"]
pub mod bollinger;

pub use bollinger::BollingerStrategy;

#[path = "strategies/macd.rs"]
pub mod macd;

pub use macd::MacdStrategy;

/// Custom strategy built from a closure; the escape hatch for callers that
/// need behavior outside the named registry.
pub struct FnStrategy<F> {
    name: String,
    min_data_points: usize,
    f: F,
}

impl<F> FnStrategy<F>
where
    F: Fn(&[Candle], usize) -> Result<Signal> + Send + Sync,
{
    pub fn new(name: &str, min_data_points: usize, f: F) -> Self {
        Self {
            name: name.to_string(),
            min_data_points,
            f,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: Fn(&[Candle], usize) -> Result<Signal> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, candles: &[Candle], index: usize) -> Result<Signal> {
        (self.f)(candles, index)
    }

    fn min_data_points(&self) -> usize {
        self.min_data_points
    }
}

/// Instantiate a registered strategy by name.
pub fn create_strategy(
    name: &str,
    parameters: &HashMap<String, f64>,
) -> Result<Box<dyn Strategy>> {
    match name {
        "sma_crossover" => Ok(Box::new(SmaCrossoverStrategy::new(parameters))),
        "rsi" => Ok(Box::new(RsiStrategy::new(parameters))),
        "bollinger" => Ok(Box::new(BollingerStrategy::new(parameters))),
        "macd" => Ok(Box::new(MacdStrategy::new(parameters))),
        _ => Err(EngineError::Config(format!("Unknown strategy: {}", name))),
    }
}

pub fn registered_strategies() -> &'static [&'static str] {
    &["sma_crossover", "rsi", "bollinger", "macd"]
}
