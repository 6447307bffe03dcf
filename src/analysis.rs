use crate::error::{EngineError, Result};
use crate::models::{Candle, ConsolidatedBias, Direction, Signal};
use crate::resample::{resample, Timeframe};
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};

/// One higher timeframe participating in consolidation, with its vote
/// weight.
#[derive(Debug, Clone)]
pub struct TimeframeSpec {
    pub timeframe: Timeframe,
    pub weight: f64,
}

impl TimeframeSpec {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            weight: 1.0,
        }
    }

    pub fn with_weight(timeframe: Timeframe, weight: f64) -> Self {
        Self { timeframe, weight }
    }
}

/// Aggregates a base candle series into several timeframes and consolidates
/// per-timeframe directional bias into a single vote. The consolidated bias
/// gates whether the simulator may open a new position on the base
/// timeframe.
pub struct MultiTimeframeAnalyzer {
    specs: Vec<TimeframeSpec>,
    series: Vec<Vec<Candle>>,
}

impl MultiTimeframeAnalyzer {
    /// Resamples `base` once per configured timeframe. Weights must be
    /// positive and at least one timeframe is required.
    pub fn new(specs: Vec<TimeframeSpec>, base: &[Candle]) -> Result<Self> {
        if specs.is_empty() {
            return Err(EngineError::Config(
                "Multi-timeframe analysis requires at least one timeframe".to_string(),
            ));
        }
        if let Some(bad) = specs.iter().find(|s| !(s.weight > 0.0)) {
            return Err(EngineError::Config(format!(
                "Timeframe {} has non-positive weight {}",
                bad.timeframe.label(),
                bad.weight
            )));
        }

        let series = specs
            .iter()
            .map(|spec| resample(base, &spec.timeframe))
            .collect();

        Ok(Self { specs, series })
    }

    pub fn timeframe_labels(&self) -> Vec<String> {
        self.specs
            .iter()
            .map(|s| s.timeframe.label().to_string())
            .collect()
    }

    /// Weighted-majority consolidation as of `timestamp`. Each timeframe's
    /// signal comes from its last fully closed bucket (an open bucket would
    /// leak data from inside the current base bar). Bullish weight against
    /// bearish weight, neutral contributes nothing, ties resolve neutral.
    pub fn consolidated_bias(
        &self,
        strategy: &dyn Strategy,
        timestamp: DateTime<Utc>,
    ) -> Result<ConsolidatedBias> {
        let mut bullish_weight = 0.0;
        let mut bearish_weight = 0.0;

        for (spec, series) in self.specs.iter().zip(self.series.iter()) {
            let Some(index) = last_closed_index(series, &spec.timeframe, timestamp) else {
                continue;
            };
            let signal = strategy.generate_signal(series, index)?;
            match classify(&signal) {
                ConsolidatedBias::Bullish => bullish_weight += spec.weight,
                ConsolidatedBias::Bearish => bearish_weight += spec.weight,
                ConsolidatedBias::Neutral => {}
            }
        }

        if bullish_weight > bearish_weight {
            Ok(ConsolidatedBias::Bullish)
        } else if bearish_weight > bullish_weight {
            Ok(ConsolidatedBias::Bearish)
        } else {
            Ok(ConsolidatedBias::Neutral)
        }
    }
}

/// Index of the last bucket whose window closed at or before `timestamp`.
fn last_closed_index(
    series: &[Candle],
    timeframe: &Timeframe,
    timestamp: DateTime<Utc>,
) -> Option<usize> {
    let cutoff = timestamp.timestamp();
    let closed = series.partition_point(|c| c.timestamp.timestamp() + timeframe.seconds() <= cutoff);
    closed.checked_sub(1)
}

pub fn classify(signal: &Signal) -> ConsolidatedBias {
    match signal.direction {
        Direction::Long => ConsolidatedBias::Bullish,
        Direction::Short => ConsolidatedBias::Bearish,
        Direction::Flat => ConsolidatedBias::Neutral,
    }
}
