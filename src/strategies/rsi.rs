use crate::error::Result;
use crate::indicators;
use crate::models::{Candle, Signal};
use crate::params::{get_param_f64, get_param_usize};
use std::collections::HashMap;

pub struct RsiStrategy {
    name: String,
    period: usize,
    oversold_level: f64,
    overbought_level: f64,
}

impl RsiStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let period = get_param_usize(parameters, "period", 14);
        let oversold_level = get_param_f64(parameters, "oversold_level", 30.0);
        let overbought_level = get_param_f64(parameters, "overbought_level", 70.0);
        Self {
            name: "rsi".to_string(),
            period,
            oversold_level,
            overbought_level,
        }
    }
}

impl super::Strategy for RsiStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, candles: &[Candle], index: usize) -> Result<Signal> {
        let n = candles.len();
        if n < self.period + 2 || index < self.period + 1 || index >= n {
            return Ok(Signal::flat());
        }

        let prices: Vec<f64> = candles[..=index].iter().map(|c| c.close).collect();
        let rsi = indicators::calculate_rsi(&prices, self.period);
        let current = rsi[rsi.len() - 1];
        let previous = rsi[rsi.len() - 2];

        // Recovery up through the oversold level is bullish.
        if previous < self.oversold_level && current > self.oversold_level {
            let confidence = ((current - self.oversold_level) / self.oversold_level + 0.5).min(1.0);
            return Ok(Signal::long(confidence));
        }

        // Falling back down through the overbought level is bearish.
        if previous > self.overbought_level && current < self.overbought_level {
            let confidence = ((self.overbought_level - current)
                / (100.0 - self.overbought_level)
                + 0.5)
                .min(1.0);
            return Ok(Signal::short(confidence));
        }

        Ok(Signal::flat())
    }

    fn min_data_points(&self) -> usize {
        self.period + 2
    }
}
