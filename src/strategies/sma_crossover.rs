use crate::error::Result;
use crate::indicators;
use crate::models::{Candle, Signal};
use crate::params::{get_param_usize, get_param_usize_at_least};
use std::collections::HashMap;

pub struct SmaCrossoverStrategy {
    name: String,
    short_period: usize,
    long_period: usize,
}

impl SmaCrossoverStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let short_period = get_param_usize(parameters, "short_period", 10);
        let long_period = get_param_usize_at_least(parameters, "long_period", 30, short_period + 1);
        Self {
            name: "sma_crossover".to_string(),
            short_period,
            long_period,
        }
    }
}

impl super::Strategy for SmaCrossoverStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, candles: &[Candle], index: usize) -> Result<Signal> {
        if index < self.long_period || index >= candles.len() {
            return Ok(Signal::flat());
        }

        let prices: Vec<f64> = candles[..=index].iter().map(|c| c.close).collect();
        let short = indicators::calculate_sma(&prices, self.short_period);
        let long = indicators::calculate_sma(&prices, self.long_period);

        let n = prices.len();
        let prev_short = short[n - 2];
        let prev_long = long[n - 2];
        let curr_short = short[n - 1];
        let curr_long = long[n - 1];

        // Short average crossing above the long average is bullish, crossing
        // below is bearish.
        if prev_short <= prev_long && curr_short > curr_long {
            let confidence = spread_confidence(curr_short, curr_long);
            return Ok(Signal::long(confidence));
        }
        if prev_short >= prev_long && curr_short < curr_long {
            let confidence = spread_confidence(curr_short, curr_long);
            return Ok(Signal::short(confidence));
        }

        Ok(Signal::flat())
    }

    fn min_data_points(&self) -> usize {
        self.long_period + 1
    }
}

fn spread_confidence(short: f64, long: f64) -> f64 {
    if long.abs() < f64::EPSILON {
        return 0.5;
    }
    ((short - long).abs() / long.abs() * 10.0 + 0.5).min(1.0)
}
