use crate::error::Result;
use crate::indicators;
use crate::models::{Candle, Signal};
use crate::params::{get_param_f64_clamped, get_param_usize_at_least};
use std::collections::HashMap;

/// Mean-reversion on Bollinger band touches: a close back inside the band
/// after closing below the lower band is bullish, the mirror on the upper
/// band is bearish.
pub struct BollingerStrategy {
    name: String,
    period: usize,
    num_std: f64,
}

impl BollingerStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let period = get_param_usize_at_least(parameters, "period", 20, 2);
        let num_std = get_param_f64_clamped(parameters, "num_std", 2.0, 0.5, 4.0);
        Self {
            name: "bollinger".to_string(),
            period,
            num_std,
        }
    }
}

impl super::Strategy for BollingerStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, candles: &[Candle], index: usize) -> Result<Signal> {
        if index < self.period || index >= candles.len() {
            return Ok(Signal::flat());
        }

        let prices: Vec<f64> = candles[..=index].iter().map(|c| c.close).collect();
        let (upper, middle, lower) = indicators::calculate_bollinger(&prices, self.period, self.num_std);

        let n = prices.len();
        let prev_close = prices[n - 2];
        let curr_close = prices[n - 1];

        if prev_close < lower[n - 2] && curr_close > lower[n - 1] {
            let confidence = band_confidence(curr_close, middle[n - 1], lower[n - 1]);
            return Ok(Signal::long(confidence));
        }

        if prev_close > upper[n - 2] && curr_close < upper[n - 1] {
            let confidence = band_confidence(curr_close, middle[n - 1], upper[n - 1]);
            return Ok(Signal::short(confidence));
        }

        Ok(Signal::flat())
    }

    fn min_data_points(&self) -> usize {
        self.period + 1
    }
}

fn band_confidence(close: f64, middle: f64, band: f64) -> f64 {
    let band_width = (middle - band).abs();
    if band_width < f64::EPSILON {
        return 0.5;
    }
    (((close - band).abs() / band_width) * 0.5 + 0.5).min(1.0)
}
