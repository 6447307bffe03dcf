use crate::error::Result;
use crate::indicators;
use crate::models::{Candle, Signal};
use crate::params::get_param_usize;
use std::collections::HashMap;

pub struct MacdStrategy {
    name: String,
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    min_data_points: usize,
}

impl MacdStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let fast_period = get_param_usize(parameters, "fast_period", 12);
        let slow_period = get_param_usize(parameters, "slow_period", 26);
        let signal_period = get_param_usize(parameters, "signal_period", 9);
        let min_data_points = slow_period + signal_period;
        Self {
            name: "macd".to_string(),
            fast_period,
            slow_period,
            signal_period,
            min_data_points,
        }
    }
}

impl super::Strategy for MacdStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, candles: &[Candle], index: usize) -> Result<Signal> {
        if index < self.min_data_points || index >= candles.len() {
            return Ok(Signal::flat());
        }

        let prices: Vec<f64> = candles[..=index].iter().map(|c| c.close).collect();
        let (macd_line, signal_line, _histogram) = indicators::calculate_macd(
            &prices,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );

        let n = macd_line.len();
        if n < 2 {
            return Ok(Signal::flat());
        }
        let current_macd = macd_line[n - 1];
        let prev_macd = macd_line[n - 2];
        let current_signal = signal_line[n - 1];
        let prev_signal = signal_line[n - 2];

        // MACD line crossing above its signal line is bullish, below is
        // bearish.
        if prev_macd <= prev_signal && current_macd > current_signal {
            return Ok(Signal::long(cross_confidence(current_macd, current_signal)));
        }
        if prev_macd >= prev_signal && current_macd < current_signal {
            return Ok(Signal::short(cross_confidence(current_macd, current_signal)));
        }

        Ok(Signal::flat())
    }

    fn min_data_points(&self) -> usize {
        self.min_data_points
    }
}

fn cross_confidence(macd: f64, signal: f64) -> f64 {
    if signal.abs() < f64::EPSILON {
        return 0.5;
    }
    ((macd - signal).abs() / signal.abs() * 10.0 + 0.5).min(1.0)
}
