use crate::error::{EngineError, Result};
use crate::models::Candle;
use crate::resample::Timeframe;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Read-only historical data shared by every simulation in a batch, keyed by
/// symbol with candles in ascending timestamp order.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    candles: HashMap<String, Vec<Candle>>,
}

impl MarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON snapshot: either a flat candle array or a
    /// symbol -> candle-array map.
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            EngineError::Data(format!("Cannot read snapshot {}: {}", path.display(), e))
        })?;

        let candles: Vec<Candle> = match serde_json::from_str::<Vec<Candle>>(&raw) {
            Ok(list) => list,
            Err(_) => serde_json::from_str::<HashMap<String, Vec<Candle>>>(&raw)
                .map(|map| map.into_values().flatten().collect())
                .map_err(|e| {
                    EngineError::Data(format!(
                        "Snapshot {} is not valid candle JSON: {}",
                        path.display(),
                        e
                    ))
                })?,
        };

        let mut data = Self::new();
        for candle in candles {
            data.push(candle);
        }
        data.finalize();
        info!(
            "Loaded {} candles across {} symbols from {}",
            data.total_candles(),
            data.symbols().len(),
            path.display()
        );
        Ok(data)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.candles)
            .map_err(|e| EngineError::Data(format!("Snapshot serialization failed: {}", e)))?;
        fs::write(path, json).map_err(|e| {
            EngineError::Data(format!("Cannot write snapshot {}: {}", path.display(), e))
        })
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles
            .entry(candle.symbol.clone())
            .or_default()
            .push(candle);
    }

    pub fn insert_series(&mut self, symbol: &str, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        self.candles.insert(symbol.to_string(), candles);
    }

    /// Sort every series; out-of-order input is tolerated, not fatal.
    pub fn finalize(&mut self) {
        for (symbol, series) in self.candles.iter_mut() {
            if series.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
                warn!("Candles for {} arrived out of order; sorting", symbol);
            }
            series.sort_by_key(|c| c.timestamp);
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.candles.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn total_candles(&self) -> usize {
        self.candles.values().map(|s| s.len()).sum()
    }

    /// Candle series for a symbol, requiring at least `min_candles` bars of
    /// history.
    pub fn series(&self, symbol: &str, min_candles: usize) -> Result<&[Candle]> {
        let series = self
            .candles
            .get(symbol)
            .ok_or_else(|| EngineError::Data(format!("No candle history for {}", symbol)))?;
        if series.len() < min_candles {
            return Err(EngineError::Data(format!(
                "Insufficient history for {}: {} candles, need {}",
                symbol,
                series.len(),
                min_candles
            )));
        }
        Ok(series)
    }
}

/// Deterministic random-walk OHLCV generator for exercising the engine
/// without exchange connectivity.
pub fn generate_synthetic(
    symbol: &str,
    start: DateTime<Utc>,
    count: usize,
    timeframe: &Timeframe,
    base_price: f64,
    seed: u64,
) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let step = Duration::seconds(timeframe.seconds());

    let mut candles = Vec::with_capacity(count);
    let mut price = base_price;
    for i in 0..count {
        let drift: f64 = rng.gen_range(-0.01..0.011);
        let open = price;
        let close = (price * (1.0 + drift)).max(0.01);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
        let volume = rng.gen_range(50.0..500.0);
        candles.push(Candle {
            symbol: symbol.to_string(),
            timestamp: start + step * i as i32,
            open,
            high,
            low,
            close,
            volume,
            complete: true,
        });
        price = close;
    }

    candles
}
