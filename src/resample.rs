use crate::error::{EngineError, Result};
use crate::models::Candle;
use chrono::{DateTime, TimeZone, Utc};

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0;

/// A fixed-duration bar interval parsed from specs like "1m", "15m", "4h",
/// "1d".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeframe {
    label: String,
    seconds: i64,
}

impl Timeframe {
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.len() < 2 {
            return Err(EngineError::Config(format!(
                "Invalid timeframe spec '{}'",
                spec
            )));
        }

        let (digits, unit) = trimmed.split_at(trimmed.len() - 1);
        let count: i64 = digits.parse().map_err(|_| {
            EngineError::Config(format!("Invalid timeframe spec '{}'", spec))
        })?;
        if count <= 0 {
            return Err(EngineError::Config(format!(
                "Timeframe '{}' must have a positive interval",
                spec
            )));
        }

        let unit_seconds = match unit {
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            other => {
                return Err(EngineError::Config(format!(
                    "Unknown timeframe unit '{}' in '{}'",
                    other, spec
                )))
            }
        };

        Ok(Self {
            label: trimmed.to_string(),
            seconds: count * unit_seconds,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Number of bars of this timeframe in one year; the Sharpe/Sortino
    /// annualization base.
    pub fn periods_per_year(&self) -> f64 {
        SECONDS_PER_YEAR / self.seconds as f64
    }

    /// Calendar-aligned window start containing `timestamp`.
    pub fn window_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let floored = secs.div_euclid(self.seconds) * self.seconds;
        Utc.timestamp_opt(floored, 0).single().unwrap_or(timestamp)
    }
}

/// Aggregates a base candle series into `timeframe` buckets: open = first
/// open, high = max, low = min, close = last close, volume = sum. Duplicate
/// timestamps fold into their bucket and gaps simply produce no bucket. The
/// trailing bucket is flagged `complete = false` when the base series does
/// not cover its whole window.
pub fn resample(candles: &[Candle], timeframe: &Timeframe) -> Vec<Candle> {
    if candles.is_empty() {
        return Vec::new();
    }

    let mut ordered: Vec<&Candle> = candles.iter().collect();
    ordered.sort_by_key(|c| c.timestamp);

    let mut buckets: Vec<Candle> = Vec::new();
    let mut bucket_dirty = false;
    for candle in &ordered {
        let start = timeframe.window_start(candle.timestamp);
        match buckets.last_mut() {
            Some(current) if current.timestamp == start => {
                current.high = current.high.max(candle.high);
                current.low = current.low.min(candle.low);
                current.close = candle.close;
                current.volume += candle.volume;
                bucket_dirty |= !candle.complete;
                current.complete = !bucket_dirty;
            }
            _ => {
                bucket_dirty = !candle.complete;
                buckets.push(Candle {
                    symbol: candle.symbol.clone(),
                    timestamp: start,
                    open: candle.open,
                    high: candle.high,
                    low: candle.low,
                    close: candle.close,
                    volume: candle.volume,
                    complete: !bucket_dirty,
                });
            }
        }
    }

    // The base bar width decides whether the trailing window is fully
    // covered. A single-candle series has no measurable width.
    let base_step = ordered
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
        .filter(|s| *s > 0)
        .min()
        .unwrap_or(0);
    if let (Some(last_bucket), Some(last_candle)) = (buckets.last_mut(), ordered.last()) {
        let window_end = last_bucket.timestamp.timestamp() + timeframe.seconds();
        let covered = base_step > 0 && last_candle.timestamp.timestamp() + base_step >= window_end;
        if !covered {
            last_bucket.complete = false;
        }
    }

    buckets
}
