use thiserror::Error;

/// Failure categories for a backtest run. Metric degeneracies (division by
/// zero in ratio formulas) are not errors; they resolve to sentinel values in
/// the performance module.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or insufficient candle history for the requested span or
    /// timeframe. The affected unit is skipped; sibling units continue.
    #[error("data error: {0}")]
    Data(String),

    /// Invalid configuration (empty parameter candidate list, malformed
    /// timeframe spec). Raised before any simulation starts.
    #[error("config error: {0}")]
    Config(String),

    /// The signal-producing strategy failed beyond the configured error-rate
    /// threshold; the run is aborted rather than producing a partial result.
    #[error("strategy error: {0}")]
    Strategy(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
