use confluence_core::ValidationError;
use thiserror::Error;

/// Why one instrument's cycle produced no signal.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Price history could not be fetched.
    #[error("failed to fetch market data for {symbol}: {message}")]
    Fetch { symbol: String, message: String },

    /// The cycle exceeded its deadline and was dropped.
    #[error("cycle for {symbol} timed out after {secs}s")]
    Timeout { symbol: String, secs: u64 },

    /// The aggregator rejected its inputs or configuration.
    #[error("signal for {symbol} rejected: {source}")]
    Validation {
        symbol: String,
        #[source]
        source: ValidationError,
    },
}

impl PipelineError {
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Fetch { symbol, .. }
            | Self::Timeout { symbol, .. }
            | Self::Validation { symbol, .. } => symbol,
        }
    }

    /// True for failures that may clear on the next cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_symbol() {
        let err = PipelineError::Timeout {
            symbol: "BTCUSDT".to_string(),
            secs: 20,
        };
        assert_eq!(err.symbol(), "BTCUSDT");
        assert!(err.to_string().contains("20s"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_is_not_transient() {
        let err = PipelineError::Validation {
            symbol: "ETHUSDT".to_string(),
            source: ValidationError::ScoreOutOfRange(120.0),
        };
        assert!(!err.is_transient());
        assert!(std::error::Error::source(&err).is_some());
    }
}
