use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// All errors generated in `optiscope-analytics`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum AnalyticsError {
    #[error("insufficient price data: {valid} valid points, {required} required")]
    InsufficientData { required: usize, valid: usize },

    #[error("market data provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("no usable option contracts for {symbol}")]
    NoContracts { symbol: SmolStr },

    #[error("benchmark backfill already running for {symbol}")]
    BackfillInProgress { symbol: SmolStr },

    #[error("benchmark backfill cancelled for {symbol}")]
    Cancelled { symbol: SmolStr },

    #[error("storage: {0}")]
    Storage(String),
}

impl From<std::io::Error> for AnalyticsError {
    fn from(value: std::io::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<tokio::task::JoinError> for AnalyticsError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<serde_json::Error> for AnalyticsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

/// Failures reported by an upstream market data provider.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport: {0}")]
    Transport(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("data unavailable: {0}")]
    Unavailable(String),

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Determine if retrying the same request later could succeed.
    ///
    /// Permanent errors (bad symbol, invalid key, malformed payload) route
    /// straight to the fallback path.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited(_) | ProviderError::Timeout | ProviderError::Transport(_) => {
                true
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else if value.is_decode() {
            Self::Parse(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_transient() {
        struct TestCase {
            input: ProviderError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: rate limit notice is worth retrying
                input: ProviderError::RateLimited("5 calls per minute".to_string()),
                expected: true,
            },
            TestCase {
                // TC1: timeout is worth retrying
                input: ProviderError::Timeout,
                expected: true,
            },
            TestCase {
                // TC2: connection reset is worth retrying
                input: ProviderError::Transport("connection reset by peer".to_string()),
                expected: true,
            },
            TestCase {
                // TC3: invalid symbol is permanent
                input: ProviderError::Api("Invalid API call".to_string()),
                expected: false,
            },
            TestCase {
                // TC4: demo key is permanent
                input: ProviderError::Unavailable("demo key".to_string()),
                expected: false,
            },
            TestCase {
                // TC5: malformed payload is permanent
                input: ProviderError::Parse("expected value at line 1".to_string()),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_transient();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_analytics_error_from_provider() {
        let error = AnalyticsError::from(ProviderError::Timeout);
        assert_eq!(error, AnalyticsError::Provider(ProviderError::Timeout));
        assert_eq!(error.to_string(), "market data provider: request timed out");
    }
}
