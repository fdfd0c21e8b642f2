use chrono::{DateTime, Utc};
use optiscope_analytics::{
    AnalysisReport, AnalysisRequest,
    benchmark::{BackfillProgress, BenchmarkSnapshot, BenchmarkStatus},
    cache::CacheStats,
    universe::StockInfo,
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Requests accepted from WebSocket clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Stocks,
    Analyze(AnalysisRequest),
    StartBackfill {
        symbol: SmolStr,
        #[serde(default)]
        window_days: Option<usize>,
    },
    CancelBackfill {
        symbol: SmolStr,
    },
    Benchmark {
        symbol: SmolStr,
    },
    CacheStats,
    ClearCache {
        namespace: SmolStr,
    },
}

/// Messages pushed to WebSocket clients. Backfill progress and completion
/// are broadcast to every connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Stocks {
        stocks: &'static [StockInfo],
    },
    Analysis {
        report: Box<AnalysisReport>,
    },
    BackfillStarted {
        symbol: SmolStr,
        window_days: usize,
    },
    BackfillProgress(BackfillProgress),
    BackfillFinished {
        symbol: SmolStr,
        snapshot: Option<BenchmarkSnapshot>,
        error: Option<String>,
    },
    Benchmark {
        status: BenchmarkStatus,
        snapshot: Option<BenchmarkSnapshot>,
    },
    CacheStats {
        namespaces: Vec<CacheStats>,
    },
    CacheCleared {
        namespace: SmolStr,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Parse a text frame into a [`ClientRequest`], describing the failure for
/// the client otherwise.
pub fn parse_request(text: &str) -> Result<ClientRequest, ServerMessage> {
    serde_json::from_str(text)
        .map_err(|error| ServerMessage::error(format!("invalid request: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiscope_analytics::{
        benchmark::BackfillStatus,
        model::OptionKind,
    };

    #[test]
    fn test_parse_request() {
        struct TestCase {
            input: &'static str,
            expected: Option<ClientRequest>,
        }

        let tests = vec![
            TestCase {
                // TC0: unit request
                input: r#"{"type":"stocks"}"#,
                expected: Some(ClientRequest::Stocks),
            },
            TestCase {
                // TC1: analyze with defaults
                input: r#"{"type":"analyze","symbol":"NVDA"}"#,
                expected: Some(ClientRequest::Analyze(AnalysisRequest::new("NVDA"))),
            },
            TestCase {
                // TC2: analyze with every option
                input: r#"{"type":"analyze","symbol":"AAPL","kind":"put","max_days":45,"refresh":true}"#,
                expected: Some(ClientRequest::Analyze(
                    AnalysisRequest::new("AAPL")
                        .with_kind(OptionKind::Put)
                        .with_max_days(45)
                        .with_refresh(true),
                )),
            },
            TestCase {
                // TC3: backfill with default window
                input: r#"{"type":"start_backfill","symbol":"NVDA"}"#,
                expected: Some(ClientRequest::StartBackfill {
                    symbol: SmolStr::new_static("NVDA"),
                    window_days: None,
                }),
            },
            TestCase {
                // TC4: clear cache
                input: r#"{"type":"clear_cache","namespace":"hv"}"#,
                expected: Some(ClientRequest::ClearCache {
                    namespace: SmolStr::new_static("hv"),
                }),
            },
            TestCase {
                // TC5: unknown request type
                input: r#"{"type":"subscribe","symbol":"NVDA"}"#,
                expected: None,
            },
            TestCase {
                // TC6: not json
                input: "ping",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_request(test.input).ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_progress_message_shape() {
        let message = ServerMessage::BackfillProgress(BackfillProgress {
            symbol: SmolStr::new_static("NVDA"),
            current: 3,
            total: 126,
            status: BackfillStatus::Cancelled,
        });

        let actual = serde_json::to_value(&message).unwrap();
        assert_eq!(
            actual,
            serde_json::json!({
                "type": "backfill_progress",
                "symbol": "NVDA",
                "current": 3,
                "total": 126,
                "status": {"kind": "cancelled"}
            })
        );
    }
}
