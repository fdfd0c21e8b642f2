use crate::model::OptionContract;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Thresholds for the three qualification predicates.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilterConfig {
    pub min_volume: u64,
    pub min_open_interest: u64,
    pub max_spread_percent: f64,
    pub min_iv_percent: f64,
    pub max_iv_percent: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_volume: 10,
            min_open_interest: 100,
            max_spread_percent: 10.0,
            min_iv_percent: 15.0,
            max_iv_percent: 200.0,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct QualificationResult {
    pub is_qualified: bool,
    pub liquidity: bool,
    pub bid_ask_spread: bool,
    pub iv_sanity: bool,
}

impl QualificationResult {
    /// Names of the predicates this contract failed.
    pub fn failures(&self) -> Vec<&'static str> {
        [
            (self.liquidity, "liquidity"),
            (self.bid_ask_spread, "bid_ask_spread"),
            (self.iv_sanity, "iv_sanity"),
        ]
        .into_iter()
        .filter_map(|(passed, name)| (!passed).then_some(name))
        .collect()
    }
}

/// Evaluate the liquidity, spread and IV sanity gates for one contract.
pub fn qualify(contract: &OptionContract, config: &FilterConfig) -> QualificationResult {
    let liquidity =
        contract.volume > config.min_volume && contract.open_interest > config.min_open_interest;

    let bid_ask_spread = spread_percent(contract.bid, contract.ask)
        .is_some_and(|spread| spread < config.max_spread_percent);

    let iv = contract.iv_percent();
    let iv_sanity = iv >= config.min_iv_percent && iv <= config.max_iv_percent;
    if !iv_sanity && iv > 0.0 {
        debug!(
            contract = %contract.contract_id,
            raw_iv = contract.implied_volatility,
            iv_percent = iv,
            min = config.min_iv_percent,
            max = config.max_iv_percent,
            "implied volatility outside sanity range"
        );
    }

    QualificationResult {
        is_qualified: liquidity && bid_ask_spread && iv_sanity,
        liquidity,
        bid_ask_spread,
        iv_sanity,
    }
}

/// Bid/ask spread as a percentage of the ask; `None` without an ask quote.
pub fn spread_percent(bid: f64, ask: f64) -> Option<f64> {
    (ask > 0.0).then(|| (ask - bid) / ask * 100.0)
}
