use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    #[default]
    #[display("call")]
    Call,
    #[display("put")]
    Put,
}

impl OptionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "call" => Some(OptionKind::Call),
            "put" => Some(OptionKind::Put),
            _ => None,
        }
    }
}

/// Option contract as it stood on the `as_of` date.
///
/// `implied_volatility` is in decimal form (0.32 = 32%) and may be 0 when
/// the provider did not quote it. `historical_volatility` is a percentage
/// attached after the HV join.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OptionContract {
    pub contract_id: SmolStr,
    pub symbol: SmolStr,
    pub expiration: NaiveDate,
    pub as_of: NaiveDate,
    pub days_to_expiry: i64,
    pub strike: f64,
    pub kind: OptionKind,
    pub bid: f64,
    pub ask: f64,
    pub last_price: f64,
    pub mark: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub implied_volatility: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    #[serde(default)]
    pub historical_volatility: Option<f64>,
    #[serde(default)]
    pub hv_period: Option<u32>,
}

impl OptionContract {
    /// Calendar days from `as_of` to `expiration`, negative once expired.
    pub fn days_between(as_of: NaiveDate, expiration: NaiveDate) -> i64 {
        expiration.signed_duration_since(as_of).num_days()
    }

    /// Premium paid by a buyer, falling back to the mark when no ask is quoted.
    pub fn buy_price(&self) -> f64 {
        if self.ask > 0.0 { self.ask } else { self.mark }
    }

    /// Premium received by a seller, falling back to the mark when no bid is quoted.
    pub fn sell_price(&self) -> f64 {
        if self.bid > 0.0 { self.bid } else { self.mark }
    }

    pub fn has_quote(&self) -> bool {
        self.bid > 0.0 || self.ask > 0.0
    }

    pub fn is_call(&self) -> bool {
        self.kind == OptionKind::Call
    }

    /// Implied volatility as a percentage.
    pub fn iv_percent(&self) -> f64 {
        crate::volatility::as_percent(self.implied_volatility)
    }

    pub fn with_historical_volatility(mut self, hv_percent: f64, period: u32) -> Self {
        self.historical_volatility = Some(hv_percent);
        self.hv_period = Some(period);
        self
    }
}
