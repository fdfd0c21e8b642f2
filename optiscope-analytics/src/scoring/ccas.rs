//! Covered Call Attractiveness Score.
//!
//! A hard profit-buffer prefilter gates two sub-scores (annualised premium
//! yield and delta-based safety) which are combined by geometric mean.

use crate::model::OptionContract;
use serde::{Deserialize, Serialize};

const BUFFER_MIN_DTE: f64 = 8.0;
const BUFFER_MAX_DTE: f64 = 29.0;
const BUFFER_MIN: f64 = 0.04;
const BUFFER_MAX: f64 = 0.12;

const YIELD_MIN: f64 = 0.05;
const YIELD_MAX: f64 = 0.25;

const SAFETY_MIN_DELTA: f64 = 0.10;
const SAFETY_MAX_DELTA: f64 = 0.40;

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct PrefilterResult {
    pub passed: bool,
    pub potential_gain_ratio: f64,
    pub required_buffer: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct YieldScore {
    pub score_yield: f64,
    pub annualized_yield: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct CcasScore {
    pub ccas_score: u8,
    pub passed: bool,
    pub score_yield: f64,
    pub score_safety: f64,
    pub annualized_yield: f64,
    pub prefilter: Option<PrefilterResult>,
}

impl CcasScore {
    fn rejected(prefilter: Option<PrefilterResult>) -> Self {
        Self {
            ccas_score: 0,
            passed: false,
            score_yield: 0.0,
            score_safety: 0.0,
            annualized_yield: 0.0,
            prefilter,
        }
    }
}

/// Upside left between spot and strike, as a ratio of spot.
pub fn potential_gain_ratio(stock_price: f64, strike: f64) -> f64 {
    if stock_price <= 0.0 || strike <= 0.0 {
        return 0.0;
    }
    strike / stock_price - 1.0
}

/// Minimum upside demanded at a given DTE, rising linearly from 4% at 8 days
/// to 12% at 29 days. DTE outside that range is clamped.
pub fn required_buffer(dte: i64) -> f64 {
    let dte = (dte as f64).clamp(BUFFER_MIN_DTE, BUFFER_MAX_DTE);
    BUFFER_MIN
        + (dte - BUFFER_MIN_DTE) / (BUFFER_MAX_DTE - BUFFER_MIN_DTE) * (BUFFER_MAX - BUFFER_MIN)
}

pub fn profit_buffer_prefilter(stock_price: f64, strike: f64, dte: i64) -> PrefilterResult {
    let potential_gain_ratio = potential_gain_ratio(stock_price, strike);
    let required_buffer = required_buffer(dte);

    PrefilterResult {
        passed: potential_gain_ratio >= required_buffer,
        potential_gain_ratio,
        required_buffer,
    }
}

/// Annualised premium yield mapped from [5%, 25%] onto [0, 100].
pub fn yield_score(bid: f64, stock_price: f64, dte: i64) -> YieldScore {
    if bid <= 0.0 || stock_price <= 0.0 || dte <= 0 {
        return YieldScore {
            score_yield: 0.0,
            annualized_yield: 0.0,
        };
    }

    let annualized_yield = (bid / stock_price) * (365.0 / dte as f64);
    let clamped = annualized_yield.clamp(YIELD_MIN, YIELD_MAX);

    YieldScore {
        score_yield: round_tenth((clamped - YIELD_MIN) / (YIELD_MAX - YIELD_MIN) * 100.0),
        annualized_yield,
    }
}

/// Assignment safety: delta 0.10 scores 100, delta 0.40 scores 0.
pub fn safety_score(delta: f64) -> f64 {
    if !(0.0..=1.0).contains(&delta) {
        return 0.0;
    }

    let clamped = delta.clamp(SAFETY_MIN_DELTA, SAFETY_MAX_DELTA);
    round_tenth((SAFETY_MAX_DELTA - clamped) / (SAFETY_MAX_DELTA - SAFETY_MIN_DELTA) * 100.0)
}

pub fn final_ccas_score(score_yield: f64, score_safety: f64) -> u8 {
    if score_yield <= 0.0 || score_safety <= 0.0 {
        return 0;
    }
    (score_yield * score_safety).sqrt().min(100.0).round() as u8
}

/// Score `contract` as a covered call written against `stock_price`.
pub fn score_ccas(contract: &OptionContract, stock_price: f64) -> CcasScore {
    let bid = contract.sell_price();
    let dte = contract.days_to_expiry;

    if stock_price <= 0.0 || contract.strike <= 0.0 || dte <= 0 || bid <= 0.0 {
        return CcasScore::rejected(None);
    }

    let prefilter = profit_buffer_prefilter(stock_price, contract.strike, dte);
    if !prefilter.passed {
        return CcasScore::rejected(Some(prefilter));
    }

    let yields = yield_score(bid, stock_price, dte);
    let score_safety = safety_score(contract.delta);

    CcasScore {
        ccas_score: final_ccas_score(yields.score_yield, score_safety),
        passed: true,
        score_yield: yields.score_yield,
        score_safety,
        annualized_yield: yields.annualized_yield,
        prefilter: Some(prefilter),
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
