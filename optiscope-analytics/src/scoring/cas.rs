//! Composite Attractiveness Score for directional calls.
//!
//! Each framing combines a volatility-value sub-score and a speculative
//! efficiency sub-score through a geometric mean, so a total failure in either
//! dimension zeroes the composite.

use crate::{model::OptionContract, volatility::as_decimal};
use serde::{Deserialize, Serialize};

/// Ratio range over which IV/HV is mapped onto a score.
const VOL_RATIO_MIN: f64 = 0.7;
const VOL_RATIO_MAX: f64 = 2.0;

/// Quote side a framing prices contracts with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSide {
    Ask,
    Bid,
}

impl PriceSide {
    pub fn price(self, contract: &OptionContract) -> f64 {
        match self {
            PriceSide::Ask => contract.buy_price(),
            PriceSide::Bid => contract.sell_price(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct CasDetails {
    pub iv_hv_ratio: f64,
    pub delta_per_premium: f64,
    pub price: f64,
    pub price_side: PriceSide,
}

/// Score for one framing (buy or sell) of a contract.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct SideScore {
    pub score: u8,
    pub score_vol: u8,
    pub score_spec: u8,
    pub details: CasDetails,
}

impl SideScore {
    fn incomplete(price: f64, price_side: PriceSide) -> Self {
        Self {
            score: 0,
            score_vol: 0,
            score_spec: 0,
            details: CasDetails {
                iv_hv_ratio: 0.0,
                delta_per_premium: 0.0,
                price,
                price_side,
            },
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct CasScore {
    pub buy_call: SideScore,
    pub sell_call: SideScore,
    pub peer_count: usize,
}

/// Volatility-value sub-score: cheap IV relative to HV scores high.
///
/// Both inputs may be given in decimal or percentage form.
pub fn score_vol(iv: f64, hv: f64) -> u8 {
    let iv = as_decimal(iv);
    let hv = as_decimal(hv);
    if iv <= 0.0 || hv <= 0.0 {
        return 0;
    }

    let ratio = (iv / hv).clamp(VOL_RATIO_MIN, VOL_RATIO_MAX);
    let score = (VOL_RATIO_MAX - ratio) / (VOL_RATIO_MAX - VOL_RATIO_MIN) * 100.0;

    score.round() as u8
}

/// Speculative-efficiency sub-score: delta bought per unit of premium,
/// relative to the best `(delta, price)` pair in the peer group.
///
/// The contract itself always competes in the peer maximum, so the most
/// efficient contract in a group scores exactly 100 and no other contract
/// can score more. This matches a peers-only maximum whenever the peers
/// include the contract, which is how [`score_cas`] calls it.
pub fn score_spec<I>(delta: f64, price: f64, peers: I) -> u8
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let Some(index) = spec_index(delta, price) else {
        return 0;
    };

    let max_index = peers
        .into_iter()
        .filter_map(|(delta, price)| spec_index(delta, price))
        .fold(index, f64::max);

    ((index / max_index) * 100.0).round().min(100.0) as u8
}

fn spec_index(delta: f64, price: f64) -> Option<f64> {
    (delta > 0.0 && price > 0.0).then(|| delta / price)
}

/// Geometric mean of two sub-scores, zero if either is zero.
pub fn composite(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    (f64::from(a) * f64::from(b)).sqrt().round() as u8
}

/// Score `contract` in both the buy-call and sell-call framings against the
/// calls sharing its expiration.
pub fn score_cas(contract: &OptionContract, peers: &[OptionContract]) -> CasScore {
    CasScore {
        buy_call: side_score(contract, peers, PriceSide::Ask),
        sell_call: side_score(contract, peers, PriceSide::Bid),
        peer_count: peers.len(),
    }
}

fn side_score(contract: &OptionContract, peers: &[OptionContract], side: PriceSide) -> SideScore {
    let iv = contract.implied_volatility;
    let hv = contract.historical_volatility.unwrap_or_default();
    let price = side.price(contract);

    if iv <= 0.0 || hv <= 0.0 || price <= 0.0 {
        return SideScore::incomplete(price, side);
    }

    let vol = score_vol(iv, hv);
    let spec = score_spec(
        contract.delta,
        price,
        peers.iter().map(|peer| (peer.delta, side.price(peer))),
    );

    // Conditions that disfavour a buyer favour a seller
    let (score_vol, score_spec) = match side {
        PriceSide::Ask => (vol, spec),
        PriceSide::Bid => (100 - vol, 100 - spec),
    };

    SideScore {
        score: composite(score_vol, score_spec),
        score_vol,
        score_spec,
        details: CasDetails {
            iv_hv_ratio: as_decimal(iv) / as_decimal(hv),
            delta_per_premium: contract.delta / price,
            price,
            price_side: side,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::contract::test_utils::call;

    #[test]
    fn test_score_vol() {
        struct TestCase {
            iv: f64,
            hv: f64,
            expected: u8,
        }

        let tests = vec![
            TestCase {
                // TC0: iv equal to hv
                iv: 0.30,
                hv: 30.0,
                expected: 77,
            },
            TestCase {
                // TC1: ratio at the cheap clamp
                iv: 0.21,
                hv: 0.30,
                expected: 100,
            },
            TestCase {
                // TC2: ratio beyond the cheap clamp
                iv: 0.10,
                hv: 0.30,
                expected: 100,
            },
            TestCase {
                // TC3: ratio beyond the rich clamp
                iv: 0.90,
                hv: 0.30,
                expected: 0,
            },
            TestCase {
                // TC4: missing iv
                iv: 0.0,
                hv: 0.30,
                expected: 0,
            },
            TestCase {
                // TC5: missing hv
                iv: 0.30,
                hv: -1.0,
                expected: 0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = score_vol(test.iv, test.hv);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_score_vol_non_increasing_in_ratio() {
        let hv = 0.30;
        let scores = (50..=250)
            .map(|step| score_vol(hv * f64::from(step) / 100.0, hv))
            .collect::<Vec<_>>();

        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn test_score_spec() {
        let peers = [(0.5, 5.0), (0.3, 2.0), (0.0, 1.0), (0.6, 0.0)];

        // best peer ratio is 0.15
        assert_eq!(score_spec(0.3, 2.0, peers), 100);
        assert_eq!(score_spec(0.5, 5.0, peers), 67);
        assert_eq!(score_spec(0.0, 5.0, peers), 0);
        assert_eq!(score_spec(0.5, 0.0, peers), 0);
        // no usable peers leaves the contract as the benchmark
        assert_eq!(score_spec(0.5, 5.0, []), 100);
    }

    #[test]
    fn test_composite_zero_propagation() {
        assert_eq!(composite(0, 100), 0);
        assert_eq!(composite(100, 0), 0);
        assert_eq!(composite(77, 100), 88);
        assert_eq!(composite(100, 100), 100);
    }

    #[test]
    fn test_buy_call_end_to_end() {
        let mut best = call(100.0, 30);
        best.ask = 5.0;
        best.delta = 0.5;
        best.implied_volatility = 0.30;
        best = best.with_historical_volatility(30.0, 30);

        let mut worse = call(110.0, 30);
        worse.ask = 4.0;
        worse.delta = 0.3;

        let peers = vec![best.clone(), worse];
        let actual = score_cas(&best, &peers);

        assert_eq!(actual.buy_call.score_spec, 100);
        assert_eq!(actual.buy_call.score_vol, 77);
        assert_eq!(actual.buy_call.score, 88);
        assert_eq!(actual.peer_count, 2);
    }

    #[test]
    fn test_sell_call_inverts_sub_scores() {
        let mut contract = call(100.0, 30);
        contract.implied_volatility = 0.60;
        contract = contract.with_historical_volatility(30.0, 30);

        let mut richer = call(95.0, 30);
        richer.bid = 2.0;
        richer.delta = 0.6;

        let peers = vec![contract.clone(), richer];
        let actual = score_cas(&contract, &peers);

        // ratio 2.0 is the worst for a buyer
        assert_eq!(actual.sell_call.score_vol, 100);
        // 0.5 / 4.8 against a best of 0.6 / 2.0
        assert_eq!(actual.sell_call.score_spec, 65);
        assert_eq!(actual.sell_call.score, composite(100, 65));
        assert_eq!(actual.sell_call.details.price_side, PriceSide::Bid);
        assert_eq!(actual.sell_call.details.price, 4.8);
    }

    #[test]
    fn test_missing_hv_yields_zero_scores() {
        let contract = call(100.0, 30);
        let actual = score_cas(&contract, std::slice::from_ref(&contract));
        assert_eq!(actual.buy_call.score, 0);
        assert_eq!(actual.sell_call.score, 0);
        assert_eq!(actual.sell_call.score_vol, 0);
    }
}
