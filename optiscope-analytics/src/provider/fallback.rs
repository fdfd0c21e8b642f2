use crate::{
    model::{OptionContract, OptionKind, StockQuote},
    universe,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use smol_str::{SmolStr, format_smolstr};

/// Calendar days to expiry of every synthetic expiration.
pub const FALLBACK_EXPIRIES: [u64; 8] = [7, 14, 30, 60, 90, 120, 180, 365];

/// Strike offsets from spot, in 5% steps.
const STRIKE_STEPS: std::ops::RangeInclusive<i32> = -3..=3;

/// Synthetic market data used when the live provider fails.
///
/// Everything produced here is flagged so callers can tell it apart from
/// provider data. Greeks are rough placeholders, not model prices.
#[derive(Debug)]
pub struct FallbackMarket {
    rng: Mutex<StdRng>,
}

impl Default for FallbackMarket {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_rng(&mut rand::rng())),
        }
    }
}

impl FallbackMarket {
    /// Deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn quote(&self, symbol: &str, now: DateTime<Utc>) -> StockQuote {
        let (low, high) = universe::price_range(symbol);
        let mut rng = self.rng.lock();
        let price = round_cents(rng.random_range(low..=high));

        StockQuote {
            symbol: SmolStr::new(symbol.to_ascii_uppercase()),
            price,
            open: round_cents(price * 0.99),
            high: round_cents(price * 1.02),
            low: round_cents(price * 0.98),
            volume: rng.random_range(1_000_000..=10_000_000),
            timestamp: now,
            fallback: true,
        }
    }

    /// Calls and puts for every [`FALLBACK_EXPIRIES`] tenor around `spot`.
    pub fn option_chain(&self, symbol: &str, spot: f64, as_of: NaiveDate) -> Vec<OptionContract> {
        if spot <= 0.0 {
            return Vec::new();
        }

        let symbol = SmolStr::new(symbol.to_ascii_uppercase());
        let mut rng = self.rng.lock();

        FALLBACK_EXPIRIES
            .iter()
            .filter_map(|days| Some((*days, as_of.checked_add_days(Days::new(*days))?)))
            .flat_map(|(days, expiration)| {
                STRIKE_STEPS.flat_map(move |step| {
                    [OptionKind::Call, OptionKind::Put]
                        .into_iter()
                        .map(move |kind| (days, expiration, step, kind))
                })
            })
            .filter_map(|(days, expiration, step, kind)| {
                let strike = round_strike(spot * (1.0 + 0.05 * f64::from(step)));
                (strike > 0.0).then(|| {
                    synthetic_contract(&mut *rng, &symbol, spot, strike, kind, as_of, expiration, days)
                })
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn synthetic_contract<R: Rng>(
    rng: &mut R,
    symbol: &SmolStr,
    spot: f64,
    strike: f64,
    kind: OptionKind,
    as_of: NaiveDate,
    expiration: NaiveDate,
    days: u64,
) -> OptionContract {
    let years = days as f64 / 365.0;
    let moneyness = spot / strike;
    let distance = (moneyness - 1.0).abs();

    // smile: wings trade richer than the money
    let iv = 0.30 + distance * 0.2 + rng.random_range(0.0..0.1);

    let intrinsic = match kind {
        OptionKind::Call => (spot - strike).max(0.0),
        OptionKind::Put => (strike - spot).max(0.0),
    };
    let time_value = (0.4 * spot * iv * years.sqrt() * (1.0 - 2.0 * distance).max(0.1)).max(0.05);
    let mark = round_cents(intrinsic + time_value);
    let half_spread = (mark * 0.02).max(0.01);

    let call_delta = (0.5 + 0.4 * moneyness.ln() / (iv * years.sqrt())).clamp(0.01, 0.99);
    let delta = match kind {
        OptionKind::Call => call_delta,
        OptionKind::Put => call_delta - 1.0,
    };
    let gamma = (0.4 / (spot * iv * years.sqrt())) * (1.0 - (2.0 * call_delta - 1.0).powi(2));
    let vega = spot * years.sqrt() * 0.004 * (1.0 - distance).max(0.1);

    OptionContract {
        contract_id: format_smolstr!(
            "{symbol}{}{}{:08}",
            expiration.format("%y%m%d"),
            if kind == OptionKind::Call { 'C' } else { 'P' },
            (strike * 1000.0).round() as u64
        ),
        symbol: symbol.clone(),
        expiration,
        as_of,
        days_to_expiry: days as i64,
        strike,
        kind,
        bid: round_cents((mark - half_spread).max(0.01)),
        ask: round_cents(mark + half_spread),
        last_price: mark,
        mark,
        volume: rng.random_range(50..=5_000),
        open_interest: rng.random_range(200..=20_000),
        implied_volatility: iv,
        delta,
        gamma,
        theta: -time_value / days as f64,
        vega,
        rho: delta * strike * years * 0.01,
        historical_volatility: None,
        hv_period: None,
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round_strike(value: f64) -> f64 {
    if value >= 25.0 {
        value.round()
    } else {
        round_cents(value)
    }
}
