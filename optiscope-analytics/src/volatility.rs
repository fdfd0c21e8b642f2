//! Annualised historical volatility from daily closes.
//!
//! All functions here are pure: the same prices always produce the same HV.

use crate::{error::AnalyticsError, model::PriceBar};
use itertools::Itertools;

/// Trading days per year used to annualise daily volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Share of log returns in the window that must be computable (4/5).
const MIN_VALID_NUMERATOR: usize = 4;
const MIN_VALID_DENOMINATOR: usize = 5;

/// Compute annualised HV (as a percentage, e.g. 32.45) over the most recent
/// `period` daily log returns.
///
/// Bars may arrive in either temporal order; the most recent `period + 1`
/// bars are selected before computing. A non-positive close invalidates
/// only the returns it participates in.
pub fn compute_historical_volatility(
    prices: &[PriceBar],
    period: usize,
) -> Result<f64, AnalyticsError> {
    if period == 0 || prices.len() < period + 1 {
        return Err(AnalyticsError::InsufficientData {
            required: period + 1,
            valid: prices.len(),
        });
    }

    // Most recent period + 1 bars, oldest first
    let window = prices
        .iter()
        .sorted_by(|a, b| b.date.cmp(&a.date))
        .take(period + 1)
        .rev()
        .collect::<Vec<_>>();

    let returns = window
        .iter()
        .tuple_windows()
        .filter(|(prev, next)| prev.adjusted_close > 0.0 && next.adjusted_close > 0.0)
        .map(|(prev, next)| (next.adjusted_close / prev.adjusted_close).ln())
        .collect::<Vec<_>>();

    let required = min_valid_returns(period);
    if returns.len() < required || returns.len() < 2 {
        return Err(AnalyticsError::InsufficientData {
            required: required.max(2),
            valid: returns.len(),
        });
    }

    Ok(annualised_std_dev(&returns) * 100.0)
}

/// Minimum number of valid returns for a `period` window.
pub fn min_valid_returns(period: usize) -> usize {
    (period * MIN_VALID_NUMERATOR).div_ceil(MIN_VALID_DENOMINATOR)
}

/// Sample standard deviation (n - 1) of daily returns, annualised.
fn annualised_std_dev(returns: &[f64]) -> f64 {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt()
}

/// HV window (trading days) matched to an option's tenor.
pub fn hv_period_for_dte(days_to_expiry: i64) -> u32 {
    match days_to_expiry {
        ..=20 => 20,
        21..=60 => 30,
        61..=180 => 60,
        _ => 180,
    }
}

/// Normalise a volatility to percentage form; values below 1 are decimals.
pub fn as_percent(volatility: f64) -> f64 {
    if volatility < 1.0 {
        volatility * 100.0
    } else {
        volatility
    }
}

/// Normalise a volatility to decimal form; values above 1 are percentages.
pub fn as_decimal(volatility: f64) -> f64 {
    if volatility > 1.0 {
        volatility / 100.0
    } else {
        volatility
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

    fn bars(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| PriceBar::new(start + Days::new(i as u64), *close))
            .collect()
    }

    #[test]
    fn test_constant_price_has_zero_volatility() {
        let prices = bars(&[100.0; 31]);
        let hv = compute_historical_volatility(&prices, 30).unwrap();
        assert_eq!(hv, 0.0);
    }

    #[test]
    fn test_known_series() {
        // returns alternate +ln(1.01), -ln(1.01)
        let closes = [100.0, 101.0, 100.0, 101.0, 100.0];
        let hv = compute_historical_volatility(&bars(&closes), 4).unwrap();

        let r = 1.01_f64.ln();
        let variance = (4.0 * r * r) / 3.0;
        let expected = variance.sqrt() * 252.0_f64.sqrt() * 100.0;
        assert!((hv - expected).abs() < 1e-9);
    }

    #[test]
    fn test_order_independent_and_uses_most_recent_window() {
        let mut closes = vec![10.0, 500.0, 3.0];
        closes.extend([100.0, 102.0, 99.0, 101.0, 100.0, 103.0]);
        let chronological = bars(&closes);
        let mut newest_first = chronological.clone();
        newest_first.reverse();

        let a = compute_historical_volatility(&chronological, 5).unwrap();
        let b = compute_historical_volatility(&newest_first, 5).unwrap();
        let recent_only = compute_historical_volatility(&chronological[3..], 5).unwrap();

        assert_eq!(a, b);
        assert_eq!(a, recent_only);
    }

    #[test]
    fn test_validity_floor() {
        struct TestCase {
            input: Vec<f64>,
            expected_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: too few bars for the window
                input: vec![100.0, 101.0, 102.0],
                expected_ok: false,
            },
            TestCase {
                // TC1: one bad close removes two of ten returns, 8 >= ceil(8.0)
                input: vec![
                    100.0, 101.0, 102.0, 0.0, 101.0, 100.0, 99.0, 100.0, 101.0, 102.0, 103.0,
                ],
                expected_ok: true,
            },
            TestCase {
                // TC2: two bad closes remove four of ten returns
                input: vec![
                    100.0, 101.0, 0.0, 102.0, 101.0, 100.0, -1.0, 100.0, 101.0, 102.0, 103.0,
                ],
                expected_ok: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = compute_historical_volatility(&bars(&test.input), 10);
            assert_eq!(actual.is_ok(), test.expected_ok, "TC{} failed", index);
        }
    }

    #[test]
    fn test_insufficient_data_reports_counts() {
        let closes = [100.0, 0.0, 100.0, 0.0, 100.0, 101.0];
        let actual = compute_historical_volatility(&bars(&closes), 5);
        assert_eq!(
            actual,
            Err(AnalyticsError::InsufficientData {
                required: 4,
                valid: 1
            })
        );
    }

    #[test]
    fn test_hv_period_for_dte() {
        struct TestCase {
            input: i64,
            expected: u32,
        }

        let tests = vec![
            TestCase { input: 7, expected: 20 },
            TestCase { input: 20, expected: 20 },
            TestCase { input: 21, expected: 30 },
            TestCase { input: 60, expected: 30 },
            TestCase { input: 61, expected: 60 },
            TestCase { input: 180, expected: 60 },
            TestCase { input: 365, expected: 180 },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(hv_period_for_dte(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_volatility_normalisation() {
        assert!((as_percent(0.32) - 32.0).abs() < 1e-9);
        assert_eq!(as_percent(45.0), 45.0);
        assert_eq!(as_decimal(32.0), 0.32);
        assert_eq!(as_decimal(0.32), 0.32);
    }
}
