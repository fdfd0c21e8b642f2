//! Lenient deserialisers for provider payloads that encode numbers as strings.

use serde::Deserialize;
use serde_json::Value;

/// Deserialize a string or number as an `f64`, mapping anything unparseable
/// (empty strings, `"-"`, `null`) to `0.0`.
pub fn de_lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(lenient_f64).unwrap_or_default())
}

/// Deserialize a string or number as a `u64`, truncating fractions and
/// mapping anything unparseable or negative to `0`.
pub fn de_lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = value.as_ref().map(lenient_f64).unwrap_or_default();
    Ok(if parsed > 0.0 { parsed.trunc() as u64 } else { 0 })
}

pub fn lenient_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };

    parsed.filter(|value| value.is_finite()).unwrap_or_default()
}
