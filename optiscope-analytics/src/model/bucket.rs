use serde::{Deserialize, Serialize};

/// Tenor range an option falls into by days to expiry.
///
/// | bucket        | days   |
/// |---------------|--------|
/// | `ultra_short` | 0-20   |
/// | `short`       | 21-60  |
/// | `medium`      | 61-180 |
/// | `long`        | >180   |
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum DteBucket {
    #[display("ultra_short")]
    UltraShort,
    #[display("short")]
    Short,
    #[display("medium")]
    Medium,
    #[display("long")]
    Long,
}

impl DteBucket {
    pub const ALL: [DteBucket; 4] = [
        DteBucket::UltraShort,
        DteBucket::Short,
        DteBucket::Medium,
        DteBucket::Long,
    ];

    /// Classify a historical contract by the magnitude of its DTE.
    ///
    /// Contracts at or past their expiration on the as-of date keep their
    /// original tenor instead of being dropped.
    pub fn from_historical_dte(days_to_expiry: i64) -> Self {
        Self::from_tenor(days_to_expiry.unsigned_abs())
    }

    /// Classify a live contract, rejecting expired or expiring contracts.
    pub fn from_live_dte(days_to_expiry: i64) -> Option<Self> {
        (days_to_expiry > 0).then(|| Self::from_tenor(days_to_expiry.unsigned_abs()))
    }

    fn from_tenor(days: u64) -> Self {
        match days {
            0..=20 => DteBucket::UltraShort,
            21..=60 => DteBucket::Short,
            61..=180 => DteBucket::Medium,
            _ => DteBucket::Long,
        }
    }
}
