use serde::{Deserialize, Serialize};

/// Display band shared by CAS and CCAS scores.
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
#[serde(rename_all = "lowercase")]
pub enum Grade {
    #[display("poor")]
    Poor,
    #[display("average")]
    Average,
    #[display("good")]
    Good,
    #[display("excellent")]
    Excellent,
}

/// Trade the score is read for, used to phrase grade descriptions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    BuyCall,
    SellCall,
    CoveredCall,
}

impl Grade {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Grade::Excellent,
            65..=79 => Grade::Good,
            45..=64 => Grade::Average,
            _ => Grade::Poor,
        }
    }

    pub fn describe(self, strategy: Strategy) -> &'static str {
        match (self, strategy) {
            (Grade::Excellent, Strategy::BuyCall) => "excellent buying opportunity",
            (Grade::Good, Strategy::BuyCall) => "good buying opportunity",
            (Grade::Average, Strategy::BuyCall) => "average buying opportunity",
            (Grade::Poor, Strategy::BuyCall) => "poor buying opportunity",
            (Grade::Excellent, Strategy::SellCall) => "excellent selling opportunity",
            (Grade::Good, Strategy::SellCall) => "good selling opportunity",
            (Grade::Average, Strategy::SellCall) => "average selling opportunity",
            (Grade::Poor, Strategy::SellCall) => "poor selling opportunity",
            (Grade::Excellent, Strategy::CoveredCall) => "excellent covered call",
            (Grade::Good, Strategy::CoveredCall) => "good covered call",
            (Grade::Average, Strategy::CoveredCall) => "average covered call",
            (Grade::Poor, Strategy::CoveredCall) => "poor covered call",
        }
    }
}
