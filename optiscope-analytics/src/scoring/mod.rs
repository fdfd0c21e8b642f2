/// Composite Attractiveness Score (buy-call and sell-call framings).
pub mod cas;

/// Covered Call Attractiveness Score.
pub mod ccas;

/// Display bands for both score families.
pub mod grade;

pub use cas::{CasScore, PriceSide, SideScore, score_cas};
pub use ccas::{CcasScore, score_ccas};
pub use grade::{Grade, Strategy};
