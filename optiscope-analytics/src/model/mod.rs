/// Option contracts and their side-aware pricing.
pub mod contract;

/// Days-to-expiry tenor buckets.
pub mod bucket;

/// Daily price bars and spot quotes.
pub mod price;

pub use bucket::DteBucket;
pub use contract::{OptionContract, OptionKind};
pub use price::{PriceBar, StockQuote};
