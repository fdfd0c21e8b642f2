use serde::Serialize;

/// HV (%) assumed for symbols without a static default.
pub const DEFAULT_HV_PERCENT: f64 = 25.0;

/// Fallback price range for symbols outside the universe.
pub const DEFAULT_PRICE_RANGE: (f64, f64) = (50.0, 200.0);

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct StockInfo {
    pub symbol: &'static str,
    pub name: &'static str,
    #[serde(skip)]
    pub price_range: (f64, f64),
    #[serde(skip)]
    pub default_hv: Option<f64>,
}

const fn stock(
    symbol: &'static str,
    name: &'static str,
    price_range: (f64, f64),
    default_hv: Option<f64>,
) -> StockInfo {
    StockInfo {
        symbol,
        name,
        price_range,
        default_hv,
    }
}

/// Supported symbols: the 20 largest US listings followed by 5 China ADRs.
pub const STOCKS: [StockInfo; 25] = [
    stock("NVDA", "NVIDIA Corporation", (140.0, 180.0), Some(45.0)),
    stock("MSFT", "Microsoft Corporation", (320.0, 380.0), Some(25.0)),
    stock("AAPL", "Apple Inc.", (160.0, 190.0), Some(25.0)),
    stock("AMZN", "Amazon.com Inc.", (140.0, 170.0), Some(35.0)),
    stock("GOOGL", "Alphabet Inc.", (120.0, 150.0), Some(30.0)),
    stock("META", "Meta Platforms Inc.", (280.0, 320.0), Some(35.0)),
    stock("AVGO", "Broadcom Inc.", (1200.0, 1400.0), Some(30.0)),
    stock("TSLA", "Tesla Inc.", (200.0, 280.0), Some(50.0)),
    stock("BRK-B", "Berkshire Hathaway Inc.", (400.0, 450.0), Some(15.0)),
    stock("JPM", "JPMorgan Chase & Co.", (220.0, 260.0), Some(20.0)),
    stock("WMT", "Walmart Inc.", (80.0, 100.0), Some(15.0)),
    stock("LLY", "Eli Lilly and Company", (700.0, 850.0), Some(22.0)),
    stock("V", "Visa Inc.", (270.0, 320.0), Some(18.0)),
    stock("ORCL", "Oracle Corporation", (100.0, 130.0), None),
    stock("MA", "Mastercard Incorporated", (450.0, 520.0), Some(18.0)),
    stock("NFLX", "Netflix Inc.", (380.0, 450.0), Some(40.0)),
    stock("XOM", "Exxon Mobil Corporation", (110.0, 130.0), Some(25.0)),
    stock("COST", "Costco Wholesale Corporation", (650.0, 750.0), Some(18.0)),
    stock("JNJ", "Johnson & Johnson", (150.0, 180.0), Some(12.0)),
    stock("HD", "The Home Depot Inc.", (350.0, 420.0), Some(20.0)),
    stock("BABA", "Alibaba Group Holding Limited", (80.0, 120.0), Some(40.0)),
    stock("PDD", "PDD Holdings Inc.", (120.0, 160.0), Some(45.0)),
    stock("NTES", "NetEase Inc.", (90.0, 120.0), Some(30.0)),
    stock("JD", "JD.com Inc.", (35.0, 50.0), Some(35.0)),
    stock("TME", "Tencent Music Entertainment Group", (8.0, 15.0), Some(35.0)),
];

pub fn find(symbol: &str) -> Option<&'static StockInfo> {
    STOCKS
        .iter()
        .find(|stock| stock.symbol.eq_ignore_ascii_case(symbol))
}

/// Static HV used whenever the estimator cannot produce one.
pub fn fallback_hv(symbol: &str) -> f64 {
    find(symbol)
        .and_then(|stock| stock.default_hv)
        .unwrap_or(DEFAULT_HV_PERCENT)
}

pub fn price_range(symbol: &str) -> (f64, f64) {
    find(symbol)
        .map(|stock| stock.price_range)
        .unwrap_or(DEFAULT_PRICE_RANGE)
}
