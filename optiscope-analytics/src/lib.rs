#![forbid(unsafe_code)]
#![warn(unused, clippy::cognitive_complexity)]

//! # Optiscope Analytics
//! Volatility analytics and scoring for equity call options.
//!
//! The pipeline:
//! * **Historical volatility**: annualised HV from daily adjusted closes, cached per day.
//! * **Benchmarks**: cancellable multi-day backfills that bucket historical option IV by
//!   days to expiry and persist a volume-weighted [`BenchmarkSnapshot`] per symbol.
//! * **Qualification**: liquidity, bid/ask spread and IV sanity gates.
//! * **Scoring**: CAS (buy/sell call) and CCAS (covered call) scores in `[0, 100]`.
//! * **Orchestration**: [`AnalysisOrchestrator`] ties the above to a market data provider,
//!   falling back to synthetic data whenever the provider cannot serve a request.
//!
//! [`BenchmarkSnapshot`]: benchmark::BenchmarkSnapshot

/// All errors generated in `optiscope-analytics`.
pub mod error;

/// Injectable calendar.
pub mod clock;

/// Environment driven configuration.
pub mod config;

/// Atomic JSON file persistence.
pub mod persist;

/// Day-scoped key/value cache.
pub mod cache;

/// Prices, quotes and option contracts.
pub mod model;

/// Historical volatility estimator.
pub mod volatility;

/// Qualification gates applied before scoring.
pub mod filter;

/// CAS and CCAS scoring.
pub mod scoring;

/// Historical IV benchmarks and backfill.
pub mod benchmark;

/// Market data sources.
pub mod provider;

/// Supported symbols and their static defaults.
pub mod universe;

/// Lenient provider payload deserialisers.
pub mod de;

/// Per-request analysis pipeline.
pub mod orchestrator;

pub use orchestrator::{AnalysisOrchestrator, AnalysisReport, AnalysisRequest, DataSource};
