//! Paper Stock Trader
//!
//! Users hold a virtual cash balance and buy/sell stocks at prices from the
//! Alpha Vantage daily time series.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (api) → Auth (sessions) → Ledger (buy/sell/reset) → Storage (SQLite)
//!                                   ↑                          ↑
//!                     Quotes (Alpha Vantage + cache)    Portfolio (valuation)
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod portfolio;
pub mod storage;
pub mod types;

#[cfg(test)]
mod config_tests;
