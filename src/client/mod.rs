//! Market data clients

pub mod alpha_vantage;
pub mod cache;

pub use alpha_vantage::{AlphaVantageClient, OutputSize, ProbeReport};
pub use cache::CachedQuoteSource;

use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Anything that can price a stock right now
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest available price for `symbol`
    async fn current_price(&self, symbol: &str) -> Result<Decimal>;
}

#[async_trait]
impl QuoteSource for AlphaVantageClient {
    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        self.fetch_current_price(symbol).await
    }
}
