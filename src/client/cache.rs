//! Short-lived quote cache
//!
//! Alpha Vantage's free tier allows a handful of calls per minute, so
//! repeated lookups for the same ticker are served from memory for `ttl`.

use super::QuoteSource;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct CachedQuoteSource<S> {
    inner: S,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Decimal)>>,
}

impl<S: QuoteSource> CachedQuoteSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, symbol: &str) -> Option<Decimal> {
        let entries = self.entries.lock();
        entries
            .get(symbol)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, price)| *price)
    }
}

#[async_trait]
impl<S: QuoteSource> QuoteSource for CachedQuoteSource<S> {
    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        if self.ttl.is_zero() {
            return self.inner.current_price(symbol).await;
        }

        if let Some(price) = self.cached(symbol) {
            debug!("Quote cache hit for {}", symbol);
            return Ok(price);
        }

        let price = self.inner.current_price(symbol).await?;
        self.entries
            .lock()
            .insert(symbol.to_string(), (Instant::now(), price));
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockQuoteSource;
    use crate::error::TraderError;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_second_lookup_is_cached() {
        let mut mock = MockQuoteSource::new();
        mock.expect_current_price()
            .times(1)
            .returning(|_| Ok(dec!(101.25)));

        let cache = CachedQuoteSource::new(mock, Duration::from_secs(60));
        assert_eq!(cache.current_price("IBM").await.unwrap(), dec!(101.25));
        assert_eq!(cache.current_price("IBM").await.unwrap(), dec!(101.25));
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let mut mock = MockQuoteSource::new();
        mock.expect_current_price()
            .times(2)
            .returning(|_| Ok(dec!(5)));

        let cache = CachedQuoteSource::new(mock, Duration::ZERO);
        cache.current_price("IBM").await.unwrap();
        cache.current_price("IBM").await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let mut mock = MockQuoteSource::new();
        let mut calls = 0;
        mock.expect_current_price().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(TraderError::MarketData("rate limited".into()))
            } else {
                Ok(dec!(7))
            }
        });

        let cache = CachedQuoteSource::new(mock, Duration::from_secs(60));
        assert!(cache.current_price("IBM").await.is_err());
        assert_eq!(cache.current_price("IBM").await.unwrap(), dec!(7));
    }
}
