//! Market-data provider seam.
//!
//! The HTTP client that talks to the real data vendor lives outside this
//! crate; anything implementing [`MarketDataProvider`] can drive the detector.

use std::future::Future;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};

use crate::error::ProviderError;
use crate::types::{Observation, SeriesId, Symbol};

pub mod fixture;

pub use fixture::{FixtureProvider, StaticProvider};

/// Calendar window requested from the provider, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    /// `days` calendar days back from today (UTC).
    pub fn trailing(days: u32) -> Self {
        let end = Utc::now().date_naive();
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }
}

/// Everything one invocation asks the provider for.
#[derive(Clone, Debug)]
pub struct SeriesRequest {
    pub symbol: Symbol,
    pub price_window: FetchWindow,
    pub rate_series: SeriesId,
    pub rate_window: FetchWindow,
    /// Bound on each fetch.
    pub timeout: StdDuration,
}

/// Both series of one invocation; each side fails on its own.
#[derive(Debug)]
pub struct SeriesPair {
    pub prices: Result<Vec<Observation>, ProviderError>,
    pub rates: Result<Vec<Observation>, ProviderError>,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily closes for `symbol`, oldest first. Gaps are allowed.
    async fn price_series(
        &self,
        symbol: &Symbol,
        window: FetchWindow,
    ) -> Result<Vec<Observation>, ProviderError>;

    /// Daily short-rate observations for `series`, oldest first. Gaps are allowed.
    async fn rate_series(
        &self,
        series: &SeriesId,
        window: FetchWindow,
    ) -> Result<Vec<Observation>, ProviderError>;

    /// Fetch both series concurrently. Providers whose backing data can be
    /// replaced between reads override this so both sides come from one read.
    async fn fetch_pair(&self, request: &SeriesRequest) -> SeriesPair {
        let (prices, rates) = tokio::join!(
            with_timeout(
                request.timeout,
                self.price_series(&request.symbol, request.price_window)
            ),
            with_timeout(
                request.timeout,
                self.rate_series(&request.rate_series, request.rate_window)
            ),
        );
        SeriesPair { prices, rates }
    }
}

/// Run `fut`, mapping an elapsed deadline to [`ProviderError::Timeout`].
pub async fn with_timeout<F, T>(limit: StdDuration, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(ProviderError::Timeout(limit)))
}
