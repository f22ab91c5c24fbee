use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::provider::{with_timeout, FetchWindow, MarketDataProvider, SeriesPair, SeriesRequest};
use crate::types::{Observation, SeriesId, Symbol};

/// On-disk layout read by [`FixtureProvider`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesFixture {
    pub prices: Vec<Observation>,
    pub rates: Vec<Observation>,
}

/// Serves series from a captured JSON file, re-read on every invocation so an
/// external job can refresh it between scheduled runs. [`fetch_pair`] reads the
/// file once, so prices and rates always come from the same capture. The
/// window is ignored: a fixture is already the window it was captured for.
///
/// [`fetch_pair`]: MarketDataProvider::fetch_pair
#[derive(Clone, Debug)]
pub struct FixtureProvider {
    path: PathBuf,
}

impl FixtureProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<SeriesFixture, ProviderError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ProviderError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl MarketDataProvider for FixtureProvider {
    async fn price_series(
        &self,
        _symbol: &Symbol,
        _window: FetchWindow,
    ) -> Result<Vec<Observation>, ProviderError> {
        Ok(self.load().await?.prices)
    }

    async fn rate_series(
        &self,
        _series: &SeriesId,
        _window: FetchWindow,
    ) -> Result<Vec<Observation>, ProviderError> {
        Ok(self.load().await?.rates)
    }

    async fn fetch_pair(&self, request: &SeriesRequest) -> SeriesPair {
        match with_timeout(request.timeout, self.load()).await {
            Ok(fixture) => SeriesPair {
                prices: Ok(fixture.prices),
                rates: Ok(fixture.rates),
            },
            Err(e) => {
                let rates = Err(ProviderError::Unavailable(format!(
                    "fixture {} unreadable: {e}",
                    self.path.display()
                )));
                SeriesPair {
                    prices: Err(e),
                    rates,
                }
            }
        }
    }
}

/// In-memory provider; data can be swapped between invocations.
#[derive(Debug, Default)]
pub struct StaticProvider {
    data: Mutex<SeriesFixture>,
}

impl StaticProvider {
    pub fn new(prices: Vec<Observation>, rates: Vec<Observation>) -> Self {
        Self {
            data: Mutex::new(SeriesFixture { prices, rates }),
        }
    }

    pub fn replace(&self, prices: Vec<Observation>, rates: Vec<Observation>) {
        *self.data.lock() = SeriesFixture { prices, rates };
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn price_series(
        &self,
        _symbol: &Symbol,
        _window: FetchWindow,
    ) -> Result<Vec<Observation>, ProviderError> {
        Ok(self.data.lock().prices.clone())
    }

    async fn rate_series(
        &self,
        _series: &SeriesId,
        _window: FetchWindow,
    ) -> Result<Vec<Observation>, ProviderError> {
        Ok(self.data.lock().rates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn fixture_round_trips_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.json");
        std::fs::write(
            &path,
            r#"{
                "prices": [{"date": "2025-01-02", "value": 5868.55}, {"date": "2025-01-03", "value": null}],
                "rates": [{"date": "2025-01-02", "value": 4.31}]
            }"#,
        )
        .unwrap();

        let provider = FixtureProvider::new(&path);
        let window = FetchWindow::trailing(400);
        let prices = provider
            .price_series(&Symbol("^GSPC".into()), window)
            .await
            .unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[1].value, None);
        assert_eq!(prices[0].date, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());

        let rates = provider
            .rate_series(&SeriesId("DTB3".into()), window)
            .await
            .unwrap();
        assert_eq!(rates[0].value, Some(4.31));
    }

    fn request() -> SeriesRequest {
        SeriesRequest {
            symbol: Symbol("^GSPC".into()),
            price_window: FetchWindow::trailing(400),
            rate_series: SeriesId("DTB3".into()),
            rate_window: FetchWindow::trailing(60),
            timeout: std::time::Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn pair_comes_from_one_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.json");
        let capture = |price: f64, rate: f64| {
            format!(
                r#"{{"prices": [{{"date": "2025-01-02", "value": {price}}}],
                    "rates": [{{"date": "2025-01-02", "value": {rate}}}]}}"#
            )
        };
        std::fs::write(&path, capture(5868.55, 4.31)).unwrap();
        let provider = FixtureProvider::new(&path);

        let pair = provider.fetch_pair(&request()).await;
        assert_eq!(pair.prices.unwrap()[0].value, Some(5868.55));
        assert_eq!(pair.rates.unwrap()[0].value, Some(4.31));

        std::fs::write(&path, capture(5900.0, 4.2)).unwrap();
        let pair = provider.fetch_pair(&request()).await;
        assert_eq!(pair.prices.unwrap()[0].value, Some(5900.0));
        assert_eq!(pair.rates.unwrap()[0].value, Some(4.2));
    }

    #[tokio::test]
    async fn unreadable_fixture_fails_both_sides() {
        let provider = FixtureProvider::new("/nonexistent/mfea/series.json");
        let pair = provider.fetch_pair(&request()).await;
        assert!(matches!(pair.prices, Err(ProviderError::Io { .. })));
        assert!(matches!(pair.rates, Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn missing_fixture_is_an_io_error() {
        let provider = FixtureProvider::new("/nonexistent/mfea/series.json");
        let err = provider
            .price_series(&Symbol("^GSPC".into()), FetchWindow::trailing(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Io { .. }));
    }
}
