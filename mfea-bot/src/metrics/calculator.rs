use serde::{Deserialize, Serialize};

use crate::error::MfeaError;
use crate::metrics::stats::{mean, population_stddev, round_to, simple_returns};
use crate::types::{MetricsSnapshot, Observation, PriceStatus, SeriesKind};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MetricsConfig {
    /// Valid prices averaged for the long trend (default 220).
    pub long_window: usize,
    /// Simple returns used for volatility; needs one extra price (default 21).
    pub volatility_returns: usize,
    /// Valid rate points between the latest rate and its comparison point (default 21).
    pub rate_lookback: usize,
    /// Annualization factor for daily volatility (default 252).
    pub trading_days: f64,
    /// Rate deltas at or above this count as flat, not falling (default -0.0001).
    pub rate_dead_zone: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            long_window: 220,
            volatility_returns: 21,
            rate_lookback: 21,
            trading_days: 252.0,
            rate_dead_zone: -0.0001,
        }
    }
}

/// Turns raw upstream series into one [`MetricsSnapshot`].
///
/// Both series are assumed ordered oldest->newest. Gaps (missing, non-finite,
/// and for prices non-positive values) are dropped before any window is taken,
/// so every window counts *valid* points only.
#[derive(Clone, Debug, Default)]
pub struct MetricsCalculator {
    cfg: MetricsConfig,
}

impl MetricsCalculator {
    pub fn new(cfg: MetricsConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.cfg
    }

    pub fn compute(
        &self,
        prices: &[Observation],
        rates: &[Observation],
    ) -> Result<MetricsSnapshot, MfeaError> {
        let prices = valid_prices(prices);
        let rates = valid_rates(rates);

        let long_average = self.long_average(&prices)?;
        let reference_price = *prices
            .last()
            .ok_or_else(|| MfeaError::insufficient(SeriesKind::Price, self.cfg.long_window, 0))?;
        let price_status = if reference_price > long_average {
            PriceStatus::Over
        } else {
            PriceStatus::Under
        };

        let annualized_volatility_pct = self.annualized_volatility_pct(&prices)?;
        let (short_rate, short_rate_delta) = self.rate_trend(&rates)?;

        Ok(MetricsSnapshot {
            reference_price,
            long_average,
            price_status,
            annualized_volatility_pct,
            short_rate,
            short_rate_delta,
            rate_falling: short_rate_delta < self.cfg.rate_dead_zone,
        })
    }

    fn long_average(&self, prices: &[f64]) -> Result<f64, MfeaError> {
        let window = self.cfg.long_window;
        if window == 0 || prices.len() < window {
            return Err(MfeaError::insufficient(SeriesKind::Price, window, prices.len()));
        }
        mean(&prices[prices.len() - window..])
            .ok_or_else(|| MfeaError::insufficient(SeriesKind::Price, window, prices.len()))
    }

    fn annualized_volatility_pct(&self, prices: &[f64]) -> Result<f64, MfeaError> {
        let needed = self.cfg.volatility_returns + 1;
        if self.cfg.volatility_returns == 0 || prices.len() < needed {
            return Err(MfeaError::insufficient(SeriesKind::Price, needed, prices.len()));
        }
        let returns = simple_returns(&prices[prices.len() - needed..]);
        let daily = population_stddev(&returns)
            .ok_or_else(|| MfeaError::insufficient(SeriesKind::Price, needed, prices.len()))?;
        Ok(round_to(daily * self.cfg.trading_days.sqrt() * 100.0, 2))
    }

    /// Latest rate and its change versus `rate_lookback` valid points earlier,
    /// clamped to the oldest point on short series.
    fn rate_trend(&self, rates: &[f64]) -> Result<(f64, f64), MfeaError> {
        let Some(&latest) = rates.last() else {
            return Err(MfeaError::insufficient(SeriesKind::Rate, 1, 0));
        };
        let earlier_idx = (rates.len() - 1).saturating_sub(self.cfg.rate_lookback);
        Ok((latest, latest - rates[earlier_idx]))
    }
}

fn valid_prices(series: &[Observation]) -> Vec<f64> {
    series
        .iter()
        .filter_map(|o| o.value)
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect()
}

fn valid_rates(series: &[Observation]) -> Vec<f64> {
    series
        .iter()
        .filter_map(|o| o.value)
        .filter(|v| v.is_finite())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(values: &[Option<f64>]) -> Vec<Observation> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Observation::new(start + Duration::days(i as i64), *v))
            .collect()
    }

    fn flat(value: f64, n: usize) -> Vec<Option<f64>> {
        vec![Some(value); n]
    }

    fn flat_rates() -> Vec<Observation> {
        series(&flat(4.0, 30))
    }

    #[test]
    fn long_average_ignores_history_before_window() {
        let mut values: Vec<Option<f64>> = (0..80).map(|i| Some(1_000.0 + i as f64 * 37.0)).collect();
        values.extend((0..220).map(|i| Some(100.0 + i as f64)));
        let snap = MetricsCalculator::default()
            .compute(&series(&values), &flat_rates())
            .unwrap();
        // mean of 100..=319
        assert!((snap.long_average - 209.5).abs() < 1e-9);
        assert_eq!(snap.reference_price, 319.0);
        assert_eq!(snap.price_status, PriceStatus::Over);
    }

    #[test]
    fn gaps_do_not_count_toward_window() {
        let mut values = flat(100.0, 219);
        values.insert(50, None);
        values.insert(60, Some(f64::NAN));
        values.insert(70, Some(-3.0));
        let err = MetricsCalculator::default()
            .compute(&series(&values), &flat_rates())
            .unwrap_err();
        assert!(matches!(
            err,
            MfeaError::InsufficientData {
                series: SeriesKind::Price,
                required: 220,
                available: 219
            }
        ));
    }

    #[test]
    fn price_equal_to_average_is_under() {
        let snap = MetricsCalculator::default()
            .compute(&series(&flat(250.0, 240)), &flat_rates())
            .unwrap();
        assert_eq!(snap.price_status, PriceStatus::Under);
        assert_eq!(snap.annualized_volatility_pct, 0.0);
    }

    #[test]
    fn volatility_uses_last_22_prices() {
        // Alternating +1% / -1% moves keep the return stddev close to 1%.
        let mut values = flat(100.0, 200);
        let mut p = 100.0;
        for i in 0..22 {
            p *= if i % 2 == 0 { 1.01 } else { 0.99 };
            values.push(Some(p));
        }
        let snap = MetricsCalculator::default()
            .compute(&series(&values), &flat_rates())
            .unwrap();

        let tail: Vec<f64> = values[values.len() - 22..].iter().map(|v| v.unwrap()).collect();
        let returns = simple_returns(&tail);
        let expected = round_to(population_stddev(&returns).unwrap() * 252f64.sqrt() * 100.0, 2);
        assert_eq!(snap.annualized_volatility_pct, expected);
        assert!(snap.annualized_volatility_pct > 15.0 && snap.annualized_volatility_pct < 17.0);
    }

    #[test]
    fn rate_delta_looks_back_21_valid_points() {
        let mut rates: Vec<Option<f64>> = (0..30).map(|i| Some(5.0 - i as f64 * 0.01)).collect();
        rates.insert(25, None);
        let snap = MetricsCalculator::default()
            .compute(&series(&flat(100.0, 220)), &series(&rates))
            .unwrap();
        assert!((snap.short_rate - 4.71).abs() < 1e-9);
        assert!((snap.short_rate_delta + 0.21).abs() < 1e-9);
        assert!(snap.rate_falling);
    }

    #[test]
    fn rate_delta_clamps_to_oldest_point() {
        let rates = series(&[Some(4.00), Some(4.10), Some(4.05)]);
        let snap = MetricsCalculator::default()
            .compute(&series(&flat(100.0, 220)), &rates)
            .unwrap();
        assert!((snap.short_rate_delta - 0.05).abs() < 1e-9);
        assert!(!snap.rate_falling);
    }

    #[test]
    fn small_negative_delta_inside_dead_zone_is_not_falling() {
        let mut rates = flat(4.0, 21);
        rates.push(Some(4.0 - 0.00005));
        let snap = MetricsCalculator::default()
            .compute(&series(&flat(100.0, 220)), &series(&rates))
            .unwrap();
        assert!(!snap.rate_falling);
    }

    #[test]
    fn empty_rate_series_is_insufficient() {
        let err = MetricsCalculator::default()
            .compute(&series(&flat(100.0, 220)), &series(&[None, None]))
            .unwrap_err();
        assert!(matches!(
            err,
            MfeaError::InsufficientData {
                series: SeriesKind::Rate,
                ..
            }
        ));
    }
}
