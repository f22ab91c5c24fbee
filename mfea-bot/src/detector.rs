//! Change detector: one fetch → classify → compare → persist → notify pass.
//!
//! The detector holds no state between invocations. Everything it needs to
//! know about earlier runs comes from the [`StateStore`], so a crash or a
//! concurrent invocation can at worst produce a duplicate notification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::MfeaError;
use crate::metrics::{MetricsCalculator, MetricsConfig};
use crate::notify::{MessageId, NotificationSink, StatusMessage, SubscriberRegistry};
use crate::provider::{FetchWindow, MarketDataProvider, SeriesRequest};
use crate::store::{StateStore, WriteReport};
use crate::strategy::{AllocationClassifier, ClassifierConfig, Evaluation};
use crate::types::{Observation, SeriesId, SeriesKind, SubscriberId, Symbol};

#[derive(Clone, Debug)]
pub struct DetectorSettings {
    pub symbol: Symbol,
    pub rate_series: SeriesId,
    /// Calendar days of prices requested; must cover the long window plus gaps.
    pub price_lookback_days: u32,
    pub rate_lookback_days: u32,
    /// Applies to each upstream fetch.
    pub fetch_timeout: Duration,
    /// Delay before mentions are replaced by a subscriber count.
    pub edit_delay: Duration,
    pub metrics: MetricsConfig,
    pub classifier: ClassifierConfig,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            symbol: Symbol("^GSPC".into()),
            rate_series: SeriesId("DTB3".into()),
            price_lookback_days: 400,
            rate_lookback_days: 60,
            fetch_timeout: Duration::from_secs(20),
            edit_delay: Duration::from_secs(5),
            metrics: MetricsConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Fetching,
    Classifying,
    Comparing,
    Persisting,
    Notifying,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Fetching => "fetching",
            Phase::Classifying => "classifying",
            Phase::Comparing => "comparing",
            Phase::Persisting => "persisting",
            Phase::Notifying => "notifying",
        };
        f.write_str(s)
    }
}

/// Result of one [`ChangeDetector::check_allocation`] call.
#[derive(Debug, Serialize)]
pub struct CheckOutcome {
    /// Last persisted allocation; `None` when no tier had a record.
    pub previous: Option<String>,
    pub current: String,
    pub changed: bool,
    /// A notification was accepted by the sink.
    pub notified: bool,
    pub evaluation: Evaluation,
    /// Present only when the allocation changed.
    pub write_report: Option<WriteReport>,
    /// Snapshot append and deferred edit tasks still running.
    #[serde(skip)]
    pub background: Vec<JoinHandle<()>>,
}

impl CheckOutcome {
    /// Wait for the background tasks. Short-lived processes call this before
    /// exiting so the runtime does not cancel a pending edit.
    pub async fn settle(&mut self) {
        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task aborted");
            }
        }
    }
}

pub struct ChangeDetector {
    provider: Arc<dyn MarketDataProvider>,
    store: StateStore,
    notifier: Arc<dyn NotificationSink>,
    registry: Arc<dyn SubscriberRegistry>,
    calculator: MetricsCalculator,
    classifier: AllocationClassifier,
    settings: DetectorSettings,
}

impl ChangeDetector {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: StateStore,
        notifier: Arc<dyn NotificationSink>,
        registry: Arc<dyn SubscriberRegistry>,
        settings: DetectorSettings,
    ) -> Self {
        // The rate band must report the threshold that produced `rate_falling`.
        let mut classifier = settings.classifier.clone();
        classifier.rate_dead_zone = settings.metrics.rate_dead_zone;
        Self {
            provider,
            store,
            notifier,
            registry,
            calculator: MetricsCalculator::new(settings.metrics.clone()),
            classifier: AllocationClassifier::new(classifier),
            settings,
        }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Fetch and classify without touching state or notifying anyone.
    pub async fn evaluate(&self) -> Result<Evaluation, MfeaError> {
        enter(Phase::Fetching);
        let (prices, rates) = self.fetch().await?;
        enter(Phase::Classifying);
        let snapshot = self.calculator.compute(&prices, &rates)?;
        let evaluation = self.classifier.evaluate(snapshot);
        tracing::debug!(
            strict = %evaluation.strict.category,
            banded = %evaluation.banded.category,
            "classified"
        );
        Ok(evaluation)
    }

    pub async fn check_allocation(
        &self,
        force_notify: bool,
        title: &str,
    ) -> Result<CheckOutcome, MfeaError> {
        let evaluation = match self.evaluate().await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                enter(Phase::Idle);
                return Err(e);
            }
        };
        let current = evaluation.banded.allocation_description.clone();

        enter(Phase::Comparing);
        let previous = self.store.read_last().await;
        let changed = previous.as_deref() != Some(current.as_str());
        tracing::info!(
            previous = previous.as_deref().unwrap_or("unknown"),
            %current,
            changed,
            "allocation compared"
        );

        let mut background = Vec::new();
        let mut write_report = None;
        let mut mentions = Vec::new();
        if changed {
            enter(Phase::Persisting);
            let report = self.store.write_last(&current).await;
            if report.attempted() > 0 && report.succeeded() == 0 {
                tracing::error!(%current, "allocation change was not persisted to any tier");
            }
            write_report = Some(report);
            background.push(self.store.append_snapshot(&current, Utc::now()));
            mentions = self.resolve_subscribers().await;
        }

        let mut notified = false;
        if changed || force_notify {
            enter(Phase::Notifying);
            let message = StatusMessage::compose(title, previous.as_deref(), &evaluation, changed)
                .with_mentions(mentions);
            match self.notifier.send(&message).await {
                Ok(id) => {
                    notified = true;
                    tracing::info!(mentions = message.mentions.len(), "notification sent");
                    if let Some(id) = id.filter(|_| !message.mentions.is_empty()) {
                        background.push(self.schedule_edit(id, message.summarized()));
                    }
                }
                Err(e) => tracing::error!(error = %e, "notification dispatch failed"),
            }
        }

        enter(Phase::Idle);
        Ok(CheckOutcome {
            previous,
            current,
            changed,
            notified,
            evaluation,
            write_report,
            background,
        })
    }

    async fn fetch(&self) -> Result<(Vec<Observation>, Vec<Observation>), MfeaError> {
        let s = &self.settings;
        let request = SeriesRequest {
            symbol: s.symbol.clone(),
            price_window: FetchWindow::trailing(s.price_lookback_days),
            rate_series: s.rate_series.clone(),
            rate_window: FetchWindow::trailing(s.rate_lookback_days),
            timeout: s.fetch_timeout,
        };
        let pair = self.provider.fetch_pair(&request).await;
        let prices = pair.prices.map_err(|source| MfeaError::UpstreamUnavailable {
            series: SeriesKind::Price,
            source,
        })?;
        let rates = pair.rates.map_err(|source| MfeaError::UpstreamUnavailable {
            series: SeriesKind::Rate,
            source,
        })?;
        tracing::debug!(prices = prices.len(), rates = rates.len(), "series fetched");
        Ok((prices, rates))
    }

    async fn resolve_subscribers(&self) -> Vec<SubscriberId> {
        match self.registry.subscribers().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "subscriber lookup failed; notifying without mentions");
                Vec::new()
            }
        }
    }

    fn schedule_edit(&self, id: MessageId, summary: StatusMessage) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let delay = self.settings.edit_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match notifier.edit(&id, &summary).await {
                Ok(()) => tracing::debug!(id = %id.0, "mentions summarized"),
                Err(e) => tracing::warn!(id = %id.0, error = %e, "deferred edit failed"),
            }
        })
    }
}

fn enter(phase: Phase) {
    tracing::debug!(%phase, "phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::notify::{LogNotifier, StaticRegistry};
    use crate::store::MemoryTier;
    use async_trait::async_trait;

    struct SlowProvider;

    #[async_trait]
    impl MarketDataProvider for SlowProvider {
        async fn price_series(
            &self,
            _symbol: &Symbol,
            _window: FetchWindow,
        ) -> Result<Vec<Observation>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn rate_series(
            &self,
            _series: &SeriesId,
            _window: FetchWindow,
        ) -> Result<Vec<Observation>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out_without_touching_state() {
        let tier = Arc::new(MemoryTier::seeded("file", "100% unleveraged equity"));
        let detector = ChangeDetector::new(
            Arc::new(SlowProvider),
            StateStore::new(vec![tier.clone()]),
            Arc::new(LogNotifier),
            Arc::new(StaticRegistry::default()),
            DetectorSettings::default(),
        );

        let err = detector.check_allocation(true, "t").await.unwrap_err();
        assert!(
            matches!(
                err,
                MfeaError::UpstreamUnavailable {
                    series: SeriesKind::Price,
                    source: ProviderError::Timeout(_)
                }
            ),
            "expected price timeout: {err:?}"
        );
        assert_eq!(tier.write_count(), 0);
    }

    #[tokio::test]
    async fn rate_band_reports_the_calculators_dead_zone() {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day = |i: usize| start + chrono::Duration::days(i as i64);
        let prices = (0..240).map(|i| Observation::new(day(i), Some(100.0))).collect();
        // Delta of -0.0003: falling under a -0.0002 dead zone, flat under -0.0005.
        let rates = (0..30)
            .map(|i| Observation::new(day(i), Some(if i < 29 { 4.0 } else { 3.9997 })))
            .collect();

        let mut settings = DetectorSettings::default();
        settings.metrics.rate_dead_zone = -0.0002;
        settings.classifier.rate_dead_zone = -0.0005;
        let detector = ChangeDetector::new(
            Arc::new(crate::provider::StaticProvider::new(prices, rates)),
            StateStore::default(),
            Arc::new(LogNotifier),
            Arc::new(StaticRegistry::default()),
            settings,
        );

        let eval = detector.evaluate().await.unwrap();
        assert!(eval.snapshot.rate_falling);
        let rate = eval.banded.band_info.unwrap().rate;
        assert_eq!(rate.upper, -0.0002);
        assert!(rate.inside, "expected rate inside band: {rate:?}");
    }

    #[test]
    fn phases_render_lowercase() {
        assert_eq!(Phase::Persisting.to_string(), "persisting");
        assert_eq!(Phase::Idle.to_string(), "idle");
    }
}
