use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::ValueEnum;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::detector::DetectorSettings;
use crate::metrics::MetricsConfig;
use crate::store::{ConfigStoreTier, FileTier, KvTier, StateStore, StateTier};
use crate::strategy::ClassifierConfig;
use crate::types::{SeriesId, SubscriberId, Symbol};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
    #[error("environment variable {0} is not set")]
    MissingSecret(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    pub provider: ProviderSection,
    pub store: StoreSection,
    #[serde(default)]
    pub notify: NotifySection,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct StrategySection {
    pub symbol: String,
    pub rate_series: String,
    pub price_lookback_days: u32,
    pub rate_lookback_days: u32,
    pub fetch_timeout_ms: u64,
    /// Heading of every status message.
    pub title: String,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            symbol: "^GSPC".into(),
            rate_series: "DTB3".into(),
            price_lookback_days: 400,
            rate_lookback_days: 60,
            fetch_timeout_ms: 20_000,
            title: "MFEA allocation check".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderSection {
    /// JSON file with `prices` and `rates` arrays.
    pub fixture: PathBuf,
}

/// Tiers are read in the order kv, config-store, file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct StoreSection {
    pub kv: Option<KvSection>,
    pub config_store: Option<ConfigStoreSection>,
    pub file: Option<FileSection>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct KvSection {
    pub url: String,
    pub token_env: String,
    #[serde(default = "default_state_key")]
    pub key: String,
    pub history_key: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigStoreSection {
    pub read_url: String,
    pub read_token_env: String,
    pub write_url: String,
    pub write_token_env: String,
    #[serde(default = "default_config_store_key")]
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct FileSection {
    pub path: PathBuf,
    pub history: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NotifySection {
    /// Unset means notifications are only logged.
    pub webhook_url_env: Option<String>,
    #[serde(default = "default_edit_delay_ms")]
    pub edit_delay_ms: u64,
    #[serde(default)]
    pub subscribers: Vec<String>,
    pub subscribers_file: Option<PathBuf>,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            webhook_url_env: None,
            edit_delay_ms: default_edit_delay_ms(),
            subscribers: Vec::new(),
            subscribers_file: None,
        }
    }
}

fn default_state_key() -> String {
    "mfea:last-allocation".into()
}

fn default_config_store_key() -> String {
    "mfea_last_allocation".into()
}

const fn default_edit_delay_ms() -> u64 {
    5_000
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        if s.symbol.trim().is_empty() || s.rate_series.trim().is_empty() {
            return Err(ConfigError::Validation(
                "strategy symbol and rate-series must be set".into(),
            ));
        }
        if s.price_lookback_days == 0 || s.rate_lookback_days == 0 {
            return Err(ConfigError::Validation(
                "lookback windows must be greater than zero".into(),
            ));
        }
        if s.fetch_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "fetch-timeout-ms must be greater than zero".into(),
            ));
        }
        let m = &self.metrics;
        if m.long_window == 0 || m.volatility_returns == 0 {
            return Err(ConfigError::Validation(
                "metrics windows must be greater than zero".into(),
            ));
        }
        if m.trading_days <= 0.0 {
            return Err(ConfigError::Validation(
                "trading-days must be positive".into(),
            ));
        }
        let c = &self.classifier;
        if c.vol_low >= c.vol_high {
            return Err(ConfigError::Validation(format!(
                "vol-low ({}) must be below vol-high ({})",
                c.vol_low, c.vol_high
            )));
        }
        if c.price_band_pct < 0.0 || c.vol_band_points < 0.0 {
            return Err(ConfigError::Validation(
                "band widths cannot be negative".into(),
            ));
        }
        if c.rate_dead_zone != m.rate_dead_zone {
            return Err(ConfigError::Validation(format!(
                "classifier rate-dead-zone ({}) must match metrics rate-dead-zone ({})",
                c.rate_dead_zone, m.rate_dead_zone
            )));
        }
        if c.rate_commit_threshold > c.rate_dead_zone {
            return Err(ConfigError::Validation(
                "rate-commit-threshold must not exceed rate-dead-zone".into(),
            ));
        }
        if self.store.is_empty() {
            return Err(ConfigError::Validation(
                "at least one store tier must be configured".into(),
            ));
        }
        if let Some(kv) = &self.store.kv {
            parse_url("store.kv.url", &kv.url)?;
        }
        if let Some(cs) = &self.store.config_store {
            parse_url("store.config-store.read-url", &cs.read_url)?;
            parse_url("store.config-store.write-url", &cs.write_url)?;
        }
        Ok(())
    }

    pub fn sample() -> Self {
        Self {
            strategy: StrategySection::default(),
            metrics: MetricsConfig::default(),
            classifier: ClassifierConfig::default(),
            provider: ProviderSection {
                fixture: "fixtures/series.json".into(),
            },
            store: StoreSection {
                kv: Some(KvSection {
                    url: "https://kv.example.com".into(),
                    token_env: "MFEA_KV_TOKEN".into(),
                    key: default_state_key(),
                    history_key: Some("mfea:history".into()),
                }),
                config_store: None,
                file: Some(FileSection {
                    path: "state/last-allocation.json".into(),
                    history: Some("state/history.jsonl".into()),
                }),
            },
            notify: NotifySection {
                webhook_url_env: Some("MFEA_WEBHOOK_URL".into()),
                ..NotifySection::default()
            },
        }
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        let s = &self.strategy;
        DetectorSettings {
            symbol: Symbol(s.symbol.clone()),
            rate_series: SeriesId(s.rate_series.clone()),
            price_lookback_days: s.price_lookback_days,
            rate_lookback_days: s.rate_lookback_days,
            fetch_timeout: Duration::from_millis(s.fetch_timeout_ms),
            edit_delay: Duration::from_millis(self.notify.edit_delay_ms),
            metrics: self.metrics.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl StoreSection {
    pub fn is_empty(&self) -> bool {
        self.kv.is_none() && self.config_store.is_none() && self.file.is_none()
    }

    /// Build the configured tiers, resolving secrets through `env`.
    pub fn build<F>(&self, client: &Client, env: F) -> Result<StateStore, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |name: &str| env(name).ok_or_else(|| ConfigError::MissingSecret(name.to_string()));
        let mut tiers: Vec<Arc<dyn StateTier>> = Vec::new();
        if let Some(kv) = &self.kv {
            let mut tier = KvTier::new(
                client.clone(),
                parse_url("store.kv.url", &kv.url)?,
                secret(&kv.token_env)?,
                kv.key.clone(),
            );
            if let Some(history) = &kv.history_key {
                tier = tier.with_history_key(history.clone());
            }
            tiers.push(Arc::new(tier));
        }
        if let Some(cs) = &self.config_store {
            tiers.push(Arc::new(ConfigStoreTier::new(
                client.clone(),
                parse_url("store.config-store.read-url", &cs.read_url)?,
                secret(&cs.read_token_env)?,
                parse_url("store.config-store.write-url", &cs.write_url)?,
                secret(&cs.write_token_env)?,
                cs.key.clone(),
            )));
        }
        if let Some(file) = &self.file {
            let mut tier = FileTier::new(&file.path);
            if let Some(history) = &file.history {
                tier = tier.with_history(history);
            }
            tiers.push(Arc::new(tier));
        }
        Ok(StateStore::new(tiers))
    }
}

impl NotifySection {
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.iter().cloned().map(SubscriberId).collect()
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|err| ConfigError::Validation(format!("{field}: {err}")))
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse {
                format: ConfigFormat::Toml,
                details: err.to_string(),
            })
        }
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}
