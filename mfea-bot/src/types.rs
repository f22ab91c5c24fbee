use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ticker of the reference equity index (e.g. `^GSPC`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

/// Identifier of the short-term rate series (e.g. `DTB3`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesId(pub String);

/// Opaque chat-platform user id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub String);

/// Which upstream series a value or failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesKind {
    Price,
    Rate,
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKind::Price => f.write_str("price"),
            SeriesKind::Rate => f.write_str("rate"),
        }
    }
}

/// One daily point of an upstream series. `None` marks a gap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        Self { date, value }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceStatus {
    Over,
    Under,
}

impl fmt::Display for PriceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceStatus::Over => f.write_str("Over"),
            PriceStatus::Under => f.write_str("Under"),
        }
    }
}

/// Decision inputs derived from one invocation's upstream data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub reference_price: f64,
    pub long_average: f64,
    pub price_status: PriceStatus,
    pub annualized_volatility_pct: f64,
    pub short_rate: f64,
    pub short_rate_delta: f64,
    pub rate_falling: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AllocationCategory {
    RiskOn,
    RiskMid,
    RiskAlt,
    RiskOff,
}

impl AllocationCategory {
    pub const ALL: [AllocationCategory; 4] = [
        AllocationCategory::RiskOn,
        AllocationCategory::RiskMid,
        AllocationCategory::RiskAlt,
        AllocationCategory::RiskOff,
    ];

    pub fn description(self) -> &'static str {
        match self {
            AllocationCategory::RiskOn => "100% 3x-leveraged equity",
            AllocationCategory::RiskMid => "100% 2x-leveraged equity",
            AllocationCategory::RiskAlt => "25% 3x-leveraged equity + 75% long-duration bonds",
            AllocationCategory::RiskOff => "100% unleveraged equity",
        }
    }
}

impl fmt::Display for AllocationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationCategory::RiskOn => "RiskOn",
            AllocationCategory::RiskMid => "RiskMid",
            AllocationCategory::RiskAlt => "RiskAlt",
            AllocationCategory::RiskOff => "RiskOff",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionInputs {
    pub above_average: bool,
    pub vol_below_14: bool,
    pub vol_below_24: bool,
    pub rate_falling: bool,
}

/// Where a raw value sat relative to one tolerance band.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandCheck {
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub inside: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandInfo {
    pub price: BandCheck,
    pub vol_14: BandCheck,
    pub vol_24: BandCheck,
    pub rate: BandCheck,
}

impl BandInfo {
    pub fn any_inside(&self) -> bool {
        self.price.inside || self.vol_14.inside || self.vol_24.inside || self.rate.inside
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub category: AllocationCategory,
    pub allocation_description: String,
    pub inputs: DecisionInputs,
    /// Only present for banded evaluation.
    pub band_info: Option<BandInfo>,
}

/// Layout of the "last allocation" record in every tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub allocation: String,
}

impl PersistedState {
    pub fn new(allocation: impl Into<String>) -> Self {
        Self {
            allocation: allocation.into(),
        }
    }

    /// Decode a tier payload; anything other than `{"allocation": "<string>"}` is `None`.
    pub fn decode(raw: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &serde_json::Value) -> Option<String> {
        value
            .get("allocation")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Append-only history entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub allocation: String,
    pub timestamp: DateTime<Utc>,
}
