//! MFEA allocation decision tree.
//!
//! One tree, two ways of deriving its boolean inputs from a [`MetricsSnapshot`]:
//! - **strict**: raw threshold comparisons, flips on every crossing;
//! - **banded**: each input must clear a tolerance band before it commits, and
//!   falls back to the strict comparison while the raw value sits inside it.
//!
//! Banded evaluation is stateless: "inside the band" never looks at prior runs.

use serde::{Deserialize, Serialize};

use crate::types::{
    AllocationCategory, AllocationResult, BandCheck, BandInfo, DecisionInputs, MetricsSnapshot,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClassifierConfig {
    /// Volatility (annualized %) below which full 3x leverage is allowed.
    pub vol_low: f64,
    /// Volatility (annualized %) below which 2x leverage is allowed.
    pub vol_high: f64,
    /// Half-width of the price band as a fraction of the long average. 0.02 = ±2%.
    pub price_band_pct: f64,
    /// Half-width of both volatility bands in absolute percentage points.
    pub vol_band_points: f64,
    /// Banded mode calls the rate falling only when the delta is below this.
    pub rate_commit_threshold: f64,
    /// Strict falling threshold; only used to report the rate band.
    pub rate_dead_zone: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            vol_low: 14.0,
            vol_high: 24.0,
            price_band_pct: 0.02,
            vol_band_points: 1.0,
            rate_commit_threshold: -0.001,
            rate_dead_zone: -0.0001,
        }
    }
}

/// Strict and banded results computed from the same snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub snapshot: MetricsSnapshot,
    pub strict: AllocationResult,
    pub banded: AllocationResult,
}

impl Evaluation {
    pub fn modes_disagree(&self) -> bool {
        self.strict.category != self.banded.category
    }
}

#[derive(Clone, Debug, Default)]
pub struct AllocationClassifier {
    cfg: ClassifierConfig,
}

impl AllocationClassifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.cfg
    }

    pub fn evaluate(&self, snapshot: MetricsSnapshot) -> Evaluation {
        let strict = self.strict(&snapshot);
        let banded = self.banded(&snapshot);
        Evaluation {
            snapshot,
            strict,
            banded,
        }
    }

    pub fn strict(&self, snapshot: &MetricsSnapshot) -> AllocationResult {
        let inputs = strict_inputs(snapshot, &self.cfg);
        result(inputs, None)
    }

    pub fn banded(&self, snapshot: &MetricsSnapshot) -> AllocationResult {
        let (inputs, bands) = banded_inputs(snapshot, &self.cfg);
        result(inputs, Some(bands))
    }
}

/// The decision tree. Total over all 16 input combinations.
pub fn classify(inputs: DecisionInputs) -> AllocationCategory {
    if inputs.above_average {
        if inputs.vol_below_14 {
            AllocationCategory::RiskOn
        } else if inputs.vol_below_24 {
            AllocationCategory::RiskMid
        } else if inputs.rate_falling {
            AllocationCategory::RiskAlt
        } else {
            AllocationCategory::RiskOff
        }
    } else if inputs.rate_falling {
        AllocationCategory::RiskAlt
    } else {
        AllocationCategory::RiskOff
    }
}

pub fn strict_inputs(snapshot: &MetricsSnapshot, cfg: &ClassifierConfig) -> DecisionInputs {
    let vol = snapshot.annualized_volatility_pct;
    DecisionInputs {
        above_average: snapshot.reference_price > snapshot.long_average,
        vol_below_14: vol < cfg.vol_low,
        vol_below_24: vol < cfg.vol_high,
        rate_falling: snapshot.rate_falling,
    }
}

pub fn banded_inputs(
    snapshot: &MetricsSnapshot,
    cfg: &ClassifierConfig,
) -> (DecisionInputs, BandInfo) {
    let strict = strict_inputs(snapshot, cfg);
    let vol = snapshot.annualized_volatility_pct;

    let price_half = snapshot.long_average * cfg.price_band_pct;
    let price = band(
        snapshot.reference_price,
        snapshot.long_average - price_half,
        snapshot.long_average + price_half,
    );
    let vol_14 = band(vol, cfg.vol_low - cfg.vol_band_points, cfg.vol_low + cfg.vol_band_points);
    let vol_24 = band(vol, cfg.vol_high - cfg.vol_band_points, cfg.vol_high + cfg.vol_band_points);

    let delta = snapshot.short_rate_delta;
    let rate_falling = delta < cfg.rate_commit_threshold;
    let rate = BandCheck {
        value: delta,
        lower: cfg.rate_commit_threshold,
        upper: cfg.rate_dead_zone,
        inside: snapshot.rate_falling && !rate_falling,
    };

    let inputs = DecisionInputs {
        above_average: resolve_above(&price, strict.above_average),
        vol_below_14: resolve_below(&vol_14, strict.vol_below_14),
        vol_below_24: resolve_below(&vol_24, strict.vol_below_24),
        rate_falling,
    };
    let info = BandInfo {
        price,
        vol_14,
        vol_24,
        rate,
    };
    (inputs, info)
}

fn result(inputs: DecisionInputs, band_info: Option<BandInfo>) -> AllocationResult {
    let category = classify(inputs);
    AllocationResult {
        category,
        allocation_description: category.description().to_string(),
        inputs,
        band_info,
    }
}

fn band(value: f64, lower: f64, upper: f64) -> BandCheck {
    BandCheck {
        value,
        lower,
        upper,
        inside: value >= lower && value <= upper,
    }
}

/// "value is above the threshold", committed only outside the band.
fn resolve_above(check: &BandCheck, strict: bool) -> bool {
    if check.value > check.upper {
        true
    } else if check.value < check.lower {
        false
    } else {
        strict
    }
}

/// "value is below the threshold", committed only outside the band.
fn resolve_below(check: &BandCheck, strict: bool) -> bool {
    if check.value < check.lower {
        true
    } else if check.value > check.upper {
        false
    } else {
        strict
    }
}
