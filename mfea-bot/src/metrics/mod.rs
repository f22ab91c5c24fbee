//! Metrics Calculator: raw aligned series in, one decision snapshot out.

pub mod calculator;
pub mod stats;

pub use calculator::{MetricsCalculator, MetricsConfig};
