//! MFEA allocation watcher.
//!
//! Evaluates a market-timing rule over an equity index and a short-term rate
//! series, and tells subscribers when the recommended allocation changes.
//! The decision has two flavours: a strict threshold tree and a banded
//! variant that only commits a threshold crossing once the value clears a
//! tolerance band, which keeps borderline days from flapping.
//!
//! One invocation is a single pass of [`detector::ChangeDetector`]; all
//! memory between invocations lives in the tiers of a [`store::StateStore`].

pub mod config;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod provider;
pub mod store;
pub mod strategy;
pub mod types;

pub use crate::detector::{ChangeDetector, CheckOutcome, DetectorSettings};
pub use crate::error::{MfeaError, ProviderError};
pub use crate::metrics::{MetricsCalculator, MetricsConfig};
pub use crate::strategy::{AllocationClassifier, ClassifierConfig, Evaluation};
