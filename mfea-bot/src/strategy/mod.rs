//! Allocation Classifier.
//!
//! Pure functions only: snapshot in, allocation out. Nothing here can fail;
//! malformed numbers are filtered by the metrics layer before they get here.

pub mod classifier;

pub use classifier::{AllocationClassifier, ClassifierConfig, Evaluation};
