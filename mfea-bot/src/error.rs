use std::time::Duration;

use thiserror::Error;

use crate::types::SeriesKind;

/// Errors that abort an invocation before any state is touched.
#[derive(Debug, Error)]
pub enum MfeaError {
    #[error("insufficient {series} data: need {required} valid points, have {available}")]
    InsufficientData {
        series: SeriesKind,
        required: usize,
        available: usize,
    },
    #[error("upstream {series} series unavailable: {source}")]
    UpstreamUnavailable {
        series: SeriesKind,
        #[source]
        source: ProviderError,
    },
}

impl MfeaError {
    pub fn insufficient(series: SeriesKind, required: usize, available: usize) -> Self {
        Self::InsufficientData {
            series,
            required,
            available,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed series payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Unavailable(String),
}
