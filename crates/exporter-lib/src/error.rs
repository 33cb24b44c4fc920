//! Error types for scraping and startup

use crate::quantity::QuantityError;
use std::time::Duration;
use thiserror::Error;

/// Failure of a whole scrape call
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The cluster API could not be reached or rejected the request
    #[error("{operation}: {source}")]
    Connectivity {
        operation: &'static str,
        #[source]
        source: kube::Error,
    },

    /// The call did not complete within its deadline
    #[error("{operation}: deadline of {timeout:?} exceeded")]
    DeadlineExceeded {
        operation: &'static str,
        timeout: Duration,
    },

    /// The usage metrics API is missing or advertised a malformed version
    #[error("discovery: {0}")]
    Discovery(String),
}

impl ScrapeError {
    pub fn is_discovery(&self) -> bool {
        matches!(self, ScrapeError::Discovery(_))
    }
}

/// Failure to convert a single schema-less object into a usage record
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("object has no name")]
    MissingName,

    #[error("object {0} has no namespace")]
    MissingNamespace(String),

    #[error("unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("{field}: {source}")]
    Quantity {
        field: String,
        #[source]
        source: QuantityError,
    },
}

/// Invalid construction-time configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{name} must not exceed {max:?}")]
    DurationTooLong {
        name: &'static str,
        max: Duration,
    },

    #[error("excluded namespace names must not be blank")]
    BlankNamespace,
}

/// Failure to bring the scheduler into its running state
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("reading node capacity: {0}")]
    Capacity(#[source] ScrapeError),

    #[error("reading usage metrics: {0}")]
    Usage(#[source] ScrapeError),
}
