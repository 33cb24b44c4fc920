//! Scraping of node capacity and live usage
//!
//! Two independent scrapes write into [`ExporterMetrics`]:
//! - capacity: allocatable resources from the status of every node
//! - usage: live usage from the metrics API, discovered at runtime
//!
//! Each public scrape call is bounded by a deadline. A failed list call
//! fails the whole call; an object that cannot be decoded is logged and
//! skipped.

mod capacity;
mod usage;

pub use capacity::capacity_samples;
pub use usage::{
    preferred_group_version, resource_kinds, GroupVersion, UsageRecord, METRICS_GROUP_NAME,
};

use crate::cluster::ClusterClient;
use crate::error::ScrapeError;
use crate::observability::{ExporterMetrics, StructuredLogger};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Reads the cluster API and publishes what it finds
#[derive(Clone)]
pub struct Scraper {
    client: Arc<dyn ClusterClient>,
    metrics: ExporterMetrics,
    logger: StructuredLogger,
    excluded_namespaces: Arc<HashSet<String>>,
}

impl Scraper {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        metrics: ExporterMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            client,
            metrics,
            logger,
            excluded_namespaces: Arc::new(HashSet::new()),
        }
    }

    /// Skip pod usage from these namespaces
    pub fn exclude_namespaces(mut self, namespaces: impl IntoIterator<Item = String>) -> Self {
        self.excluded_namespaces = Arc::new(namespaces.into_iter().collect());
        self
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    fn is_excluded(&self, namespace: &str) -> bool {
        self.excluded_namespaces.contains(namespace)
    }
}

/// Run `future`, failing with `DeadlineExceeded` once `timeout` elapses
async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| ScrapeError::DeadlineExceeded { operation, timeout })?
}
