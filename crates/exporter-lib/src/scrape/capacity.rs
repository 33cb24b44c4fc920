//! Node capacity scraping

use super::{with_deadline, Scraper};
use crate::error::{DecodeError, ScrapeError};
use crate::models::{NodeCapacitySample, Resource};
use crate::quantity::resource_value;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Allocatable CPU and memory of a node
pub fn capacity_samples(node: &Node) -> Result<Vec<NodeCapacitySample>, DecodeError> {
    let name = node.metadata.name.as_deref().ok_or(DecodeError::MissingName)?;

    let empty = BTreeMap::new();
    let allocatable = node
        .status
        .as_ref()
        .and_then(|status| status.allocatable.as_ref())
        .unwrap_or(&empty);

    Resource::ALL
        .iter()
        .map(|&resource| {
            let value = resource_value(allocatable, resource).map_err(|source| {
                DecodeError::Quantity {
                    field: format!("status.allocatable.{resource}"),
                    source,
                }
            })?;

            Ok(NodeCapacitySample {
                node: name.to_string(),
                resource,
                value,
            })
        })
        .collect()
}

impl Scraper {
    /// List all nodes and publish their allocatable capacity
    ///
    /// Returns the number of nodes published.
    pub async fn scrape_node_capacity(&self, timeout: Duration) -> Result<usize, ScrapeError> {
        with_deadline("scrape node capacity", timeout, self.read_node_capacity()).await
    }

    async fn read_node_capacity(&self) -> Result<usize, ScrapeError> {
        let nodes = self.client.list_nodes().await?;
        debug!(count = nodes.len(), "Listed nodes");

        let mut published = 0;
        for node in &nodes {
            match capacity_samples(node) {
                Ok(samples) => {
                    for sample in &samples {
                        self.metrics
                            .set_node_capacity(&sample.node, sample.resource, sample.value);
                    }
                    published += 1;
                }
                Err(e) => {
                    self.metrics.inc_skipped_objects("nodes");
                    self.logger.log_object_skipped(
                        "nodes",
                        node.metadata.name.as_deref().unwrap_or("<unnamed>"),
                        &e,
                    );
                }
            }
        }

        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::observability::{ExporterMetrics, StructuredLogger};
    use k8s_openapi::api::core::v1::NodeStatus;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn scraper(cluster: FakeCluster) -> (Scraper, Arc<FakeCluster>) {
        let cluster = Arc::new(cluster);
        let scraper = Scraper::new(
            cluster.clone(),
            ExporterMetrics::new().unwrap(),
            StructuredLogger::new("test"),
        );
        (scraper, cluster)
    }

    #[tokio::test]
    async fn test_capacity_is_published_in_milli_and_kilo_units() {
        let (scraper, _) = scraper(FakeCluster::new().with_node("worker-1", "2", "4Gi"));

        let published = assert_ok!(scraper.scrape_node_capacity(TIMEOUT).await);

        assert_eq!(published, 1);
        let metrics = scraper.metrics();
        assert_eq!(metrics.node_capacity("worker-1", Resource::Cpu), Some(2000.0));
        assert_eq!(
            metrics.node_capacity("worker-1", Resource::Memory),
            Some(4_294_968.0)
        );
    }

    #[tokio::test]
    async fn test_capacity_scrape_is_idempotent() {
        let (scraper, _) = scraper(
            FakeCluster::new()
                .with_node("worker-1", "3500m", "7901768Ki")
                .with_node("worker-2", "8", "32Gi"),
        );

        assert_ok!(scraper.scrape_node_capacity(TIMEOUT).await);
        assert_ok!(scraper.scrape_node_capacity(TIMEOUT).await);

        let metrics = scraper.metrics();
        assert_eq!(metrics.node_capacity("worker-1", Resource::Cpu), Some(3500.0));
        assert_eq!(
            metrics.node_capacity("worker-1", Resource::Memory),
            Some(8_091_411.0)
        );
        assert_eq!(metrics.node_capacity("worker-2", Resource::Cpu), Some(8000.0));
        assert_eq!(
            metrics.series_count("metrics_server_exporter_node_resource_capacity"),
            4
        );
    }

    #[tokio::test]
    async fn test_failed_node_list_publishes_nothing() {
        let (scraper, cluster) = scraper(FakeCluster::new().with_node("worker-1", "2", "4Gi"));
        cluster.set_node_list_failing(true);

        let err = assert_err!(scraper.scrape_node_capacity(TIMEOUT).await);

        assert!(matches!(err, ScrapeError::Connectivity { .. }));
        assert_eq!(
            scraper
                .metrics()
                .series_count("metrics_server_exporter_node_resource_capacity"),
            0
        );
    }

    #[tokio::test]
    async fn test_node_with_malformed_quantity_is_skipped() {
        let broken = Node {
            metadata: ObjectMeta {
                name: Some("worker-broken".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity("lots".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (scraper, _) = scraper(
            FakeCluster::new()
                .with_raw_node(broken)
                .with_node("worker-1", "2", "4Gi"),
        );

        let published = assert_ok!(scraper.scrape_node_capacity(TIMEOUT).await);

        assert_eq!(published, 1);
        assert_eq!(
            scraper.metrics().node_capacity("worker-broken", Resource::Cpu),
            None
        );
    }

    #[test]
    fn test_node_without_status_reads_zero() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-new".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let samples = capacity_samples(&node).unwrap();

        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|sample| sample.value == 0.0));
    }

    #[test]
    fn test_node_without_name_is_rejected() {
        assert!(matches!(
            capacity_samples(&Node::default()),
            Err(DecodeError::MissingName)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_node_list_exceeds_deadline() {
        let (scraper, cluster) = scraper(FakeCluster::new().with_node("worker-1", "2", "4Gi"));
        cluster.set_call_delay(Some(Duration::from_secs(30)));

        let err = assert_err!(scraper.scrape_node_capacity(TIMEOUT).await);

        assert!(matches!(err, ScrapeError::DeadlineExceeded { .. }));
        assert_eq!(scraper.metrics().node_capacity("worker-1", Resource::Cpu), None);
    }
}
