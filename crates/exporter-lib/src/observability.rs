//! Observability infrastructure for the exporter
//!
//! Provides:
//! - The Prometheus registry holding the republished node/pod gauges
//! - Self metrics (scrape latency, scrape errors, skipped objects)
//! - Structured JSON logging with tracing

use crate::models::{Resource, ScrapeKind, UsageScrapeSummary};
use prometheus::core::Collector;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use tracing::{error, info, warn};

/// Prefix of every exported metric name
const METRICS_NAMESPACE: &str = "metrics_server_exporter";

/// Histogram buckets for scrape latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Exporter metrics for Prometheus exposition
///
/// Handles are cheap to clone; clones share the same underlying gauges.
/// Setting a label tuple overwrites its previous value and series are never
/// removed, so nodes and pods that disappear keep their last value until
/// the process restarts.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    node_resource_usage: GaugeVec,
    node_resource_capacity: GaugeVec,
    pod_resource_usage: GaugeVec,
    scrape_duration_seconds: HistogramVec,
    scrape_errors: IntCounterVec,
    skipped_objects: IntCounterVec,
}

fn register<C>(registry: &Registry, collector: C) -> prometheus::Result<C>
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl ExporterMetrics {
    /// Create the metrics in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let node_resource_usage = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "resource_usage",
                    "Current resource usage of a node (cpu in millicores, memory in kilobytes)",
                )
                .namespace(METRICS_NAMESPACE)
                .subsystem("node"),
                &["node", "resource"],
            )?,
        )?;

        let node_resource_capacity = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "resource_capacity",
                    "Allocatable resources of a node (cpu in millicores, memory in kilobytes)",
                )
                .namespace(METRICS_NAMESPACE)
                .subsystem("node"),
                &["node", "resource"],
            )?,
        )?;

        let pod_resource_usage = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "resource_usage",
                    "Current resource usage of a pod summed over its containers (cpu in millicores, memory in kilobytes)",
                )
                .namespace(METRICS_NAMESPACE)
                .subsystem("pod"),
                &["namespace", "pod", "resource"],
            )?,
        )?;

        let scrape_duration_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "scrape_duration_seconds",
                    "Time spent in a scrape call against the cluster API",
                )
                .namespace(METRICS_NAMESPACE)
                .buckets(LATENCY_BUCKETS.to_vec()),
                &["scraper"],
            )?,
        )?;

        let scrape_errors = register(
            &registry,
            IntCounterVec::new(
                Opts::new("scrape_errors_total", "Total number of failed scrape calls")
                    .namespace(METRICS_NAMESPACE),
                &["scraper"],
            )?,
        )?;

        let skipped_objects = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "skipped_objects_total",
                    "Total number of API objects skipped because they could not be decoded",
                )
                .namespace(METRICS_NAMESPACE),
                &["resource"],
            )?,
        )?;

        Ok(Self {
            registry,
            node_resource_usage,
            node_resource_capacity,
            pod_resource_usage,
            scrape_duration_seconds,
            scrape_errors,
            skipped_objects,
        })
    }

    /// Set the usage gauge for a node and compute resource
    pub fn set_node_usage(&self, node: &str, resource: Resource, value: f64) {
        self.node_resource_usage
            .with_label_values(&[node, resource.as_str()])
            .set(value);
    }

    /// Set the allocatable capacity gauge for a node and compute resource
    pub fn set_node_capacity(&self, node: &str, resource: Resource, value: f64) {
        self.node_resource_capacity
            .with_label_values(&[node, resource.as_str()])
            .set(value);
    }

    /// Set the usage gauge for a namespace/pod combination
    pub fn set_pod_usage(&self, namespace: &str, pod: &str, resource: Resource, value: f64) {
        self.pod_resource_usage
            .with_label_values(&[namespace, pod, resource.as_str()])
            .set(value);
    }

    pub fn observe_scrape_duration(&self, kind: ScrapeKind, elapsed: Duration) {
        self.scrape_duration_seconds
            .with_label_values(&[kind.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_scrape_errors(&self, kind: ScrapeKind) {
        self.scrape_errors.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn inc_skipped_objects(&self, resource: &str) {
        self.skipped_objects.with_label_values(&[resource]).inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    #[cfg(test)]
    pub(crate) fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                let pairs = metric.get_label();
                pairs.len() == labels.len()
                    && labels.iter().all(|(name, value)| {
                        pairs
                            .iter()
                            .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                    })
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    #[cfg(test)]
    pub(crate) fn node_capacity(&self, node: &str, resource: Resource) -> Option<f64> {
        self.gauge_value(
            "metrics_server_exporter_node_resource_capacity",
            &[("node", node), ("resource", resource.as_str())],
        )
    }

    #[cfg(test)]
    pub(crate) fn node_usage(&self, node: &str, resource: Resource) -> Option<f64> {
        self.gauge_value(
            "metrics_server_exporter_node_resource_usage",
            &[("node", node), ("resource", resource.as_str())],
        )
    }

    #[cfg(test)]
    pub(crate) fn pod_usage(&self, namespace: &str, pod: &str, resource: Resource) -> Option<f64> {
        self.gauge_value(
            "metrics_server_exporter_pod_resource_usage",
            &[
                ("namespace", namespace),
                ("pod", pod),
                ("resource", resource.as_str()),
            ],
        )
    }

    #[cfg(test)]
    pub(crate) fn series_count(&self, name: &str) -> usize {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .map(|family| family.get_metric().len())
            .sum()
    }

    #[cfg(test)]
    pub(crate) fn scrape_errors(&self, kind: ScrapeKind) -> u64 {
        self.scrape_errors.with_label_values(&[kind.as_str()]).get()
    }
}

/// Structured logger for exporter events
///
/// Provides consistent JSON-formatted logging for the scrape lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(
        &self,
        version: &str,
        capacity_interval: Duration,
        usage_interval: Duration,
        scrape_timeout: Duration,
    ) {
        info!(
            event = "exporter_started",
            instance = %self.instance,
            version = %version,
            capacity_interval_secs = capacity_interval.as_secs(),
            usage_interval_secs = usage_interval.as_secs(),
            scrape_timeout_secs = scrape_timeout.as_secs(),
            "Metrics server exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Metrics server exporter shutting down"
        );
    }

    /// Log a successful capacity scrape
    pub fn log_capacity_scraped(&self, nodes: usize, elapsed: Duration) {
        info!(
            event = "scrape_completed",
            instance = %self.instance,
            scraper = "capacity",
            nodes = nodes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Node capacity scraped"
        );
    }

    /// Log a successful usage scrape
    pub fn log_usage_scraped(&self, summary: &UsageScrapeSummary, elapsed: Duration) {
        info!(
            event = "scrape_completed",
            instance = %self.instance,
            scraper = "usage",
            node_samples = summary.node_samples,
            pod_samples = summary.pod_samples,
            skipped = summary.skipped,
            elapsed_ms = elapsed.as_millis() as u64,
            "Usage metrics scraped"
        );
    }

    /// Log a failed scrape; failures during startup are fatal, later ones are not
    pub fn log_scrape_failed(&self, kind: ScrapeKind, error: &dyn std::error::Error, startup: bool) {
        if startup {
            error!(
                event = "scrape_failed",
                instance = %self.instance,
                scraper = %kind,
                startup = true,
                error = %error,
                "Initial scrape failed"
            );
        } else {
            warn!(
                event = "scrape_failed",
                instance = %self.instance,
                scraper = %kind,
                startup = false,
                error = %error,
                "Scrape failed, keeping previously published values"
            );
        }
    }

    /// Log an API object that could not be decoded
    pub fn log_object_skipped(&self, resource: &str, object: &str, error: &dyn std::error::Error) {
        warn!(
            event = "object_skipped",
            instance = %self.instance,
            resource = %resource,
            object = %object,
            error = %error,
            "Skipping object that could not be decoded"
        );
    }
}
