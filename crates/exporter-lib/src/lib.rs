//! Library for republishing Kubernetes node and pod resources as Prometheus gauges
//!
//! This crate provides the core functionality for:
//! - Scraping allocatable node capacity from node status
//! - Discovering the metrics API and scraping live node/pod usage
//! - Scheduling both scrapes on independent intervals
//! - Health checks and observability

pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod scheduler;
pub mod scrape;

pub use cluster::{ClusterClient, KubeClusterClient};
pub use error::{ConfigError, DecodeError, ScrapeError, StartupError};
pub use health::{HealthRegistry, HealthResponse, ReadinessResponse, ScraperHealth, ScraperStatus};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerHandle, SchedulerState};
pub use scrape::Scraper;
