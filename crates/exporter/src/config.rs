//! Exporter configuration

use anyhow::{Context, Result};
use exporter_lib::SchedulerConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Name of this exporter instance in logs, from the downward API
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for readiness/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Use the pod's service account instead of a kubeconfig
    #[serde(default = "default_in_cluster")]
    pub in_cluster: bool,

    /// Node capacity scrape interval in seconds
    #[serde(default = "default_capacity_interval")]
    pub capacity_interval_secs: u64,

    /// Usage scrape interval in seconds
    #[serde(default = "default_usage_interval")]
    pub usage_interval_secs: u64,

    /// Deadline for a single scrape call in seconds
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// Namespaces whose pod usage is not exported
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
}

fn default_instance() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "metrics-server-exporter".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_in_cluster() -> bool {
    true
}

fn default_capacity_interval() -> u64 {
    3600
}

fn default_usage_interval() -> u64 {
    30
}

fn default_scrape_timeout() -> u64 {
    10
}

impl ExporterConfig {
    /// Load configuration from an optional file (`EXPORTER_CONFIG_FILE`)
    /// overlaid with `EXPORTER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_sources(std::env::var("EXPORTER_CONFIG_FILE").ok().as_deref(), None)
    }

    fn from_sources(file: Option<&str>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("EXPORTER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("excluded_namespaces")
                    .source(env),
            )
            .build()
            .context("Failed to load configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            capacity_interval: Duration::from_secs(self.capacity_interval_secs),
            usage_interval: Duration::from_secs(self.usage_interval_secs),
            scrape_timeout: Duration::from_secs(self.scrape_timeout_secs),
            excluded_namespaces: self.excluded_namespaces.clone(),
        }
    }
}
