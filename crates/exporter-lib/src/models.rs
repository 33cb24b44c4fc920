//! Core data models for the exporter

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute resource tracked by the exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    /// Every tracked resource, in emission order
    pub const ALL: [Resource; 2] = [Resource::Cpu, Resource::Memory];

    /// Label value, also the key used in resource lists
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two independent scrape cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeKind {
    Capacity,
    Usage,
}

impl ScrapeKind {
    /// Both cycles, in the order they run at startup
    pub const ALL: [ScrapeKind; 2] = [ScrapeKind::Capacity, ScrapeKind::Usage];

    /// Label value on self-observability metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeKind::Capacity => "capacity",
            ScrapeKind::Usage => "usage",
        }
    }
}

impl fmt::Display for ScrapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocatable capacity of one node for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacitySample {
    pub node: String,
    pub resource: Resource,
    pub value: f64,
}

/// Live usage of one node for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUsageSample {
    pub node: String,
    pub resource: Resource,
    pub value: f64,
}

/// Live usage of one pod for one resource, summed over its containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodUsageSample {
    pub namespace: String,
    pub pod: String,
    pub resource: Resource,
    pub value: f64,
}

/// Resource kind served by the usage metrics API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredResourceKind {
    /// Plural name used in the request path, e.g. `pods`
    pub plural: String,
    pub kind: String,
    pub namespaced: bool,
}

/// Outcome of a usage scrape cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsageScrapeSummary {
    pub node_samples: usize,
    pub pod_samples: usize,
    pub skipped: usize,
}
