//! Usage scraping through the metrics API
//!
//! The metrics API is an aggregated API whose version is not known ahead
//! of time. Every cycle first resolves the preferred version of
//! [`METRICS_GROUP_NAME`], enumerates the resources it serves, then lists
//! each one as schema-less objects and decodes them:
//! - cluster-scoped objects carry `usage` for a node
//! - namespaced objects carry `containers[].usage` for a pod

use super::{with_deadline, Scraper};
use crate::error::{DecodeError, ScrapeError};
use crate::models::{
    DiscoveredResourceKind, NodeUsageSample, PodUsageSample, Resource, UsageScrapeSummary,
};
use crate::quantity::resource_value;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroupList, APIResourceList};
use kube::api::{ApiResource, DynamicObject};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// API group serving live node and pod usage
pub const METRICS_GROUP_NAME: &str = "metrics.k8s.io";

/// Parsed `group/version` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupVersion {
    /// Empty for the core group
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Address of a discovered resource kind within this group/version
    pub fn api_resource(&self, kind: &DiscoveredResourceKind) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: kind.kind.clone(),
            plural: kind.plural.clone(),
        }
    }
}

impl FromStr for GroupVersion {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ScrapeError::Discovery(format!("malformed group version {s:?}"));

        let (group, version) = match s.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", s),
        };
        if version.is_empty() || version.contains('/') {
            return Err(malformed());
        }

        Ok(Self {
            group: group.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// Preferred version of the group called `name`
///
/// Falls back to the first advertised version when the server designates
/// no preferred one.
pub fn preferred_group_version(
    groups: &APIGroupList,
    name: &str,
) -> Result<GroupVersion, ScrapeError> {
    let group = groups
        .groups
        .iter()
        .find(|group| group.name == name)
        .ok_or_else(|| ScrapeError::Discovery(format!("API group {name} is not served")))?;

    let version = group
        .preferred_version
        .as_ref()
        .or_else(|| group.versions.first())
        .ok_or_else(|| ScrapeError::Discovery(format!("API group {name} advertises no versions")))?;

    version.group_version.parse()
}

/// Listable top-level resources of a group/version
pub fn resource_kinds(resources: &APIResourceList) -> Vec<DiscoveredResourceKind> {
    resources
        .resources
        .iter()
        // subresources such as `pods/status`
        .filter(|resource| !resource.name.contains('/'))
        .filter(|resource| resource.verbs.is_empty() || resource.verbs.iter().any(|v| v == "list"))
        .map(|resource| DiscoveredResourceKind {
            plural: resource.name.clone(),
            kind: resource.kind.clone(),
            namespaced: resource.namespaced,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct NodeMetricsShape {
    usage: BTreeMap<String, Quantity>,
}

#[derive(Debug, Deserialize)]
struct PodMetricsShape {
    containers: Vec<ContainerMetricsShape>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetricsShape {
    name: String,
    usage: BTreeMap<String, Quantity>,
}

/// Usage record decoded from one metrics API object
#[derive(Debug, Clone, PartialEq)]
pub enum UsageRecord {
    Node(Vec<NodeUsageSample>),
    Pod(Vec<PodUsageSample>),
}

impl UsageRecord {
    /// Interpret a schema-less object as node usage or, for namespaced
    /// resources, as pod usage
    ///
    /// Pod usage is the sum over the pod's containers. A pod reporting no
    /// containers yields no samples.
    pub fn decode(object: &DynamicObject, namespaced: bool) -> Result<Self, DecodeError> {
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or(DecodeError::MissingName)?;

        if !namespaced {
            let shape = NodeMetricsShape::deserialize(&object.data)?;
            let samples = Resource::ALL
                .iter()
                .map(|&resource| {
                    let value = resource_value(&shape.usage, resource).map_err(|source| {
                        DecodeError::Quantity {
                            field: format!("usage.{resource}"),
                            source,
                        }
                    })?;
                    Ok(NodeUsageSample {
                        node: name.to_string(),
                        resource,
                        value,
                    })
                })
                .collect::<Result<_, DecodeError>>()?;
            return Ok(UsageRecord::Node(samples));
        }

        let namespace = object
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| DecodeError::MissingNamespace(name.to_string()))?;
        let shape = PodMetricsShape::deserialize(&object.data)?;
        if shape.containers.is_empty() {
            return Ok(UsageRecord::Pod(Vec::new()));
        }

        let mut samples = Vec::with_capacity(Resource::ALL.len());
        for resource in Resource::ALL {
            let mut total = 0.0;
            for container in &shape.containers {
                total += resource_value(&container.usage, resource).map_err(|source| {
                    DecodeError::Quantity {
                        field: format!("containers[{}].usage.{resource}", container.name),
                        source,
                    }
                })?;
            }
            samples.push(PodUsageSample {
                namespace: namespace.to_string(),
                pod: name.to_string(),
                resource,
                value: total,
            });
        }

        Ok(UsageRecord::Pod(samples))
    }
}

fn object_ref(object: &DynamicObject) -> String {
    match (&object.metadata.namespace, &object.metadata.name) {
        (Some(namespace), Some(name)) => format!("{namespace}/{name}"),
        (None, Some(name)) => name.clone(),
        _ => "<unnamed>".to_string(),
    }
}

impl Scraper {
    /// Discover the metrics API, then publish node and pod usage
    pub async fn scrape_usage(&self, timeout: Duration) -> Result<UsageScrapeSummary, ScrapeError> {
        with_deadline("scrape usage metrics", timeout, self.read_usage()).await
    }

    /// Resolve the metrics API group/version and the resource kinds it serves
    pub async fn discover(
        &self,
    ) -> Result<(GroupVersion, Vec<DiscoveredResourceKind>), ScrapeError> {
        let groups = self.client.server_groups().await?;
        let group_version = preferred_group_version(&groups, METRICS_GROUP_NAME)?;

        let resources = self
            .client
            .server_resources(&group_version.api_version())
            .await?;
        let kinds = resource_kinds(&resources);
        debug!(
            group_version = %group_version,
            kinds = kinds.len(),
            "Discovered usage metrics API"
        );

        Ok((group_version, kinds))
    }

    async fn read_usage(&self) -> Result<UsageScrapeSummary, ScrapeError> {
        let (group_version, kinds) = self.discover().await?;
        let mut summary = UsageScrapeSummary::default();

        for kind in &kinds {
            let objects = self
                .client
                .list_objects(&group_version.api_resource(kind), None)
                .await?;
            debug!(resource = %kind.plural, count = objects.len(), "Listed usage objects");

            for object in &objects {
                if kind.namespaced {
                    if let Some(namespace) = object.metadata.namespace.as_deref() {
                        if self.is_excluded(namespace) {
                            continue;
                        }
                    }
                }

                match UsageRecord::decode(object, kind.namespaced) {
                    Ok(UsageRecord::Node(samples)) => {
                        for sample in &samples {
                            self.metrics
                                .set_node_usage(&sample.node, sample.resource, sample.value);
                        }
                        summary.node_samples += samples.len();
                    }
                    Ok(UsageRecord::Pod(samples)) => {
                        for sample in &samples {
                            self.metrics.set_pod_usage(
                                &sample.namespace,
                                &sample.pod,
                                sample.resource,
                                sample.value,
                            );
                        }
                        summary.pod_samples += samples.len();
                    }
                    Err(e) => {
                        summary.skipped += 1;
                        self.metrics.inc_skipped_objects(&kind.plural);
                        self.logger
                            .log_object_skipped(&kind.plural, &object_ref(object), &e);
                    }
                }
            }
        }

        Ok(summary)
    }
}
