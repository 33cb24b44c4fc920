//! Access to the Kubernetes API
//!
//! The scrapers only need four read calls: nodes, the API group catalog,
//! the resources of one group/version, and schema-less objects of one
//! resource. [`ClusterClient`] is the seam between them and the API server.

#[cfg(test)]
pub(crate) mod fake;

use crate::error::ScrapeError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroupList, APIResourceList};
use http::header::{HeaderValue, USER_AGENT};
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::client::ClientBuilder;
use tower_http::set_header::SetRequestHeaderLayer;
use tracing::info;

/// `metrics-server-exporter/<version> (<os>/<arch>)`
pub fn user_agent() -> String {
    format!(
        "metrics-server-exporter/{} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Read access to the cluster control plane
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every node with its status
    async fn list_nodes(&self) -> Result<Vec<Node>, ScrapeError>;

    /// List the API groups served, with their preferred versions
    async fn server_groups(&self) -> Result<APIGroupList, ScrapeError>;

    /// List the resources served under `group_version` (e.g. `metrics.k8s.io/v1beta1`)
    async fn server_resources(&self, group_version: &str) -> Result<APIResourceList, ScrapeError>;

    /// List instances of `resource` as schema-less objects, in one namespace
    /// or across all of them
    async fn list_objects(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ScrapeError>;
}

/// [`ClusterClient`] backed by a live API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect with the pod's service account, or with the local kubeconfig
    /// (`KUBECONFIG` or `~/.kube/config`) when running outside the cluster
    pub async fn connect(in_cluster: bool) -> Result<Self> {
        let config = if in_cluster {
            kube::Config::incluster().context("Failed to load in-cluster configuration")?
        } else {
            kube::Config::infer()
                .await
                .context("Failed to load kubeconfig")?
        };

        info!(cluster_url = %config.cluster_url, in_cluster, "Connecting to Kubernetes API");

        let user_agent =
            HeaderValue::try_from(user_agent()).context("Invalid User-Agent header")?;
        let client = ClientBuilder::try_from(config)
            .context("Failed to create Kubernetes client")?
            .with_layer(&SetRequestHeaderLayer::overriding(USER_AGENT, user_agent))
            .build();
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, ScrapeError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|source| ScrapeError::Connectivity {
                operation: "list nodes",
                source,
            })?;
        Ok(list.items)
    }

    async fn server_groups(&self) -> Result<APIGroupList, ScrapeError> {
        self.client
            .list_api_groups()
            .await
            .map_err(|source| ScrapeError::Connectivity {
                operation: "list API groups",
                source,
            })
    }

    async fn server_resources(&self, group_version: &str) -> Result<APIResourceList, ScrapeError> {
        self.client
            .list_api_group_resources(group_version)
            .await
            .map_err(|source| ScrapeError::Connectivity {
                operation: "list API resources",
                source,
            })
    }

    async fn list_objects(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ScrapeError> {
        let api: Api<DynamicObject> = match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        };

        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|source| ScrapeError::Connectivity {
                operation: "list usage objects",
                source,
            })?;
        Ok(list.items)
    }
}
