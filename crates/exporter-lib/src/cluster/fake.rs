//! In-memory cluster for scraper and scheduler tests

use super::ClusterClient;
use crate::error::ScrapeError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, APIResource, APIResourceList, GroupVersionForDiscovery, ObjectMeta,
};
use kube::api::{ApiResource, DynamicObject};
use kube::core::{ErrorResponse, TypeMeta};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) const METRICS_GROUP_VERSION: &str = "metrics.k8s.io/v1beta1";

#[derive(Default)]
struct FakeState {
    nodes: Vec<Node>,
    groups: Vec<APIGroup>,
    resources: HashMap<String, Vec<APIResource>>,
    objects: HashMap<String, Vec<DynamicObject>>,
    fail_node_list: bool,
    failing_lists: HashSet<String>,
    call_delay: Option<Duration>,
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<FakeState>,
    node_list_calls: AtomicUsize,
    discovery_calls: AtomicUsize,
    object_list_calls: AtomicUsize,
}

pub(crate) fn api_error(message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    })
}

fn resource_list(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn api_resource(plural: &str, kind: &str, namespaced: bool) -> APIResource {
    APIResource {
        name: plural.to_string(),
        kind: kind.to_string(),
        namespaced,
        verbs: vec!["get".to_string(), "list".to_string()],
        ..Default::default()
    }
}

/// Schema-less object as returned by the metrics API
pub(crate) fn metrics_object(
    kind: &str,
    name: Option<&str>,
    namespace: Option<&str>,
    data: Value,
) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: METRICS_GROUP_VERSION.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: name.map(str::to_string),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        },
        data,
    }
}

pub(crate) fn node_metrics(name: &str, cpu: &str, memory: &str) -> DynamicObject {
    metrics_object(
        "NodeMetrics",
        Some(name),
        None,
        json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "30s",
            "usage": { "cpu": cpu, "memory": memory },
        }),
    )
}

pub(crate) fn pod_metrics(
    namespace: &str,
    name: &str,
    containers: &[(&str, &str, &str)],
) -> DynamicObject {
    let containers: Vec<Value> = containers
        .iter()
        .map(|(container, cpu, memory)| {
            json!({ "name": container, "usage": { "cpu": cpu, "memory": memory } })
        })
        .collect();

    metrics_object(
        "PodMetrics",
        Some(name),
        Some(namespace),
        json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "30s",
            "containers": containers,
        }),
    )
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_node(self, name: &str, cpu: &str, memory: &str) -> Self {
        self.state().nodes.push(Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(resource_list(cpu, memory)),
                ..Default::default()
            }),
            ..Default::default()
        });
        self
    }

    pub(crate) fn with_raw_node(self, node: Node) -> Self {
        self.state().nodes.push(node);
        self
    }

    /// Serve `metrics.k8s.io` with its cluster-scoped `nodes` and namespaced `pods`
    pub(crate) fn with_metrics_api(self) -> Self {
        let version = GroupVersionForDiscovery {
            group_version: METRICS_GROUP_VERSION.to_string(),
            version: "v1beta1".to_string(),
        };
        {
            let mut state = self.state();
            state.groups.push(APIGroup {
                name: "metrics.k8s.io".to_string(),
                preferred_version: Some(version.clone()),
                versions: vec![version],
                ..Default::default()
            });
            state.resources.insert(
                METRICS_GROUP_VERSION.to_string(),
                vec![
                    api_resource("nodes", "NodeMetrics", false),
                    api_resource("pods", "PodMetrics", true),
                ],
            );
        }
        self
    }

    pub(crate) fn with_group(self, group: APIGroup, resources: Vec<APIResource>) -> Self {
        {
            let mut state = self.state();
            if let Some(version) = &group.preferred_version {
                state
                    .resources
                    .insert(version.group_version.clone(), resources);
            }
            state.groups.push(group);
        }
        self
    }

    pub(crate) fn with_object(self, plural: &str, object: DynamicObject) -> Self {
        self.push_object(plural, object);
        self
    }

    pub(crate) fn push_object(&self, plural: &str, object: DynamicObject) {
        self.state()
            .objects
            .entry(plural.to_string())
            .or_default()
            .push(object);
    }

    pub(crate) fn set_node_list_failing(&self, failing: bool) {
        self.state().fail_node_list = failing;
    }

    pub(crate) fn set_list_failing(&self, plural: &str) {
        self.state().failing_lists.insert(plural.to_string());
    }

    /// Delay every call, to exercise deadlines and cancellation
    pub(crate) fn set_call_delay(&self, delay: Option<Duration>) {
        self.state().call_delay = delay;
    }

    pub(crate) fn node_list_calls(&self) -> usize {
        self.node_list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn object_list_calls(&self) -> usize {
        self.object_list_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let delay = self.state().call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, ScrapeError> {
        self.node_list_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let state = self.state();
        if state.fail_node_list {
            return Err(ScrapeError::Connectivity {
                operation: "list nodes",
                source: api_error("connection refused"),
            });
        }
        Ok(state.nodes.clone())
    }

    async fn server_groups(&self) -> Result<APIGroupList, ScrapeError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        Ok(APIGroupList {
            groups: self.state().groups.clone(),
        })
    }

    async fn server_resources(&self, group_version: &str) -> Result<APIResourceList, ScrapeError> {
        let resources = self.state().resources.get(group_version).cloned();
        match resources {
            Some(resources) => Ok(APIResourceList {
                group_version: group_version.to_string(),
                resources,
            }),
            None => Err(ScrapeError::Connectivity {
                operation: "list API resources",
                source: api_error("the server could not find the requested resource"),
            }),
        }
    }

    async fn list_objects(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ScrapeError> {
        self.object_list_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let state = self.state();
        if state.failing_lists.contains(&resource.plural) {
            return Err(ScrapeError::Connectivity {
                operation: "list usage objects",
                source: api_error("etcdserver: request timed out"),
            });
        }

        Ok(state
            .objects
            .get(&resource.plural)
            .into_iter()
            .flatten()
            .filter(|object| {
                namespace.is_none() || object.metadata.namespace.as_deref() == namespace
            })
            .cloned()
            .collect())
    }
}
