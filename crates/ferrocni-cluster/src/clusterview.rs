//! The cluster-facing view of Kubernetes `Node` objects: each peer's
//! `internalIP` and `podCIDR`, the two fields every dataplane strategy
//! needs to build its routes/neighs/fdbs.

use async_trait::async_trait;
use ferrocni_core::{Error, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub internal_ip: Ipv4Addr,
    pub pod_cidr: String,
}

#[async_trait]
pub trait ClusterView: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>>;
    async fn get_all_nodes(&self) -> Result<HashMap<String, NodeInfo>>;
}

pub struct KubeClusterView {
    client: Client,
}

impl KubeClusterView {
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Network(format!("create kube client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// A stream of node-info snapshots, one per `applied` watch event —
    /// the daemon's reconciliation scheduler reads this to notice
    /// peer/subnet churn between its own sleep-poll ticks.
    pub fn watch(&self) -> impl futures::Stream<Item = Result<NodeInfo>> + '_ {
        let nodes: Api<Node> = Api::all(self.client.clone());
        watcher(nodes, watcher::Config::default())
            .applied_objects()
            .map(|event| match event {
                Ok(node) => node_info(&node).ok_or_else(|| {
                    Error::Internal(format!(
                        "node {} has no usable internalIP/podCIDR yet",
                        node.name_any()
                    ))
                }),
                Err(e) => Err(Error::Network(format!("node watch error: {e}"))),
            })
    }
}

fn node_info(node: &Node) -> Option<NodeInfo> {
    let name = node.name_any();
    let pod_cidr = node.spec.as_ref()?.pod_cidr.clone()?;
    let internal_ip = node
        .status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .and_then(|a| Ipv4Addr::from_str(&a.address).ok())?;

    Some(NodeInfo {
        name,
        internal_ip,
        pod_cidr,
    })
}

#[async_trait]
impl ClusterView for KubeClusterView {
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        match nodes.get_opt(name).await {
            Ok(Some(node)) => Ok(node_info(&node)),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Network(format!("get node {name}: {e}"))),
        }
    }

    async fn get_all_nodes(&self) -> Result<HashMap<String, NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&Default::default())
            .await
            .map_err(|e| Error::Network(format!("list nodes: {e}")))?;

        Ok(list
            .items
            .iter()
            .filter_map(node_info)
            .map(|info| (info.name.clone(), info))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeSpec, NodeStatus};

    fn sample_node(name: &str, ip: &str, cidr: &str) -> Node {
        Node {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                pod_cidr: Some(cidr.to_string()),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: ip.to_string(),
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn node_info_extracts_internal_ip_and_pod_cidr() {
        let node = sample_node("node-a", "10.0.0.5", "10.244.1.0/24");
        let info = node_info(&node).unwrap();
        assert_eq!(info.name, "node-a");
        assert_eq!(info.internal_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(info.pod_cidr, "10.244.1.0/24");
    }

    #[test]
    fn node_info_is_none_without_pod_cidr() {
        let mut node = sample_node("node-a", "10.0.0.5", "10.244.1.0/24");
        node.spec.as_mut().unwrap().pod_cidr = None;
        assert!(node_info(&node).is_none());
    }
}
