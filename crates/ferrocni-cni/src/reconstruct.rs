//! Rebuilds the in-memory object model for a node from its persisted KV
//! records. Run at the start of every ADD/DEL so a short-lived CNI
//! invocation can see what an earlier invocation (or the daemon) already
//! set up, without keeping any state of its own between runs.

use ferrocni_core::model::{Addr, Nic, NicKind, Node, HOST_NETNS};
use ferrocni_core::Result;
use ferrocni_ipam::Ipam;
use ferrocni_storage::Storage;

/// `None` if this node has no allocated subnet yet (it has never run ADD).
pub async fn reconstruct_node(
    storage: &Storage,
    ipam: &Ipam,
    node_name: &str,
    bridge: &str,
    underlay_dev: &str,
) -> Result<Option<Node>> {
    let subnet = match ipam.get_subnet(node_name).await? {
        Some(subnet) => subnet,
        None => return Ok(None),
    };

    let mut node = Node::new(node_name);
    node.subnet = subnet;

    for pod in storage.get_all_pods(node_name).await? {
        let mut netns = ferrocni_core::model::Netns::new(pod.clone());
        for nic_name in storage.get_all_nics(node_name, &pod).await? {
            let kind = if pod == HOST_NETNS && nic_name == underlay_dev {
                NicKind::Underlay
            } else if nic_name == bridge {
                NicKind::Bridge
            } else {
                NicKind::Generic
            };
            let mut nic = Nic::new(nic_name.clone(), kind);

            for cidr in storage.get_all_addrs(node_name, &pod, &nic_name).await? {
                nic.addrs.push(Addr::parse(&cidr)?);
            }
            for route in storage.get_all_routes(node_name, &pod, &nic_name).await? {
                nic.routes.push(route);
            }
            netns.add_nic(nic);
        }
        node.add_netns(netns);
    }

    Ok(Some(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrocni_cluster::{ClusterView, NodeInfo};
    use ferrocni_kv::MemKv;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    struct FakeCluster;

    #[async_trait]
    impl ClusterView for FakeCluster {
        async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
            Ok(Some(NodeInfo {
                name: name.to_string(),
                internal_ip: Ipv4Addr::new(192, 168, 1, 10),
                pod_cidr: "10.244.0.0/24".to_string(),
            }))
        }
        async fn get_all_nodes(&self) -> Result<HashMap<String, NodeInfo>> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn missing_node_reconstructs_to_none() {
        let kv = Arc::new(MemKv::new());
        let storage = Storage::new(kv.clone());
        let ipam = Ipam::new(kv);
        assert!(reconstruct_node(&storage, &ipam, "node-a", "br0", "eth0")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reconstructs_bridge_and_pod_nics() {
        let kv = Arc::new(MemKv::new());
        let storage = Storage::new(kv.clone());
        let ipam = Ipam::new(kv);

        ipam.allocate_subnet(&FakeCluster, "node-a").await.unwrap();
        storage.add_pod("node-a", HOST_NETNS, HOST_NETNS).await.unwrap();
        storage.add_nic("node-a", HOST_NETNS, "br0").await.unwrap();
        storage
            .add_addr("node-a", HOST_NETNS, "br0", "10.244.0.1/24")
            .await
            .unwrap();

        let node = reconstruct_node(&storage, &ipam, "node-a", "br0", "eth0")
            .await
            .unwrap()
            .unwrap();
        let host = node.get_netns(HOST_NETNS).unwrap();
        let bridge = host.get_nic("br0").unwrap();
        assert_eq!(bridge.kind, NicKind::Bridge);
        assert_eq!(bridge.addr().unwrap().addr_cidr(), "10.244.0.1/24");
    }
}
