//! Host-gw dataplane: a static route per peer, `dest = pod_cidr, via =
//! internal_ip`, added once the peer has an allocated subnet and removed
//! once either side loses it.

use crate::strategy::Strategy;
use async_trait::async_trait;
use ferrocni_cluster::{ClusterView, NodeInfo};
use ferrocni_core::model::Route;
use ferrocni_core::Result;
use ferrocni_ipam::Ipam;
use ferrocni_net::Netlink;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct HostGwStrategy {
    netlink: Arc<dyn Netlink>,
    cluster: Arc<dyn ClusterView>,
    ipam: Ipam,
    node_cache: Mutex<HashMap<String, NodeInfo>>,
}

impl HostGwStrategy {
    pub fn new(netlink: Arc<dyn Netlink>, cluster: Arc<dyn ClusterView>, ipam: Ipam) -> Self {
        Self {
            netlink,
            cluster,
            ipam,
            node_cache: Mutex::new(HashMap::new()),
        }
    }

    fn route_for(info: &NodeInfo) -> Route {
        Route::new(info.pod_cidr.clone(), info.internal_ip.to_string(), String::new())
    }
}

#[async_trait]
impl Strategy for HostGwStrategy {
    async fn tick(&self, current_node: &str) -> Result<()> {
        let own_subnet = self.ipam.get_subnet(current_node).await?;
        let cluster = self.cluster.get_all_nodes().await?;

        if own_subnet.is_some() {
            let known: Vec<String> = {
                let cache = self.node_cache.lock().await;
                cache.keys().cloned().collect()
            };

            for (name, info) in cluster.iter() {
                if name == current_node || known.contains(name) {
                    continue;
                }
                if self.ipam.get_subnet(name).await?.is_none() {
                    continue;
                }

                let route = Self::route_for(info);
                match self.netlink.route_add(None, &route).await {
                    Ok(()) => {
                        tracing::info!(peer = %name, dest = %route.dest, via = %route.via, "host-gw route added");
                        self.node_cache.lock().await.insert(name.clone(), info.clone());
                    }
                    Err(e) => {
                        tracing::warn!(peer = %name, error = %e, "host-gw route add failed");
                    }
                }
            }
        }

        let cached: Vec<(String, NodeInfo)> = {
            let cache = self.node_cache.lock().await;
            cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (name, info) in cached {
            let peer_subnet = self.ipam.get_subnet(&name).await?;
            if own_subnet.is_some() && peer_subnet.is_some() {
                continue;
            }

            let route = Self::route_for(&info);
            match self.netlink.route_del(None, &route).await {
                Ok(()) => {
                    tracing::info!(peer = %name, dest = %route.dest, "host-gw route removed");
                    self.node_cache.lock().await.remove(&name);
                }
                Err(e) => {
                    tracing::warn!(peer = %name, error = %e, "host-gw route delete failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrocni_kv::MemKv;
    use std::net::Ipv4Addr;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNetlink {
        added: StdMutex<Vec<Route>>,
        removed: StdMutex<Vec<Route>>,
    }

    #[async_trait]
    impl Netlink for RecordingNetlink {
        async fn link_exists(&self, _: Option<&str>, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn link_add_generic(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_add_bridge(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_add_veth(&self, _: Option<&str>, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_add_vxlan(
            &self,
            _: Option<&str>,
            _: &str,
            _: u32,
            _: &str,
            _: Ipv4Addr,
            _: u16,
        ) -> Result<()> {
            Ok(())
        }
        async fn link_add_vrf(&self, _: Option<&str>, _: &str, _: u32) -> Result<()> {
            Ok(())
        }
        async fn link_del(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_set_up(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_set_down(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_set_master(&self, _: Option<&str>, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_rename(&self, _: Option<&str>, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn link_move_to_netns(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn addr_exists(&self, _: Option<&str>, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn addr_add(&self, _: Option<&str>, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn addr_del(&self, _: Option<&str>, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn route_exists(&self, _: Option<&str>, _: &Route) -> Result<bool> {
            Ok(false)
        }
        async fn route_add(&self, _: Option<&str>, route: &Route) -> Result<()> {
            self.added.lock().unwrap().push(route.clone());
            Ok(())
        }
        async fn route_del(&self, _: Option<&str>, route: &Route) -> Result<()> {
            self.removed.lock().unwrap().push(route.clone());
            Ok(())
        }
        async fn neigh_add(&self, _: Option<&str>, _: &ferrocni_core::model::Neigh) -> Result<()> {
            Ok(())
        }
        async fn neigh_del(&self, _: Option<&str>, _: &ferrocni_core::model::Neigh) -> Result<()> {
            Ok(())
        }
        async fn fdb_add(&self, _: Option<&str>, _: &ferrocni_core::model::Fdb) -> Result<()> {
            Ok(())
        }
        async fn fdb_del(&self, _: Option<&str>, _: &ferrocni_core::model::Fdb) -> Result<()> {
            Ok(())
        }
        async fn default_route_dev(&self) -> Result<String> {
            Ok("eth0".into())
        }
        async fn dev_ipv4_addr(&self, _: &str) -> Result<Ipv4Addr> {
            Ok(Ipv4Addr::new(10, 0, 0, 1))
        }
    }

    struct FixedCluster(HashMap<String, NodeInfo>);

    #[async_trait]
    impl ClusterView for FixedCluster {
        async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
            Ok(self.0.get(name).cloned())
        }
        async fn get_all_nodes(&self) -> Result<HashMap<String, NodeInfo>> {
            Ok(self.0.clone())
        }
    }

    fn peer(name: &str, ip: &str, cidr: &str) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            internal_ip: ip.parse().unwrap(),
            pod_cidr: cidr.to_string(),
        }
    }

    fn two_node_cluster() -> HashMap<String, NodeInfo> {
        let mut nodes = HashMap::new();
        nodes.insert("node-a".to_string(), peer("node-a", "192.168.1.1", "10.244.0.0/24"));
        nodes.insert("node-b".to_string(), peer("node-b", "192.168.1.2", "10.244.1.0/24"));
        nodes
    }

    #[tokio::test]
    async fn adds_a_route_for_a_new_peer_with_a_subnet() {
        let kv = Arc::new(MemKv::new());
        let ipam = Ipam::new(kv);
        let nodes = two_node_cluster();
        let fixed = FixedCluster(nodes.clone());
        ipam.allocate_subnet(&fixed, "node-a").await.unwrap();
        ipam.allocate_subnet(&fixed, "node-b").await.unwrap();

        let cluster: Arc<dyn ClusterView> = Arc::new(FixedCluster(nodes));
        let netlink = Arc::new(RecordingNetlink::default());

        let strategy = HostGwStrategy::new(netlink.clone(), cluster, ipam);
        strategy.tick("node-a").await.unwrap();

        let added = netlink.added.lock().unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].dest, "10.244.1.0/24");
        assert_eq!(added[0].via, "192.168.1.2");
    }

    #[tokio::test]
    async fn removes_a_route_once_the_peer_loses_its_subnet() {
        let kv = Arc::new(MemKv::new());
        let ipam = Ipam::new(kv);
        let nodes = two_node_cluster();
        let fixed = FixedCluster(nodes.clone());
        ipam.allocate_subnet(&fixed, "node-a").await.unwrap();
        let b_subnet = ipam.allocate_subnet(&fixed, "node-b").await.unwrap();

        let cluster: Arc<dyn ClusterView> = Arc::new(FixedCluster(nodes));
        let netlink = Arc::new(RecordingNetlink::default());

        let strategy = HostGwStrategy::new(netlink.clone(), cluster, ipam);
        strategy.tick("node-a").await.unwrap();
        assert_eq!(netlink.added.lock().unwrap().len(), 1);

        strategy.ipam.release_subnet("node-b", &b_subnet).await.unwrap();
        strategy.tick("node-a").await.unwrap();

        let removed = netlink.removed.lock().unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].dest, "10.244.1.0/24");
    }
}
