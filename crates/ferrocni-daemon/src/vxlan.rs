//! Vxlan dataplane: a route + ARP entry + FDB entry per peer, keyed on
//! the VTEP each peer publishes to storage rather than on IPAM (every
//! node shares one subnet in this mode).

use crate::strategy::Strategy;
use async_trait::async_trait;
use ferrocni_cluster::{ClusterView, NodeInfo};
use ferrocni_core::model::{Fdb, Neigh, Route};
use ferrocni_core::Result;
use ferrocni_net::Netlink;
use ferrocni_storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct VxlanStrategy {
    netlink: Arc<dyn Netlink>,
    cluster: Arc<dyn ClusterView>,
    storage: Storage,
    vxlan_dev: String,
    node_cache: Mutex<HashMap<String, NodeInfo>>,
}

impl VxlanStrategy {
    pub fn new(
        netlink: Arc<dyn Netlink>,
        cluster: Arc<dyn ClusterView>,
        storage: Storage,
        vxlan_dev: impl Into<String>,
    ) -> Self {
        Self {
            netlink,
            cluster,
            storage,
            vxlan_dev: vxlan_dev.into(),
            node_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn add_peer(&self, info: &NodeInfo, vtep_addr: &str, vtep_mac: &str) -> Result<()> {
        let route = Route::new(info.pod_cidr.clone(), vtep_addr.to_string(), self.vxlan_dev.clone());
        self.netlink.route_add(None, &route).await?;

        let neigh = Neigh {
            addr: vtep_addr.to_string(),
            mac: vtep_mac.to_string(),
            dev: self.vxlan_dev.clone(),
        };
        if let Err(e) = self.netlink.neigh_add(None, &neigh).await {
            self.netlink.route_del(None, &route).await.ok();
            return Err(e);
        }

        let fdb = Fdb {
            mac: vtep_mac.to_string(),
            remote: info.internal_ip.to_string(),
            dev: self.vxlan_dev.clone(),
        };
        if let Err(e) = self.netlink.fdb_add(None, &fdb).await {
            self.netlink.route_del(None, &route).await.ok();
            self.netlink.neigh_del(None, &neigh).await.ok();
            return Err(e);
        }

        Ok(())
    }

    async fn del_peer(&self, info: &NodeInfo, vtep_addr: &str, vtep_mac: &str) {
        let route = Route::new(info.pod_cidr.clone(), vtep_addr.to_string(), self.vxlan_dev.clone());
        if let Err(e) = self.netlink.route_del(None, &route).await {
            tracing::warn!(peer = %info.name, error = %e, "vxlan route delete failed");
        }
        let neigh = Neigh {
            addr: vtep_addr.to_string(),
            mac: vtep_mac.to_string(),
            dev: self.vxlan_dev.clone(),
        };
        if let Err(e) = self.netlink.neigh_del(None, &neigh).await {
            tracing::warn!(peer = %info.name, error = %e, "vxlan neigh delete failed");
        }
        let fdb = Fdb {
            mac: vtep_mac.to_string(),
            remote: info.internal_ip.to_string(),
            dev: self.vxlan_dev.clone(),
        };
        if let Err(e) = self.netlink.fdb_del(None, &fdb).await {
            tracing::warn!(peer = %info.name, error = %e, "vxlan fdb delete failed");
        }
    }
}

#[async_trait]
impl Strategy for VxlanStrategy {
    async fn tick(&self, current_node: &str) -> Result<()> {
        let own_vtep = self.storage.get_vtep(current_node).await?;
        let cluster = self.cluster.get_all_nodes().await?;

        if own_vtep.is_some() {
            let known: Vec<String> = {
                let cache = self.node_cache.lock().await;
                cache.keys().cloned().collect()
            };

            for (name, info) in cluster.iter() {
                if name == current_node || known.contains(name) {
                    continue;
                }
                let Some((vtep_addr, vtep_mac)) = self.storage.get_vtep(name).await? else {
                    continue;
                };

                match self.add_peer(info, &vtep_addr, &vtep_mac).await {
                    Ok(()) => {
                        tracing::info!(peer = %name, vtep = %vtep_addr, "vxlan peer wired up");
                        self.node_cache.lock().await.insert(name.clone(), info.clone());
                    }
                    Err(e) => {
                        tracing::warn!(peer = %name, error = %e, "vxlan peer wire-up failed");
                    }
                }
            }
        }

        let cached: Vec<(String, NodeInfo)> = {
            let cache = self.node_cache.lock().await;
            cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (name, info) in cached {
            let peer_vtep = self.storage.get_vtep(&name).await?;
            if own_vtep.is_some() && peer_vtep.is_some() {
                continue;
            }

            let (vtep_addr, vtep_mac) = peer_vtep.unwrap_or_default();
            self.del_peer(&info, &vtep_addr, &vtep_mac).await;
            self.node_cache.lock().await.remove(&name);
            tracing::info!(peer = %name, "vxlan peer torn down");
        }

        Ok(())
    }
}
