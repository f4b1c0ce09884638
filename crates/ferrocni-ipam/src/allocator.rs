//! Subnet and per-host IP allocation over the KV store.
//!
//! Both allocations follow the same commit/rollback shape: append the
//! candidate to the global list first, then claim the per-node key; if the
//! claim fails, the global-list append is rolled back with `del_token`.

use crate::keys::{node_address_key, node_subnet_key, ADDRESS_KEY, SUBNET_KEY};
use ferrocni_cluster::ClusterView;
use ferrocni_core::subnet::Subnet;
use ferrocni_core::{Error, Result};
use ferrocni_kv::KvClient;
use std::sync::Arc;

pub struct Ipam {
    kv: Arc<dyn KvClient>,
}

impl Ipam {
    pub fn new(kv: Arc<dyn KvClient>) -> Self {
        Self { kv }
    }

    pub async fn dump(&self) -> Result<String> {
        self.kv.dump("/ohno").await
    }

    /// Claims `node`'s `podCIDR` from the ClusterView (the Kubernetes
    /// control plane is the source of truth for per-node CIDRs), reusing
    /// the node's existing allocation if it already has one.
    pub async fn allocate_subnet(&self, cluster: &dyn ClusterView, node: &str) -> Result<String> {
        if let Some(existing) = self.get_subnet(node).await? {
            return Ok(existing);
        }

        let info = cluster
            .get_node(node)
            .await?
            .ok_or_else(|| Error::Network(format!("no ClusterView data for node {node}")))?;
        let pod_cidr = info.pod_cidr;

        self.kv.append(SUBNET_KEY, &pod_cidr).await?;
        match self.kv.put(&node_subnet_key(node), &pod_cidr).await {
            Ok(()) => {
                tracing::trace!(%node, subnet = %pod_cidr, "allocated subnet");
                Ok(pod_cidr)
            }
            Err(e) => {
                self.kv.del_token(SUBNET_KEY, &pod_cidr).await?;
                Err(e)
            }
        }
    }

    pub async fn release_subnet(&self, node: &str, subnet: &str) -> Result<()> {
        self.kv.del(&node_subnet_key(node)).await?;
        self.kv.del_token(SUBNET_KEY, subnet).await
    }

    pub async fn get_subnet(&self, node: &str) -> Result<Option<String>> {
        self.kv.get(&node_subnet_key(node)).await
    }

    /// Claims the next unused host address in `node`'s subnet, skipping
    /// the network and broadcast addresses.
    pub async fn allocate_ip(&self, node: &str) -> Result<String> {
        let subnet = self
            .get_subnet(node)
            .await?
            .ok_or_else(|| Error::Network(format!("node {node} has no allocated subnet")))?;
        let subnet = Subnet::parse(&subnet)?;
        let max_hosts = subnet.max_hosts();
        let used = self.kv.list(&node_address_key(node)).await?;

        for index in 1..max_hosts.saturating_sub(1) {
            let candidate = subnet.generate_host_ip(index)?;
            if used.iter().any(|u| u == &candidate) {
                continue;
            }
            self.kv.append(&node_address_key(node), &candidate).await?;
            tracing::trace!(%node, ip = %candidate, "allocated address");
            return Ok(candidate);
        }

        Err(Error::Network(format!(
            "no addresses available in subnet for {node}"
        )))
    }

    /// Records an externally-chosen IP as used (e.g. a statically assigned
    /// address), failing if it's already claimed.
    pub async fn set_ip(&self, node: &str, ip: &str) -> Result<()> {
        let used = self.kv.list(&node_address_key(node)).await?;
        if used.iter().any(|u| u == ip) {
            return Err(Error::Network(format!("address {ip} already in use")));
        }
        self.kv.append(&node_address_key(node), ip).await
    }

    pub async fn release_ip(&self, node: &str, ip: &str) -> Result<()> {
        self.kv.del_token(&node_address_key(node), ip).await
    }

    pub async fn get_all_ips(&self, node: &str) -> Result<Vec<String>> {
        self.kv.list(&node_address_key(node)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrocni_cluster::NodeInfo;
    use ferrocni_kv::MemKv;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    struct FakeCluster(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl ClusterView for FakeCluster {
        async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
            Ok(self.0.get(name).map(|pod_cidr| NodeInfo {
                name: name.to_string(),
                internal_ip: Ipv4Addr::new(192, 0, 2, 1),
                pod_cidr: pod_cidr.to_string(),
            }))
        }
        async fn get_all_nodes(&self) -> Result<HashMap<String, NodeInfo>> {
            Ok(HashMap::new())
        }
    }

    fn ipam() -> Ipam {
        Ipam::new(Arc::new(MemKv::new()))
    }

    fn cluster(pairs: &[(&'static str, &'static str)]) -> FakeCluster {
        FakeCluster(pairs.iter().copied().collect())
    }

    #[tokio::test]
    async fn allocate_subnet_is_idempotent() {
        let ipam = ipam();
        let cluster = cluster(&[("node-a", "10.244.0.0/24")]);
        let first = ipam.allocate_subnet(&cluster, "node-a").await.unwrap();
        let second = ipam.allocate_subnet(&cluster, "node-a").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn allocate_subnet_uses_the_clusterview_pod_cidr() {
        let ipam = ipam();
        let cluster = cluster(&[("node-a", "10.244.1.0/24"), ("node-b", "10.244.2.0/24")]);
        let a = ipam.allocate_subnet(&cluster, "node-a").await.unwrap();
        let b = ipam.allocate_subnet(&cluster, "node-b").await.unwrap();
        assert_eq!(a, "10.244.1.0/24");
        assert_eq!(b, "10.244.2.0/24");
    }

    #[tokio::test]
    async fn allocate_subnet_fails_without_clusterview_data() {
        let ipam = ipam();
        let cluster = cluster(&[]);
        assert!(ipam.allocate_subnet(&cluster, "node-a").await.is_err());
    }

    #[tokio::test]
    async fn release_subnet_frees_it_for_reuse() {
        let ipam = ipam();
        let cluster = cluster(&[("node-a", "10.244.0.0/30"), ("node-b", "10.244.0.0/30")]);
        let a = ipam.allocate_subnet(&cluster, "node-a").await.unwrap();
        ipam.release_subnet("node-a", &a).await.unwrap();
        assert_eq!(ipam.get_subnet("node-a").await.unwrap(), None);
        let b = ipam.allocate_subnet(&cluster, "node-b").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn allocate_ip_requires_subnet_first() {
        let ipam = ipam();
        assert!(ipam.allocate_ip("node-a").await.is_err());
    }

    #[tokio::test]
    async fn allocate_ip_skips_network_and_broadcast() {
        let ipam = ipam();
        let cluster = cluster(&[("node-a", "10.244.1.0/30")]);
        ipam.allocate_subnet(&cluster, "node-a").await.unwrap();
        // A /30 has exactly two usable host addresses: .1 and .2.
        let first = ipam.allocate_ip("node-a").await.unwrap();
        let second = ipam.allocate_ip("node-a").await.unwrap();
        assert_ne!(first, second);
        assert!(ipam.allocate_ip("node-a").await.is_err());
    }

    #[tokio::test]
    async fn release_ip_allows_reallocation() {
        let ipam = ipam();
        let cluster = cluster(&[("node-a", "10.244.1.0/30")]);
        ipam.allocate_subnet(&cluster, "node-a").await.unwrap();
        let ip = ipam.allocate_ip("node-a").await.unwrap();
        ipam.release_ip("node-a", &ip).await.unwrap();
        assert!(ipam.get_all_ips("node-a").await.unwrap().is_empty());
    }
}
