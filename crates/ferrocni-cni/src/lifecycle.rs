//! CNI ADD/DEL orchestration: wires the netlink, KV, IPAM, storage and
//! cluster capabilities together into the per-invocation plugin behavior.
//!
//! Each invocation is a short-lived process, so there's no state to carry
//! between runs: every ADD/DEL starts by reconstructing the node's current
//! object model out of storage, then drives netlink/IPAM/storage to the
//! state the command demands.

use crate::hash::short_hash;
use crate::reconstruct::reconstruct_node;
use ferrocni_cluster::ClusterView;
use ferrocni_core::cni_wire::{CniConfig, CniEnv, CniInterface, CniIp, CniResult, DataplaneMode};
use ferrocni_core::model::{Route, HOST_NETNS};
use ferrocni_core::{Error, Result};
use ferrocni_ipam::Ipam;
use ferrocni_net::{HostEnv, Netlink};
use ferrocni_storage::Storage;
use std::sync::Arc;

pub struct Lifecycle {
    netlink: Arc<dyn Netlink>,
    ipam: Ipam,
    storage: Storage,
    cluster: Arc<dyn ClusterView>,
    conf: CniConfig,
    host: HostEnv,
}

impl Lifecycle {
    pub fn new(
        netlink: Arc<dyn Netlink>,
        ipam: Ipam,
        storage: Storage,
        cluster: Arc<dyn ClusterView>,
        conf: CniConfig,
        host: HostEnv,
    ) -> Self {
        Self {
            netlink,
            ipam,
            storage,
            cluster,
            conf,
            host,
        }
    }

    pub async fn add(&self, env: &CniEnv) -> Result<CniResult> {
        self.conf.validate()?;

        let node_name = self.host.node_name.clone();
        let node = match reconstruct_node(
            &self.storage,
            &self.ipam,
            &node_name,
            &self.conf.bridge,
            &self.host.underlay_dev,
        )
        .await?
        {
            Some(node) => node,
            None => self.create_node(&node_name).await?,
        };

        let veth_pod = env.ifname.clone();

        // Idempotent: if this pod already has this nic, hand back its
        // existing address instead of reallocating.
        if let Some(pod) = node.get_netns(&env.container_id) {
            if let Some(nic) = pod.get_nic(&veth_pod) {
                let addr = nic
                    .addr()
                    .ok_or_else(|| Error::Network(format!("veth {veth_pod} has no address")))?;
                let gateway = self.bridge_gateway(&node)?;
                return Ok(build_result(addr.addr_cidr(), gateway, &veth_pod, &env.netns));
            }
        }

        let gateway = self.bridge_gateway(&node)?;
        let veth_host = format!("veth_{}", short_hash(&env.container_id));
        let tmp_name = format!("ohno_{}", short_hash(&uuid_like(&env.container_id, &veth_pod)));

        let existing_pod = self.storage.get_pod(&node_name, &env.netns).await?;
        if let Some(existing) = &existing_pod {
            if existing != &env.container_id {
                return Err(Error::Container(format!(
                    "netns {} already belongs to pod {existing}, not {}",
                    env.netns, env.container_id
                )));
            }
        }

        self.storage
            .add_pod(&node_name, &env.netns, &env.container_id)
            .await?;
        self.storage
            .add_netns(&node_name, &env.container_id, &env.netns)
            .await?;

        self.netlink
            .link_add_veth(None, &tmp_name, &veth_host)
            .await?;
        self.netlink
            .link_move_to_netns(&tmp_name, &env.netns)
            .await?;
        self.netlink
            .link_rename(Some(&env.netns), &tmp_name, &veth_pod)
            .await?;
        self.netlink.link_set_up(Some(&env.netns), &veth_pod).await?;
        self.netlink.link_set_up(None, &veth_host).await?;
        self.netlink
            .link_set_master(None, &veth_host, &self.conf.bridge)
            .await?;

        self.storage
            .add_nic(&node_name, &env.container_id, &veth_pod)
            .await?;

        let pod_addr = self.ipam.allocate_ip(&node_name).await?;
        self.netlink
            .addr_add(Some(&env.netns), &veth_pod, &pod_addr)
            .await?;
        self.storage
            .add_addr(&node_name, &env.container_id, &veth_pod, &pod_addr)
            .await?;

        let default_route = Route::new("", gateway.clone(), veth_pod.clone());
        self.netlink
            .route_add(Some(&env.netns), &default_route)
            .await?;
        self.storage
            .add_route(&node_name, &env.container_id, &veth_pod, &default_route)
            .await?;

        Ok(build_result(&pod_addr, gateway, &veth_pod, &env.netns))
    }

    pub async fn del(&self, env: &CniEnv) -> Result<()> {
        let node_name = self.host.node_name.clone();
        let mut node = match reconstruct_node(
            &self.storage,
            &self.ipam,
            &node_name,
            &self.conf.bridge,
            &self.host.underlay_dev,
        )
        .await?
        {
            Some(node) => node,
            None => {
                tracing::warn!(%node_name, "CNI DEL: node has no recorded state, nothing to do");
                return Ok(());
            }
        };

        if let Some(pod) = node.get_netns(&env.container_id) {
            if let Some(nic) = pod.get_nic(&env.ifname) {
                let addr = nic.addr().map(|a| a.addr_cidr().to_string());
                let veth_host = format!("veth_{}", short_hash(&env.container_id));
                if let Err(e) = self.netlink.link_del(None, &veth_host).await {
                    tracing::warn!(%veth_host, error = %e, "failed to delete host veth");
                }

                if let Some(addr) = addr {
                    if let Err(e) = self.ipam.release_ip(&node_name, &addr).await {
                        tracing::warn!(%addr, error = %e, "failed to release pod address");
                    }
                }
                self.storage
                    .del_addr(&node_name, &env.container_id, &env.ifname)
                    .await?;
                self.storage
                    .del_route(&node_name, &env.container_id, &env.ifname)
                    .await?;
                self.storage
                    .del_nic(&node_name, &env.container_id, &env.ifname)
                    .await?;
            }
        } else {
            tracing::warn!(container_id = %env.container_id, "CNI DEL: pod had already been deleted");
        }

        let netns_of_pod = self.storage.get_netns(&node_name, &env.container_id).await?;
        self.storage
            .del_netns(&node_name, &env.container_id)
            .await?;
        if let Some(netns) = netns_of_pod {
            self.storage.del_pod(&node_name, &netns).await?;
        }
        node.del_netns(&env.container_id);

        if node.netns_count() == 1 {
            // Only the host root namespace remains: this was the node's
            // last pod, so tear down the bridge/underlay and hand back its
            // subnet.
            if let Some(host) = node.get_netns(HOST_NETNS) {
                for nic in host.nics() {
                    if nic.kind.destroyable() {
                        if let Err(e) = self.netlink.link_del(None, &nic.name).await {
                            tracing::warn!(name = %nic.name, error = %e, "failed to delete host nic");
                        }
                    }
                    self.storage
                        .del_addr(&node_name, HOST_NETNS, &nic.name)
                        .await
                        .ok();
                    self.storage
                        .del_nic(&node_name, HOST_NETNS, &nic.name)
                        .await
                        .ok();
                }
            }
            self.storage.del_netns(&node_name, HOST_NETNS).await.ok();

            if !node.subnet.is_empty() {
                if let Err(e) = self.ipam.release_subnet(&node_name, &node.subnet).await {
                    tracing::error!(error = %e, "failed to release node subnet");
                }
            }
        }

        Ok(())
    }

    /// Ensures a bridge and gateway address exist for this node, claiming
    /// this node's podCIDR from the ClusterView when this is its first ADD.
    async fn create_node(&self, node_name: &str) -> Result<ferrocni_core::model::Node> {
        let node_subnet = match self.conf.ipam.mode {
            DataplaneMode::Vxlan => self.conf.ipam.subnet.clone(),
            DataplaneMode::HostGw | DataplaneMode::Evpn => {
                self.ipam
                    .allocate_subnet(self.cluster.as_ref(), node_name)
                    .await?
            }
        };

        let gateway = self.ipam.allocate_ip(node_name).await?;

        self.netlink.link_add_bridge(None, &self.conf.bridge).await?;
        self.netlink
            .addr_add(None, &self.conf.bridge, &gateway)
            .await?;
        self.netlink.link_set_up(None, &self.conf.bridge).await?;

        self.storage.add_netns(node_name, HOST_NETNS, HOST_NETNS).await?;
        self.storage.add_pod(node_name, HOST_NETNS, HOST_NETNS).await?;
        self.storage.add_nic(node_name, HOST_NETNS, &self.conf.bridge).await?;
        self.storage
            .add_addr(node_name, HOST_NETNS, &self.conf.bridge, &gateway)
            .await?;
        self.storage
            .add_nic(node_name, HOST_NETNS, &self.host.underlay_dev)
            .await?;

        reconstruct_node(
            &self.storage,
            &self.ipam,
            node_name,
            &self.conf.bridge,
            &self.host.underlay_dev,
        )
        .await?
        .ok_or_else(|| Error::Internal("node vanished immediately after creation".into()))
    }

    fn bridge_gateway(&self, node: &ferrocni_core::model::Node) -> Result<String> {
        let host = node
            .get_netns(HOST_NETNS)
            .ok_or_else(|| Error::Internal("node has no host root namespace".into()))?;
        let bridge = host
            .get_nic(&self.conf.bridge)
            .ok_or_else(|| Error::Internal("node has no bridge nic".into()))?;
        let addr = bridge
            .addr()
            .ok_or_else(|| Error::Internal("bridge has no gateway address".into()))?;
        Ok(addr.ip().to_string())
    }
}

fn build_result(addr_cidr: &str, gateway: String, ifname: &str, netns: &str) -> CniResult {
    CniResult {
        cni_version: ferrocni_core::cni_wire::CNI_VERSION.to_string(),
        ips: vec![CniIp {
            address: addr_cidr.to_string(),
            gateway: gateway.parse().unwrap_or(std::net::Ipv4Addr::UNSPECIFIED),
        }],
        interfaces: vec![CniInterface {
            name: ifname.to_string(),
            sandbox: netns.to_string(),
        }],
    }
}

/// A temporary link name must be unique per invocation even when the final
/// `ifname` repeats across pods (e.g. every pod's container-side nic is
/// `eth0`), so the hash mixes in the container id too.
fn uuid_like(container_id: &str, ifname: &str) -> String {
    format!("{container_id}-{ifname}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrocni_cluster::NodeInfo;
    use ferrocni_kv::MemKv;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeNetlink {
        calls: Mutex<Vec<String>>,
    }

    impl FakeNetlink {
        fn log(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl Netlink for FakeNetlink {
        async fn link_exists(&self, _netns: Option<&str>, _name: &str) -> Result<bool> {
            Ok(false)
        }
        async fn link_add_generic(&self, _netns: Option<&str>, name: &str) -> Result<()> {
            self.log(format!("link_add_generic {name}"));
            Ok(())
        }
        async fn link_add_bridge(&self, _netns: Option<&str>, name: &str) -> Result<()> {
            self.log(format!("link_add_bridge {name}"));
            Ok(())
        }
        async fn link_add_veth(&self, _netns: Option<&str>, name: &str, peer: &str) -> Result<()> {
            self.log(format!("link_add_veth {name} {peer}"));
            Ok(())
        }
        async fn link_add_vxlan(
            &self,
            _netns: Option<&str>,
            name: &str,
            _vni: u32,
            _underlay_dev: &str,
            _underlay_addr: Ipv4Addr,
            _dst_port: u16,
        ) -> Result<()> {
            self.log(format!("link_add_vxlan {name}"));
            Ok(())
        }
        async fn link_add_vrf(&self, _netns: Option<&str>, name: &str, _table: u32) -> Result<()> {
            self.log(format!("link_add_vrf {name}"));
            Ok(())
        }
        async fn link_del(&self, _netns: Option<&str>, name: &str) -> Result<()> {
            self.log(format!("link_del {name}"));
            Ok(())
        }
        async fn link_set_up(&self, _netns: Option<&str>, name: &str) -> Result<()> {
            self.log(format!("link_set_up {name}"));
            Ok(())
        }
        async fn link_set_down(&self, _netns: Option<&str>, name: &str) -> Result<()> {
            self.log(format!("link_set_down {name}"));
            Ok(())
        }
        async fn link_set_master(
            &self,
            _netns: Option<&str>,
            name: &str,
            master: &str,
        ) -> Result<()> {
            self.log(format!("link_set_master {name} {master}"));
            Ok(())
        }
        async fn link_rename(
            &self,
            _netns: Option<&str>,
            name: &str,
            new_name: &str,
        ) -> Result<()> {
            self.log(format!("link_rename {name} {new_name}"));
            Ok(())
        }
        async fn link_move_to_netns(&self, name: &str, target: &str) -> Result<()> {
            self.log(format!("link_move_to_netns {name} {target}"));
            Ok(())
        }
        async fn addr_exists(&self, _netns: Option<&str>, _dev: &str, _cidr: &str) -> Result<bool> {
            Ok(false)
        }
        async fn addr_add(&self, _netns: Option<&str>, dev: &str, cidr: &str) -> Result<()> {
            self.log(format!("addr_add {dev} {cidr}"));
            Ok(())
        }
        async fn addr_del(&self, _netns: Option<&str>, dev: &str, cidr: &str) -> Result<()> {
            self.log(format!("addr_del {dev} {cidr}"));
            Ok(())
        }
        async fn route_exists(&self, _netns: Option<&str>, _route: &Route) -> Result<bool> {
            Ok(false)
        }
        async fn route_add(&self, _netns: Option<&str>, route: &Route) -> Result<()> {
            self.log(format!("route_add {route:?}"));
            Ok(())
        }
        async fn route_del(&self, _netns: Option<&str>, route: &Route) -> Result<()> {
            self.log(format!("route_del {route:?}"));
            Ok(())
        }
        async fn neigh_add(&self, _netns: Option<&str>, _neigh: &ferrocni_core::model::Neigh) -> Result<()> {
            Ok(())
        }
        async fn neigh_del(&self, _netns: Option<&str>, _neigh: &ferrocni_core::model::Neigh) -> Result<()> {
            Ok(())
        }
        async fn fdb_add(&self, _netns: Option<&str>, _fdb: &ferrocni_core::model::Fdb) -> Result<()> {
            Ok(())
        }
        async fn fdb_del(&self, _netns: Option<&str>, _fdb: &ferrocni_core::model::Fdb) -> Result<()> {
            Ok(())
        }
        async fn default_route_dev(&self) -> Result<String> {
            Ok("eth0".to_string())
        }
        async fn dev_ipv4_addr(&self, _dev: &str) -> Result<Ipv4Addr> {
            Ok(Ipv4Addr::new(192, 168, 1, 10))
        }
    }

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

    fn test_conf() -> CniConfig {
        CniConfig {
            cni_version: ferrocni_core::cni_wire::CNI_VERSION.into(),
            name: "mynet".into(),
            plugin_type: "ferrocni".into(),
            bridge: "br0".into(),
            log: String::new(),
            log_level: "info".into(),
            ssl: false,
            ipam: ferrocni_core::cni_wire::IpamConfig {
                subnet: "10.244.0.0/16".into(),
                mode: DataplaneMode::HostGw,
            },
        }
    }

    fn test_lifecycle() -> Lifecycle {
        let kv = Arc::new(MemKv::new());
        let netlink: Arc<dyn Netlink> = Arc::new(FakeNetlink::default());
        let cluster: Arc<dyn ClusterView> = Arc::new(FakeCluster);
        Lifecycle::new(
            netlink,
            Ipam::new(kv.clone()),
            Storage::new(kv),
            cluster,
            test_conf(),
            HostEnv {
                node_name: "node-a".into(),
                underlay_dev: "eth0".into(),
                underlay_addr: Ipv4Addr::new(192, 168, 1, 10),
            },
        )
    }

    fn env(container_id: &str, netns: &str, ifname: &str) -> ferrocni_core::cni_wire::CniEnv {
        ferrocni_core::cni_wire::CniEnv {
            command: ferrocni_core::cni_wire::CniCommand::Add,
            container_id: container_id.into(),
            netns: netns.into(),
            ifname: ifname.into(),
        }
    }

    #[tokio::test]
    async fn add_allocates_node_and_pod_address() {
        let lc = test_lifecycle();
        let result = lc.add(&env("pod-1", "/proc/100/ns/net", "eth0")).await.unwrap();
        assert_eq!(result.interfaces[0].name, "eth0");
        assert!(!result.ips[0].address.is_empty());
        assert_eq!(result.ips[0].gateway.to_string(), "10.244.0.1");
    }

    #[tokio::test]
    async fn add_is_idempotent_for_the_same_pod() {
        let lc = test_lifecycle();
        let first = lc.add(&env("pod-1", "/proc/100/ns/net", "eth0")).await.unwrap();
        let second = lc.add(&env("pod-1", "/proc/100/ns/net", "eth0")).await.unwrap();
        assert_eq!(first.ips[0].address, second.ips[0].address);
    }

    #[tokio::test]
    async fn add_rejects_netns_reused_by_a_different_pod() {
        let lc = test_lifecycle();
        lc.add(&env("pod-1", "/proc/100/ns/net", "eth0")).await.unwrap();
        let err = lc.add(&env("pod-2", "/proc/100/ns/net", "eth0")).await.unwrap_err();
        assert!(matches!(err, Error::Container(_)));
    }

    #[tokio::test]
    async fn del_of_last_pod_releases_the_node_subnet() {
        let lc = test_lifecycle();
        let add_env = env("pod-1", "/proc/100/ns/net", "eth0");
        lc.add(&add_env).await.unwrap();

        lc.del(&add_env).await.unwrap();

        let node = reconstruct_node(&lc.storage, &lc.ipam, "node-a", "br0", "eth0")
            .await
            .unwrap();
        assert!(node.is_none());
    }

    #[tokio::test]
    async fn del_of_unknown_node_is_a_no_op() {
        let lc = test_lifecycle();
        lc.del(&env("pod-1", "/proc/100/ns/net", "eth0")).await.unwrap();
    }
}
