//! Persistent index of what has been set up on this node: which netns
//! backs which pod, and which nics/addrs/routes live in it. Mirrors the
//! object model in `ferrocni_core::model` but as flat KV records so a
//! restarted daemon can reconstruct its in-memory state.

use crate::keys::{
    addr_key, all_pods_key, netns_key, nic_key, route_key, route_value, simple_netns,
    single_pod_key, vtep_key, vtep_value, ROOT,
};
use ferrocni_core::cni_wire::SEPARATOR;
use ferrocni_core::model::Route;
use ferrocni_core::{Error, Result};
use ferrocni_kv::KvClient;
use std::sync::Arc;

pub struct Storage {
    kv: Arc<dyn KvClient>,
}

impl Storage {
    pub fn new(kv: Arc<dyn KvClient>) -> Self {
        Self { kv }
    }

    pub async fn dump(&self) -> Result<String> {
        self.kv.dump(ROOT).await
    }

    pub async fn add_netns(&self, node: &str, pod: &str, netns: &str) -> Result<()> {
        self.kv.put(&netns_key(node, pod), netns).await
    }

    pub async fn del_netns(&self, node: &str, pod: &str) -> Result<()> {
        self.kv.del(&netns_key(node, pod)).await
    }

    pub async fn get_netns(&self, node: &str, pod: &str) -> Result<Option<String>> {
        self.kv.get(&netns_key(node, pod)).await
    }

    /// Records the pod<->netns pairing both ways and registers the pod in
    /// the node's pod roster.
    pub async fn add_pod(&self, node: &str, netns: &str, pod: &str) -> Result<()> {
        self.kv.put(&single_pod_key(node, netns), pod).await?;
        self.kv.append(&all_pods_key(node), pod).await
    }

    pub async fn del_pod(&self, node: &str, netns: &str) -> Result<()> {
        let key = single_pod_key(node, netns);
        let pod = self
            .kv
            .get(&key)
            .await?
            .ok_or_else(|| Error::Storage(format!("no pod recorded for netns {netns}")))?;
        self.kv.del(&key).await?;
        self.kv.del_token(&all_pods_key(node), &pod).await
    }

    pub async fn get_pod(&self, node: &str, netns: &str) -> Result<Option<String>> {
        self.kv.get(&single_pod_key(node, netns)).await
    }

    pub async fn get_all_pods(&self, node: &str) -> Result<Vec<String>> {
        self.kv.list(&all_pods_key(node)).await
    }

    pub async fn add_nic(&self, node: &str, pod: &str, nic: &str) -> Result<()> {
        self.kv.append(&nic_key(node, pod), nic).await
    }

    pub async fn del_nic(&self, node: &str, pod: &str, nic: &str) -> Result<()> {
        self.kv.del_token(&nic_key(node, pod), nic).await
    }

    pub async fn get_all_nics(&self, node: &str, pod: &str) -> Result<Vec<String>> {
        self.kv.list(&nic_key(node, pod)).await
    }

    pub async fn add_addr(&self, node: &str, pod: &str, nic: &str, cidr: &str) -> Result<()> {
        self.kv.append(&addr_key(node, pod, nic), cidr).await
    }

    pub async fn del_addr(&self, node: &str, pod: &str, nic: &str) -> Result<()> {
        self.kv.del(&addr_key(node, pod, nic)).await
    }

    pub async fn get_all_addrs(&self, node: &str, pod: &str, nic: &str) -> Result<Vec<String>> {
        self.kv.list(&addr_key(node, pod, nic)).await
    }

    pub async fn add_route(&self, node: &str, pod: &str, nic: &str, route: &Route) -> Result<()> {
        let value = route_value(&route.dest, &route.via, &route.dev);
        self.kv.append(&route_key(node, pod, nic), &value).await
    }

    pub async fn del_route(&self, node: &str, pod: &str, nic: &str) -> Result<()> {
        self.kv.del(&route_key(node, pod, nic)).await
    }

    pub async fn get_all_routes(&self, node: &str, pod: &str, nic: &str) -> Result<Vec<Route>> {
        let raw = self.kv.list(&route_key(node, pod, nic)).await?;
        raw.iter().map(|item| decode_route(item)).collect()
    }

    pub async fn set_vtep(&self, node: &str, addr: &str, mac: &str) -> Result<()> {
        self.kv.put(&vtep_key(node), &vtep_value(addr, mac)).await
    }

    /// `None` until the node's vxlan dataplane has published a VTEP.
    pub async fn get_vtep(&self, node: &str) -> Result<Option<(String, String)>> {
        match self.kv.get(&vtep_key(node)).await? {
            Some(value) => Ok(Some(decode_vtep(&value)?)),
            None => Ok(None),
        }
    }

    /// Withdraws a node's VTEP, e.g. when its vxlan device is torn down.
    pub async fn del_vtep(&self, node: &str) -> Result<()> {
        self.kv.del(&vtep_key(node)).await
    }
}

fn decode_route(raw: &str) -> Result<Route> {
    let parts: Vec<&str> = raw.split(SEPARATOR).collect();
    if parts.len() != 3 {
        return Err(Error::Storage(format!("malformed route entry {raw:?}")));
    }
    Ok(Route::new(parts[0], parts[1], parts[2]))
}

fn decode_vtep(raw: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = raw.split(SEPARATOR).collect();
    if parts.len() != 2 {
        return Err(Error::Storage(format!("malformed vtep entry {raw:?}")));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

// `simple_netns` is exercised directly in `keys`; re-exported here so
// callers that only import `storage` still have it in scope.
pub use crate::keys::simple_netns as normalize_netns;
