//! The netlink capability: link/veth/bridge/vxlan/vrf/address/route/neigh/fdb
//! operations. `add` is idempotent (checks existence first), `del` tolerates
//! "already gone".
//!
//! Every method takes an optional netns; `None` means the host's own
//! namespace.

use async_trait::async_trait;
use ferrocni_core::model::{Fdb, Neigh, Route};
use ferrocni_core::Result;
use std::net::Ipv4Addr;

#[async_trait]
pub trait Netlink: Send + Sync {
    async fn link_exists(&self, netns: Option<&str>, name: &str) -> Result<bool>;
    async fn link_add_generic(&self, netns: Option<&str>, name: &str) -> Result<()>;
    async fn link_add_bridge(&self, netns: Option<&str>, name: &str) -> Result<()>;
    async fn link_add_veth(&self, netns: Option<&str>, name: &str, peer: &str) -> Result<()>;
    async fn link_add_vxlan(
        &self,
        netns: Option<&str>,
        name: &str,
        vni: u32,
        underlay_dev: &str,
        underlay_addr: Ipv4Addr,
        dst_port: u16,
    ) -> Result<()>;
    async fn link_add_vrf(&self, netns: Option<&str>, name: &str, table: u32) -> Result<()>;
    async fn link_del(&self, netns: Option<&str>, name: &str) -> Result<()>;
    async fn link_set_up(&self, netns: Option<&str>, name: &str) -> Result<()>;
    async fn link_set_down(&self, netns: Option<&str>, name: &str) -> Result<()>;
    async fn link_set_master(&self, netns: Option<&str>, name: &str, master: &str) -> Result<()>;
    async fn link_rename(&self, netns: Option<&str>, name: &str, new_name: &str) -> Result<()>;
    /// Moves `name` (in the host namespace) into the namespace at `target`.
    async fn link_move_to_netns(&self, name: &str, target: &str) -> Result<()>;

    async fn addr_exists(&self, netns: Option<&str>, dev: &str, cidr: &str) -> Result<bool>;
    async fn addr_add(&self, netns: Option<&str>, dev: &str, cidr: &str) -> Result<()>;
    async fn addr_del(&self, netns: Option<&str>, dev: &str, cidr: &str) -> Result<()>;

    async fn route_exists(&self, netns: Option<&str>, route: &Route) -> Result<bool>;
    async fn route_add(&self, netns: Option<&str>, route: &Route) -> Result<()>;
    async fn route_del(&self, netns: Option<&str>, route: &Route) -> Result<()>;

    async fn neigh_add(&self, netns: Option<&str>, neigh: &Neigh) -> Result<()>;
    async fn neigh_del(&self, netns: Option<&str>, neigh: &Neigh) -> Result<()>;

    async fn fdb_add(&self, netns: Option<&str>, fdb: &Fdb) -> Result<()>;
    async fn fdb_del(&self, netns: Option<&str>, fdb: &Fdb) -> Result<()>;

    /// Name of the device carrying the host's default route.
    async fn default_route_dev(&self) -> Result<String>;
    /// First IPv4 address configured on `dev`, in the host namespace.
    async fn dev_ipv4_addr(&self, dev: &str) -> Result<Ipv4Addr>;
}
