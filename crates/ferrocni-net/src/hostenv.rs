//! Discovers the facts about the host this process is running on: its
//! Kubernetes node name and the underlay device/address carrying node
//! traffic. Both the CNI plugin and the daemon need this once at startup.

use crate::netlink::Netlink;
use ferrocni_core::{Error, Result};
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
pub struct HostEnv {
    pub node_name: String,
    pub underlay_dev: String,
    pub underlay_addr: Ipv4Addr,
}

pub async fn discover(netlink: &dyn Netlink) -> Result<HostEnv> {
    let node_name = hostname()?;
    let underlay_dev = netlink.default_route_dev().await?;
    let underlay_addr = netlink.dev_ipv4_addr(&underlay_dev).await?;
    Ok(HostEnv {
        node_name,
        underlay_dev,
        underlay_addr,
    })
}

fn hostname() -> Result<String> {
    let raw = nix::unistd::gethostname()
        .map_err(|e| Error::Internal(format!("read hostname: {e}")))?;
    raw.into_string()
        .map_err(|_| Error::Internal("hostname is not valid UTF-8".into()))
}
