//! `Netlink` backed by real `rtnetlink` sockets, switching network
//! namespace on a dedicated OS thread when a target netns is given.

use crate::netlink::Netlink;
use crate::netns;
use async_trait::async_trait;
use ferrocni_core::model::{Fdb, Neigh, Route};
use ferrocni_core::{Error, Result};
use futures::TryStreamExt;
use ipnetwork::Ipv4Network;
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::link::LinkAttribute;
use rtnetlink::{new_connection, Handle};
use std::future::Future;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub struct RtNetlink;

impl RtNetlink {
    pub fn new() -> Self {
        Self
    }

    /// Runs `op` against a fresh netlink connection, entering `netns`
    /// first if given.
    async fn with_handle<F, Fut, T>(&self, netns: Option<&str>, op: F) -> Result<T>
    where
        F: FnOnce(Handle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match netns {
            None => {
                let (connection, handle, _) = new_connection()
                    .map_err(|e| Error::Network(format!("netlink connection: {e}")))?;
                tokio::spawn(connection);
                op(handle).await
            }
            Some(raw) => {
                let path = netns::resolve(raw);
                tokio::task::spawn_blocking(move || {
                    netns::with_netns(&path, || {
                        let rt = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                            .map_err(|e| Error::Internal(format!("build netns runtime: {e}")))?;
                        rt.block_on(async move {
                            let (connection, handle, _) = new_connection().map_err(|e| {
                                Error::Network(format!("netlink connection in {path}: {e}"))
                            })?;
                            tokio::spawn(connection);
                            op(handle).await
                        })
                    })
                })
                .await
                .map_err(|e| Error::Internal(format!("netns worker join: {e}")))?
            }
        }
    }

    async fn link_index(handle: &Handle, name: &str) -> Result<Option<u32>> {
        let mut links = handle.link().get().match_name(name.to_string()).execute();
        match links
            .try_next()
            .await
            .map_err(|e| Error::Network(format!("look up link {name}: {e}")))?
        {
            Some(msg) => Ok(Some(msg.header.index)),
            None => Ok(None),
        }
    }

    fn link_name(msg: &rtnetlink::packet_route::link::LinkMessage) -> Option<String> {
        msg.attributes.iter().find_map(|a| {
            if let LinkAttribute::IfName(name) = a {
                Some(name.clone())
            } else {
                None
            }
        })
    }
}

impl Default for RtNetlink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Netlink for RtNetlink {
    async fn link_exists(&self, netns: Option<&str>, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_handle(netns, move |handle| async move {
            Ok(Self::link_index(&handle, &name).await?.is_some())
        })
        .await
    }

    async fn link_add_generic(&self, netns: Option<&str>, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_handle(netns, move |handle| async move {
            if Self::link_index(&handle, &name).await?.is_some() {
                return Ok(());
            }
            handle
                .link()
                .add()
                .dummy(name.clone())
                .execute()
                .await
                .map_err(|e| Error::Network(format!("create dummy link {name}: {e}")))
        })
        .await
    }

    async fn link_add_bridge(&self, netns: Option<&str>, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_handle(netns, move |handle| async move {
            if Self::link_index(&handle, &name).await?.is_some() {
                return Ok(());
            }
            handle
                .link()
                .add()
                .bridge(name.clone())
                .execute()
                .await
                .map_err(|e| Error::Network(format!("create bridge {name}: {e}")))
        })
        .await
    }

    async fn link_add_veth(&self, netns: Option<&str>, name: &str, peer: &str) -> Result<()> {
        let name = name.to_string();
        let peer = peer.to_string();
        self.with_handle(netns, move |handle| async move {
            if Self::link_index(&handle, &name).await?.is_some() {
                return Ok(());
            }
            handle
                .link()
                .add()
                .veth(name.clone(), peer.clone())
                .execute()
                .await
                .map_err(|e| Error::Network(format!("create veth {name}/{peer}: {e}")))
        })
        .await
    }

    async fn link_add_vxlan(
        &self,
        netns: Option<&str>,
        name: &str,
        vni: u32,
        underlay_dev: &str,
        underlay_addr: Ipv4Addr,
        dst_port: u16,
    ) -> Result<()> {
        let name = name.to_string();
        let underlay_dev = underlay_dev.to_string();
        self.with_handle(netns, move |handle| async move {
            if Self::link_index(&handle, &name).await?.is_some() {
                return Ok(());
            }
            let underlay_index = Self::link_index(&handle, &underlay_dev)
                .await?
                .ok_or_else(|| Error::Network(format!("underlay dev {underlay_dev} not found")))?;
            handle
                .link()
                .add()
                .vxlan(name.clone(), vni)
                .local(underlay_addr)
                .link(underlay_index)
                .port(dst_port)
                .up()
                .execute()
                .await
                .map_err(|e| Error::Network(format!("create vxlan {name}: {e}")))
        })
        .await
    }

    async fn link_add_vrf(&self, netns: Option<&str>, name: &str, table: u32) -> Result<()> {
        let name = name.to_string();
        self.with_handle(netns, move |handle| async move {
            if Self::link_index(&handle, &name).await?.is_some() {
                return Ok(());
            }
            handle
                .link()
                .add()
                .vrf(name.clone(), table)
                .execute()
                .await
                .map_err(|e| Error::Network(format!("create vrf {name}: {e}")))
        })
        .await
    }

    async fn link_del(&self, netns: Option<&str>, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_handle(netns, move |handle| async move {
            let Some(index) = Self::link_index(&handle, &name).await? else {
                return Ok(());
            };
            match handle.link().del(index).execute().await {
                Ok(()) => Ok(()),
                Err(rtnetlink::Error::NetlinkError(e)) if e.code.map(|c| c.get()) == Some(-19) => {
                    Ok(())
                }
                Err(e) => Err(Error::Network(format!("delete link {name}: {e}"))),
            }
        })
        .await
    }

    async fn link_set_up(&self, netns: Option<&str>, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_handle(netns, move |handle| async move {
            let index = Self::link_index(&handle, &name)
                .await?
                .ok_or_else(|| Error::Network(format!("link {name} not found")))?;
            handle
                .link()
                .set(index)
                .up()
                .execute()
                .await
                .map_err(|e| Error::Network(format!("set {name} up: {e}")))
        })
        .await
    }

    async fn link_set_down(&self, netns: Option<&str>, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_handle(netns, move |handle| async move {
            let index = Self::link_index(&handle, &name)
                .await?
                .ok_or_else(|| Error::Network(format!("link {name} not found")))?;
            handle
                .link()
                .set(index)
                .down()
                .execute()
                .await
                .map_err(|e| Error::Network(format!("set {name} down: {e}")))
        })
        .await
    }

    async fn link_set_master(&self, netns: Option<&str>, name: &str, master: &str) -> Result<()> {
        let name = name.to_string();
        let master = master.to_string();
        self.with_handle(netns, move |handle| async move {
            let index = Self::link_index(&handle, &name)
                .await?
                .ok_or_else(|| Error::Network(format!("link {name} not found")))?;
            let master_index = Self::link_index(&handle, &master)
                .await?
                .ok_or_else(|| Error::Network(format!("master {master} not found")))?;
            handle
                .link()
                .set(index)
                .controller(master_index)
                .execute()
                .await
                .map_err(|e| Error::Network(format!("attach {name} to {master}: {e}")))
        })
        .await
    }

    async fn link_rename(&self, netns: Option<&str>, name: &str, new_name: &str) -> Result<()> {
        let name = name.to_string();
        let new_name = new_name.to_string();
        self.with_handle(netns, move |handle| async move {
            let index = Self::link_index(&handle, &name)
                .await?
                .ok_or_else(|| Error::Network(format!("link {name} not found")))?;
            handle
                .link()
                .set(index)
                .name(new_name.clone())
                .execute()
                .await
                .map_err(|e| Error::Network(format!("rename {name} to {new_name}: {e}")))
        })
        .await
    }

    async fn link_move_to_netns(&self, name: &str, target: &str) -> Result<()> {
        let name = name.to_string();
        let target_path = netns::resolve(target);
        self.with_handle(None, move |handle| async move {
            let index = Self::link_index(&handle, &name)
                .await?
                .ok_or_else(|| Error::Network(format!("link {name} not found")))?;
            let ns_file = std::fs::File::open(&target_path)
                .map_err(|e| Error::Network(format!("open netns {target_path}: {e}")))?;
            handle
                .link()
                .set(index)
                .setns_by_fd(std::os::fd::AsRawFd::as_raw_fd(&ns_file))
                .execute()
                .await
                .map_err(|e| Error::Network(format!("move {name} into {target_path}: {e}")))
        })
        .await
    }

    async fn addr_exists(&self, netns: Option<&str>, dev: &str, cidr: &str) -> Result<bool> {
        let dev = dev.to_string();
        let cidr = cidr.to_string();
        self.with_handle(netns, move |handle| async move {
            let net = Ipv4Network::from_str(&cidr)
                .map_err(|e| Error::Network(format!("invalid cidr {cidr}: {e}")))?;
            let index = Self::link_index(&handle, &dev)
                .await?
                .ok_or_else(|| Error::Network(format!("dev {dev} not found")))?;
            let mut addrs = handle.address().get().set_link_index_filter(index).execute();
            while let Some(msg) = addrs
                .try_next()
                .await
                .map_err(|e| Error::Network(format!("list addrs on {dev}: {e}")))?
            {
                if msg.header.prefix_len != net.prefix() {
                    continue;
                }
                for attr in &msg.attributes {
                    if let AddressAttribute::Address(std::net::IpAddr::V4(a)) = attr {
                        if *a == net.ip() {
                            return Ok(true);
                        }
                    }
                }
            }
            Ok(false)
        })
        .await
    }

    async fn addr_add(&self, netns: Option<&str>, dev: &str, cidr: &str) -> Result<()> {
        let dev_owned = dev.to_string();
        let cidr_owned = cidr.to_string();
        if self.addr_exists(netns, dev, cidr).await? {
            return Ok(());
        }
        self.with_handle(netns, move |handle| async move {
            let net = Ipv4Network::from_str(&cidr_owned)
                .map_err(|e| Error::Network(format!("invalid cidr {cidr_owned}: {e}")))?;
            let index = Self::link_index(&handle, &dev_owned)
                .await?
                .ok_or_else(|| Error::Network(format!("dev {dev_owned} not found")))?;
            handle
                .address()
                .add(index, net.ip().into(), net.prefix())
                .execute()
                .await
                .map_err(|e| Error::Network(format!("add addr {cidr_owned} to {dev_owned}: {e}")))
        })
        .await
    }

    async fn addr_del(&self, netns: Option<&str>, dev: &str, cidr: &str) -> Result<()> {
        let dev_owned = dev.to_string();
        let cidr_owned = cidr.to_string();
        self.with_handle(netns, move |handle| async move {
            let net = Ipv4Network::from_str(&cidr_owned)
                .map_err(|e| Error::Network(format!("invalid cidr {cidr_owned}: {e}")))?;
            let Some(index) = Self::link_index(&handle, &dev_owned).await? else {
                return Ok(());
            };
            match handle
                .address()
                .del(index, net.ip().into(), net.prefix())
                .execute()
                .await
            {
                Ok(()) => Ok(()),
                Err(_) => Ok(()),
            }
        })
        .await
    }

    async fn route_exists(&self, netns: Option<&str>, route: &Route) -> Result<bool> {
        let route = route.clone();
        self.with_handle(netns, move |handle| async move {
            let dest = if route.is_default() {
                None
            } else {
                Some(
                    Ipv4Network::from_str(&route.dest)
                        .map_err(|e| Error::Network(format!("invalid dest {}: {e}", route.dest)))?,
                )
            };
            let via = Ipv4Addr::from_str(&route.via)
                .map_err(|e| Error::Network(format!("invalid via {}: {e}", route.via)))?;

            let mut routes = handle
                .route()
                .get(rtnetlink::IpVersion::V4)
                .execute();
            while let Some(msg) = routes
                .try_next()
                .await
                .map_err(|e| Error::Network(format!("list routes: {e}")))?
            {
                use rtnetlink::packet_route::route::RouteAttribute;
                let mut matches_dest = dest.is_none();
                let mut matches_via = false;
                for attr in &msg.attributes {
                    match attr {
                        RouteAttribute::Destination(rtnetlink::packet_route::route::RouteAddress::Inet(d)) => {
                            if let Some(want) = dest {
                                matches_dest = *d == want.ip() && msg.header.destination_prefix_length == want.prefix();
                            }
                        }
                        RouteAttribute::Gateway(rtnetlink::packet_route::route::RouteAddress::Inet(g)) => {
                            matches_via = *g == via;
                        }
                        _ => {}
                    }
                }
                if matches_dest && matches_via {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
    }

    async fn route_add(&self, netns: Option<&str>, route: &Route) -> Result<()> {
        if self.route_exists(netns, route).await? {
            return Ok(());
        }
        let route = route.clone();
        self.with_handle(netns, move |handle| async move {
            let via = Ipv4Addr::from_str(&route.via)
                .map_err(|e| Error::Network(format!("invalid via {}: {e}", route.via)))?;
            let mut req = handle.route().add().v4().gateway(via);
            if !route.is_default() {
                let dest = Ipv4Network::from_str(&route.dest)
                    .map_err(|e| Error::Network(format!("invalid dest {}: {e}", route.dest)))?;
                req = req.destination_prefix(dest.ip(), dest.prefix());
            }
            if !route.dev.is_empty() {
                if let Some(index) = Self::link_index(&handle, &route.dev).await? {
                    req = req.output_interface(index);
                }
            }
            req.execute()
                .await
                .map_err(|e| Error::Network(format!("add route {route:?}: {e}")))
        })
        .await
    }

    async fn route_del(&self, netns: Option<&str>, route: &Route) -> Result<()> {
        // Best-effort: rtnetlink route deletion keys on the exact kernel
        // message, so we re-fetch and delete the first structural match,
        // tolerating "no such route".
        let route = route.clone();
        self.with_handle(netns, move |handle| async move {
            let via = Ipv4Addr::from_str(&route.via)
                .map_err(|e| Error::Network(format!("invalid via {}: {e}", route.via)))?;
            let mut routes = handle.route().get(rtnetlink::IpVersion::V4).execute();
            while let Some(msg) = routes
                .try_next()
                .await
                .map_err(|e| Error::Network(format!("list routes: {e}")))?
            {
                use rtnetlink::packet_route::route::RouteAttribute;
                let gw_matches = msg.attributes.iter().any(|a| {
                    matches!(
                        a,
                        RouteAttribute::Gateway(rtnetlink::packet_route::route::RouteAddress::Inet(g))
                            if *g == via
                    )
                });
                if gw_matches {
                    let _ = handle.route().del(msg).execute().await;
                    return Ok(());
                }
            }
            Ok(())
        })
        .await
    }

    async fn neigh_add(&self, netns: Option<&str>, neigh: &Neigh) -> Result<()> {
        let neigh = neigh.clone();
        self.with_handle(netns, move |handle| async move {
            let index = Self::link_index(&handle, &neigh.dev)
                .await?
                .ok_or_else(|| Error::Network(format!("dev {} not found", neigh.dev)))?;
            let addr = Ipv4Addr::from_str(&neigh.addr)
                .map_err(|e| Error::Network(format!("invalid neigh addr {}: {e}", neigh.addr)))?;
            let mac = parse_mac(&neigh.mac)?;
            handle
                .neighbours()
                .add(index, addr.into())
                .link_local_address(&mac)
                .execute()
                .await
                .map_err(|e| Error::Network(format!("add neigh {}: {e}", neigh.addr)))
        })
        .await
    }

    async fn neigh_del(&self, netns: Option<&str>, neigh: &Neigh) -> Result<()> {
        let neigh = neigh.clone();
        self.with_handle(netns, move |handle| async move {
            let Some(index) = Self::link_index(&handle, &neigh.dev).await? else {
                return Ok(());
            };
            let addr = Ipv4Addr::from_str(&neigh.addr)
                .map_err(|e| Error::Network(format!("invalid neigh addr {}: {e}", neigh.addr)))?;
            let _ = handle.neighbours().del_v4(index, addr).execute().await;
            Ok(())
        })
        .await
    }

    async fn fdb_add(&self, netns: Option<&str>, fdb: &Fdb) -> Result<()> {
        let fdb = fdb.clone();
        self.with_handle(netns, move |handle| async move {
            let index = Self::link_index(&handle, &fdb.dev)
                .await?
                .ok_or_else(|| Error::Network(format!("dev {} not found", fdb.dev)))?;
            let remote = Ipv4Addr::from_str(&fdb.remote)
                .map_err(|e| Error::Network(format!("invalid fdb remote {}: {e}", fdb.remote)))?;
            let mac = parse_mac(&fdb.mac)?;
            handle
                .neighbours()
                .add(index, remote.into())
                .link_local_address(&mac)
                .execute()
                .await
                .map_err(|e| Error::Network(format!("add fdb entry {}: {e}", fdb.mac)))
        })
        .await
    }

    async fn fdb_del(&self, netns: Option<&str>, fdb: &Fdb) -> Result<()> {
        let fdb = fdb.clone();
        self.with_handle(netns, move |handle| async move {
            let Some(index) = Self::link_index(&handle, &fdb.dev).await? else {
                return Ok(());
            };
            let remote = Ipv4Addr::from_str(&fdb.remote)
                .map_err(|e| Error::Network(format!("invalid fdb remote {}: {e}", fdb.remote)))?;
            let _ = handle.neighbours().del_v4(index, remote).execute().await;
            Ok(())
        })
        .await
    }

    async fn default_route_dev(&self) -> Result<String> {
        self.with_handle(None, move |handle| async move {
            use rtnetlink::packet_route::route::RouteAttribute;
            let mut routes = handle.route().get(rtnetlink::IpVersion::V4).execute();
            while let Some(msg) = routes
                .try_next()
                .await
                .map_err(|e| Error::Network(format!("list routes: {e}")))?
            {
                let has_dest = msg
                    .attributes
                    .iter()
                    .any(|a| matches!(a, RouteAttribute::Destination(_)));
                if has_dest {
                    continue;
                }
                let oif = msg.attributes.iter().find_map(|a| match a {
                    RouteAttribute::Oif(index) => Some(*index),
                    _ => None,
                });
                if let Some(index) = oif {
                    let mut links = handle.link().get().match_index(index).execute();
                    if let Some(link) = links
                        .try_next()
                        .await
                        .map_err(|e| Error::Network(format!("look up link {index}: {e}")))?
                    {
                        if let Some(name) = Self::link_name(&link) {
                            return Ok(name);
                        }
                    }
                }
            }
            Err(Error::Network("no default route found".into()))
        })
        .await
    }

    async fn dev_ipv4_addr(&self, dev: &str) -> Result<Ipv4Addr> {
        let dev = dev.to_string();
        self.with_handle(None, move |handle| async move {
            let index = Self::link_index(&handle, &dev)
                .await?
                .ok_or_else(|| Error::Network(format!("dev {dev} not found")))?;
            let mut addrs = handle.address().get().set_link_index_filter(index).execute();
            while let Some(msg) = addrs
                .try_next()
                .await
                .map_err(|e| Error::Network(format!("list addrs on {dev}: {e}")))?
            {
                for attr in &msg.attributes {
                    if let AddressAttribute::Address(std::net::IpAddr::V4(a)) = attr {
                        return Ok(*a);
                    }
                }
            }
            Err(Error::Network(format!("no ipv4 address on {dev}")))
        })
        .await
    }
}

fn parse_mac(raw: &str) -> Result<[u8; 6]> {
    let mut out = [0u8; 6];
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 6 {
        return Err(Error::Network(format!("invalid mac address {raw}")));
    }
    for (i, part) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16)
            .map_err(|e| Error::Network(format!("invalid mac address {raw}: {e}")))?;
    }
    Ok(out)
}
