//! Evpn dataplane: a one-shot device wiring, not a reconciliation loop.
//! `setup` brings up vrf/bridge_l3/bridge_l2/vxlan and wires their
//! masters; `teardown` tears them back down. `tick` is never called
//! since [`needs_polling`](Strategy::needs_polling) is `false`.

use crate::strategy::Strategy;
use async_trait::async_trait;
use ferrocni_core::Result;
use ferrocni_net::Netlink;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub struct EvpnStrategy {
    netlink: Arc<dyn Netlink>,
    vrf: String,
    vrf_table: u32,
    bridge_l3: String,
    bridge_l2: String,
    vxlan: String,
    vni: u32,
    underlay_dev: String,
    underlay_addr: Ipv4Addr,
    vxlan_dst_port: u16,
}

impl EvpnStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        netlink: Arc<dyn Netlink>,
        vrf: impl Into<String>,
        vrf_table: u32,
        bridge_l3: impl Into<String>,
        bridge_l2: impl Into<String>,
        vxlan: impl Into<String>,
        vni: u32,
        underlay_dev: impl Into<String>,
        underlay_addr: Ipv4Addr,
        vxlan_dst_port: u16,
    ) -> Self {
        Self {
            netlink,
            vrf: vrf.into(),
            vrf_table,
            bridge_l3: bridge_l3.into(),
            bridge_l2: bridge_l2.into(),
            vxlan: vxlan.into(),
            vni,
            underlay_dev: underlay_dev.into(),
            underlay_addr,
            vxlan_dst_port,
        }
    }
}

#[async_trait]
impl Strategy for EvpnStrategy {
    async fn setup(&self) -> Result<()> {
        self.netlink.link_add_vrf(None, &self.vrf, self.vrf_table).await?;
        self.netlink.link_add_bridge(None, &self.bridge_l3).await?;
        self.netlink.link_add_bridge(None, &self.bridge_l2).await?;
        self.netlink
            .link_add_vxlan(
                None,
                &self.vxlan,
                self.vni,
                &self.underlay_dev,
                self.underlay_addr,
                self.vxlan_dst_port,
            )
            .await?;

        self.netlink.link_set_up(None, &self.vrf).await?;
        self.netlink.link_set_up(None, &self.bridge_l3).await?;
        self.netlink.link_set_up(None, &self.bridge_l2).await?;
        self.netlink.link_set_up(None, &self.vxlan).await?;

        self.netlink.link_set_master(None, &self.bridge_l3, &self.vrf).await?;
        self.netlink.link_set_master(None, &self.bridge_l2, &self.vrf).await?;
        self.netlink.link_set_master(None, &self.vxlan, &self.bridge_l3).await?;

        Ok(())
    }

    async fn tick(&self, _current_node: &str) -> Result<()> {
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        if let Err(e) = self.netlink.link_del(None, &self.vxlan).await {
            tracing::warn!(dev = %self.vxlan, error = %e, "evpn vxlan cleanup failed");
        }
        if let Err(e) = self.netlink.link_del(None, &self.bridge_l3).await {
            tracing::warn!(dev = %self.bridge_l3, error = %e, "evpn bridge_l3 cleanup failed");
        }
        if let Err(e) = self.netlink.link_del(None, &self.vrf).await {
            tracing::warn!(dev = %self.vrf, error = %e, "evpn vrf cleanup failed");
        }
        Ok(())
    }

    fn needs_polling(&self) -> bool {
        false
    }
}
