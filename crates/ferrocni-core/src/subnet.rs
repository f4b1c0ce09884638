//! IPv4 subnet arithmetic used by IPAM and by the lifecycle engine's
//! consistency checks.

use crate::error::{Error, Result};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::str::FromStr;

const MAX_PREFIX_V4: u8 = 32;

/// A parsed IPv4 CIDR block.
#[derive(Debug, Clone, Copy)]
pub struct Subnet {
    net: Ipv4Network,
}

impl Subnet {
    pub fn parse(cidr: &str) -> Result<Self> {
        let net = Ipv4Network::from_str(cidr)
            .map_err(|e| Error::Network(format!("invalid CIDR {cidr}: {e}")))?;
        Ok(Self { net })
    }

    pub fn cidr(&self) -> String {
        self.net.to_string()
    }

    pub fn prefix(&self) -> u8 {
        self.net.prefix()
    }

    /// Number of addresses in the block, including network/broadcast.
    pub fn max_hosts(&self) -> u32 {
        1u32.checked_shl((MAX_PREFIX_V4 - self.prefix()) as u32)
            .unwrap_or(0)
    }

    /// Whether `self` is contained within `other`.
    pub fn is_subnet_of(&self, other: &str) -> Result<bool> {
        let other = Subnet::parse(other)?;
        Ok(other.prefix() <= self.prefix() && other.net.contains(self.net.ip()))
    }

    /// Generates the CIDR-qualified address at `index` within this block.
    ///
    /// `index` must fall in `1..max_hosts()`; a `/32` block has no valid
    /// index (`max_hosts() == 1`, so every index is refused).
    pub fn generate_host_ip(&self, index: u32) -> Result<String> {
        let max_hosts = self.max_hosts();
        if index < 1 || max_hosts <= 1 || index >= max_hosts {
            return Err(Error::Network(format!(
                "index {index} out of range for subnet {} (max_hosts={max_hosts})",
                self.cidr()
            )));
        }
        let base: u32 = self.net.network().into();
        let host = Ipv4Addr::from(base.wrapping_add(index));
        Ok(format!("{host}/{}", self.prefix()))
    }
}

/// A parsed `ip/prefix` address, as stored alongside a Nic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    cidr: String,
    ip: Ipv4Addr,
    prefix: u8,
}

impl Addr {
    pub fn parse(cidr: &str) -> Result<Self> {
        let net = Ipv4Network::from_str(cidr)
            .map_err(|e| Error::Network(format!("invalid address {cidr}: {e}")))?;
        Ok(Self {
            cidr: cidr.to_string(),
            ip: net.ip(),
            prefix: net.prefix(),
        })
    }

    pub fn addr_cidr(&self) -> &str {
        &self.cidr
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}
