//! Wire types for the CNI process contract: the config JSON on stdin, the
//! environment-derived invocation parameters, and the result/error JSON on
//! stdout/stderr.

use crate::error::{cni_code, Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// The separator between `dest`/`via`/`dev` in an encoded route, and the
/// character a bridge name may not contain (so the two never collide).
pub const SEPARATOR: char = '-';
/// The separator joining tokens inside a KV scalar list.
pub const LIST_SEPARATOR: char = ',';

pub const CNI_VERSION: &str = "0.3.1";
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataplaneMode {
    #[serde(rename = "host-gw")]
    HostGw,
    Vxlan,
    Evpn,
}

impl std::fmt::Display for DataplaneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataplaneMode::HostGw => "host-gw",
            DataplaneMode::Vxlan => "vxlan",
            DataplaneMode::Evpn => "evpn",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamConfig {
    pub subnet: String,
    pub mode: DataplaneMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniConfig {
    pub cni_version: String,
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub bridge: String,
    pub log: String,
    pub log_level: String,
    #[serde(default = "default_ssl")]
    pub ssl: bool,
    pub ipam: IpamConfig,
}

fn default_ssl() -> bool {
    true
}

impl CniConfig {
    /// Non-empty bridge name that doesn't collide with the route-value
    /// separator.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.is_empty() {
            return Err(Error::Network("bridge name is empty".into()));
        }
        if self.bridge.contains(SEPARATOR) {
            return Err(Error::Network(format!(
                "bridge name can't contain '{SEPARATOR}'"
            )));
        }
        Ok(())
    }

    pub fn default_json() -> serde_json::Value {
        serde_json::json!({
            "cniVersion": CNI_VERSION,
            "name": "mynet",
            "type": "ferrocni",
            "bridge": "ferrobr0",
            "log": "/var/run/log/ferrocni.log",
            "logLevel": "info",
            "ssl": true,
            "ipam": { "subnet": "10.244.0.0/16", "mode": "host-gw" },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
    Check,
    Status,
    Gc,
    Version,
}

impl CniCommand {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "ADD" => Ok(CniCommand::Add),
            "DEL" => Ok(CniCommand::Del),
            "CHECK" => Ok(CniCommand::Check),
            "STATUS" => Ok(CniCommand::Status),
            "GC" => Ok(CniCommand::Gc),
            "VERSION" => Ok(CniCommand::Version),
            other => Err(Error::Env(format!("unknown CNI_COMMAND {other:?}"))),
        }
    }

    /// CHECK/STATUS/GC currently respond with a Not-Supported error.
    pub fn is_supported(&self) -> bool {
        !matches!(self, CniCommand::Check | CniCommand::Status | CniCommand::Gc)
    }
}

/// Invocation parameters taken from the `CNI_*` environment variables.
#[derive(Debug, Clone)]
pub struct CniEnv {
    pub command: CniCommand,
    pub container_id: String,
    pub netns: String,
    pub ifname: String,
}

impl CniEnv {
    pub fn from_process_env() -> Result<Self> {
        let command = std::env::var("CNI_COMMAND")
            .map_err(|_| Error::Env("CNI_COMMAND not set".into()))?;
        let command = CniCommand::parse(&command)?;

        let need = |name: &str| -> Result<String> {
            std::env::var(name).map_err(|_| Error::Env(format!("{name} not set")))
        };

        match command {
            CniCommand::Add | CniCommand::Del | CniCommand::Check => Ok(Self {
                command,
                container_id: need("CNI_CONTAINERID")?,
                netns: need("CNI_NETNS")?,
                ifname: need("CNI_IFNAME")?,
            }),
            CniCommand::Status | CniCommand::Gc | CniCommand::Version => Ok(Self {
                command,
                container_id: std::env::var("CNI_CONTAINERID").unwrap_or_default(),
                netns: std::env::var("CNI_NETNS").unwrap_or_default(),
                ifname: std::env::var("CNI_IFNAME").unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniIp {
    pub address: String,
    pub gateway: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CniInterface {
    pub name: String,
    pub sandbox: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: String,
    pub ips: Vec<CniIp>,
    pub interfaces: Vec<CniInterface>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniVersionResult {
    pub cni_version: String,
    pub supported_versions: Vec<String>,
}

impl Default for CniVersionResult {
    fn default() -> Self {
        Self {
            cni_version: CNI_VERSION.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniError {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    pub details: Option<String>,
}

impl CniError {
    pub fn from_error(cni_version: &str, err: &Error) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            code: err.cni_code(),
            msg: err.to_string(),
            details: None,
        }
    }

    pub fn not_supported(cni_version: &str, command: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            code: cni_code::NOT_SUPPORTED,
            msg: format!("{command} is not supported"),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bridge_with_separator() {
        let conf = CniConfig {
            cni_version: CNI_VERSION.into(),
            name: "mynet".into(),
            plugin_type: "ferrocni".into(),
            bridge: "br-0".into(),
            log: String::new(),
            log_level: "info".into(),
            ssl: true,
            ipam: IpamConfig {
                subnet: "10.244.0.0/16".into(),
                mode: DataplaneMode::HostGw,
            },
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn parses_config_json() {
        let raw = r#"{
            "cniVersion": "0.3.1",
            "name": "mynet",
            "type": "ferrocni",
            "bridge": "ferrobr0",
            "log": "/var/run/log/ferrocni.log",
            "logLevel": "info",
            "ssl": true,
            "ipam": { "subnet": "10.244.0.0/16", "mode": "host-gw" }
        }"#;
        let conf: CniConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(conf.ipam.mode, DataplaneMode::HostGw);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn command_not_supported_set() {
        assert!(!CniCommand::Check.is_supported());
        assert!(!CniCommand::Status.is_supported());
        assert!(!CniCommand::Gc.is_supported());
        assert!(CniCommand::Add.is_supported());
    }
}
