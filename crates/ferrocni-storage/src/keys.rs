//! KV key layout for the per-node persistent state index.

pub const ROOT: &str = "/ohno";
pub const NETNS_PATH_PREFIX: &str = "/var/run/netns/";

/// Strips a bind-mount path down to the bare netns name, the same
/// normalization a sandbox path and a `/var/run/netns/<name>` path must
/// agree on to key the same KV entry.
pub fn simple_netns(netns: &str) -> String {
    match netns.strip_prefix(NETNS_PATH_PREFIX) {
        Some(rest) => rest.to_string(),
        None => netns.rsplit('/').next().unwrap_or(netns).to_string(),
    }
}

pub fn netns_key(node: &str, pod: &str) -> String {
    format!("{ROOT}/{node}/pod/{pod}/netns")
}

pub fn single_pod_key(node: &str, netns: &str) -> String {
    format!("{ROOT}/{node}/netns/{}/pod", simple_netns(netns))
}

pub fn all_pods_key(node: &str) -> String {
    format!("{ROOT}/{node}/pod")
}

pub fn nic_key(node: &str, pod: &str) -> String {
    format!("{ROOT}/{node}/pod/{pod}/nic")
}

pub fn addr_key(node: &str, pod: &str, nic: &str) -> String {
    format!("{ROOT}/{node}/pod/{pod}/nic/{nic}/addr")
}

pub fn route_key(node: &str, pod: &str, nic: &str) -> String {
    format!("{ROOT}/{node}/pod/{pod}/nic/{nic}/route")
}

/// One node's VTEP record, published once a vxlan dataplane brings its
/// local VTEP up; peers read it to build their route/neigh/fdb triples.
pub fn vtep_key(node: &str) -> String {
    format!("{ROOT}/{node}/vtep")
}

pub fn route_value(dest: &str, via: &str, dev: &str) -> String {
    use ferrocni_core::cni_wire::SEPARATOR;
    format!("{dest}{SEPARATOR}{via}{SEPARATOR}{dev}")
}

pub fn vtep_value(addr: &str, mac: &str) -> String {
    use ferrocni_core::cni_wire::SEPARATOR;
    format!("{addr}{SEPARATOR}{mac}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_netns_strips_bind_mount_path() {
        assert_eq!(simple_netns("/var/run/netns/cni-1234"), "cni-1234");
        assert_eq!(simple_netns("cni-1234"), "cni-1234");
        assert_eq!(simple_netns("/proc/123/ns/net"), "net");
    }
}
