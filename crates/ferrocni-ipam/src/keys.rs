//! KV key layout for the IPAM allocator.

pub const SUBNET_KEY: &str = "/ohno/subnets";
pub const ADDRESS_KEY: &str = "/ohno/address";

pub fn node_subnet_key(node: &str) -> String {
    format!("{SUBNET_KEY}/{node}")
}

pub fn node_address_key(node: &str) -> String {
    format!("{ADDRESS_KEY}/{node}")
}
