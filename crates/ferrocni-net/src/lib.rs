//! Netlink capability: native link/address/route/neigh/fdb management via
//! `rtnetlink`, with namespace switching for container-side interfaces.

pub mod hostenv;
pub mod netlink;
pub mod netns;
pub mod rtnetlink_impl;

pub use hostenv::HostEnv;
pub use netlink::Netlink;
pub use rtnetlink_impl::RtNetlink;
