//! `Node` object watch/lookup over the Kubernetes API: internalIP and
//! podCIDR for this node and its peers.

pub mod clusterview;

pub use clusterview::{ClusterView, KubeClusterView, NodeInfo};
