//! Persistent index of pod/netns/nic/addr/route state, keyed in the KV
//! store so a restarted daemon can reconstruct what it owns.

pub mod keys;
pub mod storage;

pub use storage::Storage;
