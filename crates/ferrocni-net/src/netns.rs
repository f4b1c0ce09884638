//! Network-namespace switching for the calling OS thread.
//!
//! A bind-mounted netns appears at `/var/run/netns/<name>` or, for a
//! container's own sandbox, at the path `CNI_NETNS` points to directly. Both
//! forms are just paths to an `nsfs` inode, so `enter`/`restore` don't care
//! which one they were given.

use ferrocni_core::{Error, Result};
use nix::sched::{setns, CloneFlags};
use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;

pub const PATH_NAMESPACE: &str = "/var/run/netns";

/// Resolves a bare netns name to its bind-mount path; leaves an absolute
/// path (as CNI passes for a sandbox netns) untouched.
pub fn resolve(netns: &str) -> String {
    if netns.starts_with('/') {
        netns.to_string()
    } else {
        format!("{PATH_NAMESPACE}/{netns}")
    }
}

/// Runs `f` with the calling OS thread switched into the netns at `path`,
/// restoring the thread's original netns before returning, success or not.
///
/// Must run on a thread nothing else depends on afterwards: `setns` affects
/// only the calling OS thread, but that thread now carries the target netns
/// for every socket it opens until restored. The blocking-thread wrapper in
/// `rtnetlink_impl` exists for exactly this reason.
pub fn with_netns<F, T>(path: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let target = File::open(path)
        .map_err(|e| Error::Network(format!("open netns {path}: {e}")))?;
    let original = File::open("/proc/self/ns/net")
        .map_err(|e| Error::Network(format!("open current netns: {e}")))?;

    setns(target.as_fd(), CloneFlags::CLONE_NEWNET)
        .map_err(|e| Error::Network(format!("setns {path}: {e}")))?;

    let result = f();

    if let Err(e) = setns(original.as_fd(), CloneFlags::CLONE_NEWNET) {
        tracing::error!("failed to restore original netns: {e}");
    }

    result
}

pub fn exists(netns: &str) -> bool {
    Path::new(&resolve(netns)).exists()
}
