//! A dataplane strategy owns everything the node needs beyond the CNI
//! lifecycle itself: host-gw/vxlan poll the cluster on an interval and
//! reconcile routes/neighs/fdbs against it, evpn only needs a one-shot
//! device setup.

use async_trait::async_trait;
use ferrocni_core::Result;

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Runs once before the first tick (or, for a non-polling strategy,
    /// instead of ticking at all).
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Reconciles the dataplane against the cluster's current state.
    async fn tick(&self, current_node: &str) -> Result<()>;

    /// Runs once when the daemon is shutting down.
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }

    /// `false` for a strategy whose `setup` is the entire job (evpn).
    fn needs_polling(&self) -> bool {
        true
    }
}
