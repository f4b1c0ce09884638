//! Runs a [`Strategy`] to completion: `setup` once, then either a
//! tick/sleep loop for a polling strategy or an idle wait for a one-shot
//! one, then `teardown` on stop.

use crate::strategy::Strategy;
use ferrocni_core::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

pub struct Scheduler {
    strategy: Arc<dyn Strategy>,
    node_name: String,
    interval: Duration,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(strategy: Arc<dyn Strategy>, node_name: impl Into<String>) -> Self {
        Self {
            strategy,
            node_name: node_name.into(),
            interval: DEFAULT_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn start(&mut self) -> Result<()> {
        self.strategy.setup().await?;

        if !self.strategy.needs_polling() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let strategy = self.strategy.clone();
        let node_name = self.node_name.clone();
        let running = self.running.clone();
        let interval = self.interval;

        self.worker = Some(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Err(e) = strategy.tick(&node_name).await {
                    tracing::warn!(error = %e, "reconciliation tick failed");
                }
                tokio::time::sleep(interval).await;
            }
        }));

        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.await.ok();
        }
        self.strategy.teardown().await
    }
}
