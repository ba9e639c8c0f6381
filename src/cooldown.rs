//! Countdown gate triggered by quota exhaustion.
//!
//! The remaining seconds live in a `watch` channel so the loop can both read
//! them cheaply and await the moment they reach zero.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Cooldown {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new()
    }
}

impl Cooldown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn remaining(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.remaining() > 0
    }

    /// Starts (or extends) the countdown; an active countdown keeps the larger value.
    ///
    /// Must be called from within a tokio runtime: the ticker is a spawned task.
    pub fn start(&self, secs: u64) {
        if secs == 0 {
            return;
        }
        let was_idle = !self.is_active();
        self.tx.send_modify(|r| *r = (*r).max(secs));
        info!(secs = self.remaining(), "cooldown started");
        if was_idle {
            self.spawn_ticker();
        }
    }

    fn spawn_ticker(&self) {
        let tx = Arc::clone(&self.tx);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut cleared = false;
                tx.send_modify(|r| {
                    *r = r.saturating_sub(1);
                    cleared = *r == 0;
                });
                if cleared {
                    debug!("cooldown cleared");
                    break;
                }
            }
        });
    }

    /// Resolves once the countdown reaches zero (immediately if idle).
    pub async fn wait_clear(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|r| *r == 0).await;
    }
}
