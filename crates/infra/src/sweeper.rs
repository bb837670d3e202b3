//! Background expiry sweep.
//!
//! Periodically converts stale Pending reservations to Expired and restores
//! their held stock by invoking the manager's cleanup operation. Correctness
//! under races with live reservations comes from the store's version stamps,
//! so a failed sweep pass is simply retried on the next tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use forgemarket_core::CancellationFlag;

use crate::manager::StockReservationManager;
use crate::store::InventoryStore;

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct ExpirySweeperConfig {
    /// How often to run a cleanup pass.
    pub interval: Duration,
    /// Only expire holds whose deadline passed at least this long ago.
    pub grace: Option<Duration>,
    /// Name for logging.
    pub name: String,
}

impl Default for ExpirySweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace: None,
            name: "expiry-sweeper".to_string(),
        }
    }
}

impl ExpirySweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweeperStats {
    pub sweeps_run: u64,
    pub rows_expired: u64,
    pub failures: u64,
}

/// Handle to control a running sweeper.
#[derive(Debug)]
pub struct ExpirySweeperHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl ExpirySweeperHandle {
    /// Request graceful shutdown and wait for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Get current sweeper statistics.
    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Spawn the expiry sweep as a background task.
pub fn spawn_expiry_sweeper<S>(
    manager: Arc<StockReservationManager<S>>,
    config: ExpirySweeperConfig,
) -> ExpirySweeperHandle
where
    S: InventoryStore + 'static,
    S::Tx: 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let stats = Arc::new(Mutex::new(SweeperStats::default()));
    let stats_task = Arc::clone(&stats);

    let join = tokio::spawn(async move {
        info!(sweeper = %config.name, interval_ms = config.interval.as_millis() as u64, "expiry sweeper started");

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let cancel = CancellationFlag::new();
                    match manager.cleanup_expired_reservations(config.grace, &cancel).await {
                        Ok(processed) => {
                            let mut s = stats_task.lock().unwrap();
                            s.sweeps_run += 1;
                            s.rows_expired += processed as u64;
                            drop(s);
                            if processed > 0 {
                                info!(sweeper = %config.name, processed, "expiry sweep pass completed");
                            } else {
                                debug!(sweeper = %config.name, "expiry sweep pass found nothing to do");
                            }
                        }
                        Err(err) => {
                            let mut s = stats_task.lock().unwrap();
                            s.sweeps_run += 1;
                            s.failures += 1;
                            drop(s);
                            warn!(sweeper = %config.name, error = %err, "expiry sweep pass failed");
                        }
                    }
                }
            }
        }

        info!(sweeper = %config.name, "expiry sweeper stopped");
    });

    ExpirySweeperHandle {
        shutdown: shutdown_tx,
        join: Some(join),
        stats,
    }
}
