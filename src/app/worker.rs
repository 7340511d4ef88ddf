//! Background worker driving the event scheduler.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::scheduler::EventScheduler;

/// Scheduler worker configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the worker is started at all
    pub enabled: bool,
    /// Pause between passes that found less than a full batch
    pub poll_interval: Duration,
    /// Maximum wallet addresses claimed per pass
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_millis(1000),
            batch_size: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let enabled = env::var("ENABLE_SCHEDULER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.enabled);
        let poll_interval = env::var("SCHEDULER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let batch_size = env::var("SCHEDULER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(defaults.batch_size);

        Self {
            enabled,
            poll_interval,
            batch_size,
        }
    }
}

/// Repeatedly claims due wallet addresses until shut down
pub struct SchedulerWorker {
    scheduler: Arc<EventScheduler>,
    config: SchedulerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl SchedulerWorker {
    #[must_use]
    pub fn new(
        scheduler: Arc<EventScheduler>,
        config: SchedulerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scheduler,
            config,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Event scheduler started"
        );

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let idle = match self.scheduler.trigger_events(self.config.batch_size).await {
                // A full batch means more rows are probably due
                Ok(processed) => (processed as i64) < self.config.batch_size,
                Err(e) => {
                    error!(error = %e, "Event scheduler pass failed");
                    true
                }
            };
            if !idle {
                debug!("Full batch processed, polling again");
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Event scheduler stopped");
    }
}

/// Spawn the scheduler worker. Send `true` on the returned channel to stop it.
pub fn spawn_scheduler(
    scheduler: Arc<EventScheduler>,
    config: SchedulerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = SchedulerWorker::new(scheduler, config, shutdown_rx);
    let handle = tokio::spawn(worker.run());
    (handle, shutdown_tx)
}
