use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use appointment_cell::{ClinicEngine, SweepReport};

use crate::{RuntimeError, SweepStats, SweepWorkerConfig};

/// Periodic driver for the engine's deadline rules: stale waitlist offers,
/// unpaid add-ons and auto no-shows. Each rule commits per schedule, so a pass
/// interrupted by shutdown leaves no half-applied schedule behind.
pub struct SweepWorker {
    config: SweepWorkerConfig,
    engine: Arc<ClinicEngine>,
    stats: Arc<RwLock<SweepStats>>,
    is_shutdown: RwLock<bool>,
    shutdown_signal: Notify,
}

impl SweepWorker {
    pub fn new(config: SweepWorkerConfig, engine: Arc<ClinicEngine>) -> Self {
        Self {
            config,
            engine,
            stats: Arc::new(RwLock::new(SweepStats::default())),
            is_shutdown: RwLock::new(false),
            shutdown_signal: Notify::new(),
        }
    }

    /// Runs until `shutdown` is called.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), RuntimeError> {
        info!(
            "Starting sweep worker {} (every {}s)",
            self.config.worker_id, self.config.interval_seconds
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *self.is_shutdown.read().await {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Sweep worker {} pass failed: {}", self.config.worker_id, e);
                    }
                }
                _ = self.shutdown_signal.notified() => {
                    debug!("Sweep worker {} received shutdown signal", self.config.worker_id);
                    break;
                }
            }
        }

        info!("Sweep worker {} stopped", self.config.worker_id);
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Initiating shutdown for sweep worker {}", self.config.worker_id);
        *self.is_shutdown.write().await = true;
        self.shutdown_signal.notify_one();
    }

    /// One sweep pass.
    pub async fn run_once(&self) -> Result<SweepReport, RuntimeError> {
        let started = Instant::now();
        let result = self.engine.run_sweep().await;

        let mut stats = self.stats.write().await;
        stats.runs += 1;
        stats.last_run_at = Some(Utc::now());

        let report = match result {
            Ok(report) => {
                stats.last_report = Some(report.clone());
                report
            }
            Err(e) => {
                stats.failed_runs += 1;
                return Err(e.into());
            }
        };
        drop(stats);

        debug!(
            "Sweep pass finished in {}ms ({} changes)",
            started.elapsed().as_millis(),
            report.expired_offers.len()
                + report.promoted_entries.len()
                + report.expired_add_ons.len()
                + report.auto_no_shows.len()
        );
        Ok(report)
    }

    pub async fn stats(&self) -> SweepStats {
        self.stats.read().await.clone()
    }
}
