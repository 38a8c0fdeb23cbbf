use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::{Notice, SweepReport};
use shared_config::AppConfig;

/// Message pushed to waiting-room displays and monitoring subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayUpdate {
    pub schedule_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    pub notice: Notice,
}

#[derive(Debug, Clone)]
pub struct SweepWorkerConfig {
    pub worker_id: String,
    pub interval_seconds: u64,
}

impl SweepWorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            worker_id: "sweeper-1".to_string(),
            interval_seconds: config.sweep_interval_seconds.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepStats {
    pub runs: u64,
    pub failed_runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_report: Option<SweepReport>,
}
