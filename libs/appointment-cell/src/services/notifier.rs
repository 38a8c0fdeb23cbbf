// libs/appointment-cell/src/services/notifier.rs
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::models::Notice;

/// Outbound notification channel. Content delivery lives outside the engine;
/// only the trigger points are raised here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice) -> anyhow::Result<()>;
}

/// Fire-and-forget dispatch: failures are logged and swallowed so a committed
/// transition is never reported as failed because a notification was lost.
pub async fn dispatch(notifier: &dyn Notifier, notice: Notice) {
    debug!("Dispatching notice {:?}", notice);
    if let Err(e) = notifier.notify(notice).await {
        warn!("Notification dispatch failed: {:#}", e);
    }
}

/// Writes notices to the log. Default when no delivery channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: Notice) -> anyhow::Result<()> {
        info!(target: "notifications", patient_id = %notice.patient_id(), "{:?}", notice);
        Ok(())
    }
}

/// Keeps every notice in memory; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records and then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) -> anyhow::Result<()> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice);
        if self.fail {
            anyhow::bail!("notification channel unavailable");
        }
        Ok(())
    }
}
