use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use appointment_cell::{Notice, Notifier};

use crate::{DisplayUpdate, RuntimeError};

pub type DisplaySender = broadcast::Sender<String>;
pub type DisplayReceiver = broadcast::Receiver<String>;

const SCHEDULE_CHANNEL_CAPACITY: usize = 100;
const GLOBAL_CHANNEL_CAPACITY: usize = 1000;

/// Fans notices out to waiting-room displays subscribed per schedule, plus
/// one global feed for monitoring. Messages are JSON-encoded `DisplayUpdate`s.
pub struct DisplayBroadcaster {
    channels: Arc<RwLock<HashMap<Uuid, DisplaySender>>>,
    global_sender: DisplaySender,
}

impl DisplayBroadcaster {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);

        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            global_sender,
        }
    }

    /// Join the feed for one schedule, creating the channel on first use.
    pub async fn subscribe(&self, schedule_id: Uuid) -> DisplayReceiver {
        let mut channels = self.channels.write().await;
        let sender = channels.entry(schedule_id).or_insert_with(|| {
            debug!("Created display channel for schedule {}", schedule_id);
            broadcast::channel(SCHEDULE_CHANNEL_CAPACITY).0
        });
        sender.subscribe()
    }

    pub fn subscribe_global(&self) -> DisplayReceiver {
        self.global_sender.subscribe()
    }

    pub async fn remove_channel(&self, schedule_id: Uuid) {
        let mut channels = self.channels.write().await;
        channels.remove(&schedule_id);
        debug!("Removed display channel for schedule {}", schedule_id);
    }

    pub async fn get_active_channels(&self) -> Vec<Uuid> {
        let channels = self.channels.read().await;
        channels.keys().cloned().collect()
    }

    /// Drop channels nobody listens to any more. Returns how many were removed.
    pub async fn prune_idle_channels(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    pub async fn publish(&self, notice: Notice) -> Result<(), RuntimeError> {
        let update = DisplayUpdate {
            schedule_id: notice.schedule_id(),
            sent_at: Utc::now(),
            notice,
        };
        let message = serde_json::to_string(&update)?;

        if let Some(schedule_id) = update.schedule_id {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(&schedule_id) {
                // No receivers is not an error; the display may be offline.
                if sender.send(message.clone()).is_err() {
                    debug!("No display listening on schedule {}", schedule_id);
                }
            }
        }

        if self.global_sender.send(message).is_err() {
            debug!("No global display subscribers");
        }
        Ok(())
    }
}

impl Default for DisplayBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for DisplayBroadcaster {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            global_sender: self.global_sender.clone(),
        }
    }
}

#[async_trait]
impl Notifier for DisplayBroadcaster {
    async fn notify(&self, notice: Notice) -> anyhow::Result<()> {
        Ok(self.publish(notice).await?)
    }
}
