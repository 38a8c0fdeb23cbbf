use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use appointment_cell::{Notice, Notifier};

/// Delivers every notice to each configured channel. One failing channel does
/// not stop delivery to the rest; the first failure is reported afterwards.
#[derive(Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn Notifier>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notice: Notice) -> anyhow::Result<()> {
        let mut first_error = None;
        for (index, target) in self.targets.iter().enumerate() {
            if let Err(e) = target.notify(notice.clone()).await {
                warn!("Notification channel {} failed: {:#}", index, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
