// libs/appointment-cell/src/context.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared_config::ClinicRules;

use crate::clock::Clock;
use crate::services::notifier::{dispatch, Notifier};
use crate::services::store::ClinicStore;
use crate::models::Notice;

/// Collaborators shared by every service in the cell.
#[derive(Clone)]
pub struct ClinicContext {
    pub store: Arc<ClinicStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub rules: Arc<ClinicRules>,
}

impl ClinicContext {
    pub fn new(
        store: Arc<ClinicStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        rules: ClinicRules,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            rules: Arc::new(rules),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Post-commit notification. Never fails the caller.
    pub async fn notify(&self, notice: Notice) {
        dispatch(self.notifier.as_ref(), notice).await;
    }
}
