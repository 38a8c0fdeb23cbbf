use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use appointment_cell::{Notice, Notifier};

use crate::RuntimeError;

const WEBHOOK_TIMEOUT_SECONDS: u64 = 10;

/// Posts each notice as JSON to an external messaging service (SMS, push,
/// e-mail gateway). Message content is that service's concern.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, RuntimeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| RuntimeError::WebhookError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    #[instrument(skip(self, notice), fields(url = %self.url))]
    pub async fn deliver(&self, notice: &Notice) -> Result<(), RuntimeError> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| RuntimeError::WebhookError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::WebhookError(format!("{} returned {}: {}", self.url, status, body)));
        }

        debug!("Webhook accepted notice for patient {}", notice.patient_id());
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: Notice) -> anyhow::Result<()> {
        Ok(self.deliver(&notice).await?)
    }
}
