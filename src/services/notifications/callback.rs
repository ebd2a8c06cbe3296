use anyhow::Context;
use async_trait::async_trait;

use super::PaymentNotifier;
use crate::models::PaymentEvent;

/// Posts each event as JSON to the booking application's callback endpoint.
pub struct CallbackNotifier {
    url: String,
    client: reqwest::Client,
}

impl CallbackNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PaymentNotifier for CallbackNotifier {
    async fn notify(&self, event: &PaymentEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .context("failed to deliver payment callback")?
            .error_for_status()
            .context("payment callback endpoint returned error")?;

        Ok(())
    }
}
