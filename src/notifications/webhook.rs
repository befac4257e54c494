use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{AlertNotifier, NotifyError};
use crate::db::entities::{alert, tracked_api};
use crate::db::enums::{AlertType, ApiStatus, Severity};

/// POSTs every wanted alert as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    notify_on: Vec<AlertType>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    alert_id: i32,
    api_id: i32,
    api_name: &'a str,
    api_status: ApiStatus,
    alert_type: AlertType,
    severity: Severity,
    title: &'a str,
    description: Option<&'a str>,
    created_at: DateTime<Utc>,
}

impl WebhookNotifier {
    pub fn new(url: &str, notify_on: Vec<AlertType>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            notify_on,
        })
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(
        &self,
        api: &tracked_api::Model,
        alert: &alert::Model,
    ) -> Result<(), NotifyError> {
        if !self.notify_on.is_empty() && !self.notify_on.contains(&alert.alert_type) {
            return Ok(());
        }

        let payload = WebhookPayload {
            alert_id: alert.id,
            api_id: api.id,
            api_name: &api.name,
            api_status: api.current_status,
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: &alert.title,
            description: alert.description.as_deref(),
            created_at: alert.created_at,
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(NotifyError::SendFailed(format!(
                "Webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }
        Ok(())
    }
}
