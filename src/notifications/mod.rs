//! Delivery of newly opened alerts to the outside world.
//!
//! Notifiers run after the alert is committed. A failed delivery is logged and
//! never feeds back into engine state.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::db::entities::{alert, tracked_api};
use crate::db::enums::AlertType;

pub mod log;
pub mod webhook;

pub use log::LogNotifier;
pub use webhook::WebhookNotifier;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    /// Alert types to deliver. Empty means every type.
    pub notify_on: Vec<AlertType>,
}

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(
        &self,
        api: &tracked_api::Model,
        alert: &alert::Model,
    ) -> Result<(), NotifyError>;
}

/// Picks the webhook notifier when a URL is configured, the log-only one
/// otherwise.
pub fn build_notifier(config: &NotificationConfig) -> Result<Arc<dyn AlertNotifier>, NotifyError> {
    match config.webhook_url.as_deref().filter(|url| !url.trim().is_empty()) {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url, config.notify_on.clone())?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_webhook_url_falls_back_to_log_notifier() {
        let config = NotificationConfig {
            webhook_url: Some("  ".to_string()),
            notify_on: vec![],
        };
        assert!(build_notifier(&config).is_ok());
    }

    #[test]
    fn notify_on_parses_alert_type_names() {
        let config: NotificationConfig =
            toml::from_str("notify_on = [\"DOWN\", \"RESPONSE_CHANGE\"]").unwrap();
        assert_eq!(config.notify_on, vec![AlertType::Down, AlertType::ResponseChange]);
    }
}
