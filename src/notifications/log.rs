use async_trait::async_trait;
use tracing::info;

use super::{AlertNotifier, NotifyError};
use crate::db::entities::{alert, tracked_api};

/// Writes alerts to the log and nowhere else.
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(
        &self,
        api: &tracked_api::Model,
        alert: &alert::Model,
    ) -> Result<(), NotifyError> {
        info!(
            api_id = api.id,
            alert_id = alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            title = %alert.title,
            "Alert opened."
        );
        Ok(())
    }
}
