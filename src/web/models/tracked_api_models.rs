use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert_models::AlertResponse;
use crate::db::entities::{health_check, tracked_api};
use crate::db::enums::ApiStatus;
use crate::monitoring::CheckOutcome;

// Every field is optional so that missing values surface as validation
// errors rather than JSON rejections.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrackedApiRequest {
    #[serde(alias = "apiName")]
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub health_check_url: Option<String>,
    pub documentation_url: Option<String>,
    pub http_method: Option<String>,
    pub expected_status: Option<i32>,
    pub check_interval: Option<i32>,
    pub is_active: Option<bool>,
}

// Partial update: absent fields keep their current value. An empty URL
// string clears an optional URL.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTrackedApiRequest {
    #[serde(alias = "apiName")]
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub health_check_url: Option<String>,
    pub documentation_url: Option<String>,
    pub http_method: Option<String>,
    pub expected_status: Option<i32>,
    pub check_interval: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TrackedApiResponse {
    pub id: i32,
    pub name: String,
    pub base_url: String,
    pub health_check_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    pub http_method: String,
    pub expected_status: i32,
    pub check_interval: i32,
    pub current_status: ApiStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<tracked_api::Model> for TrackedApiResponse {
    fn from(api: tracked_api::Model) -> Self {
        Self {
            health_check_url: api.effective_health_check_url().to_string(),
            id: api.id,
            name: api.name,
            base_url: api.base_url,
            documentation_url: api.documentation_url,
            http_method: api.http_method,
            expected_status: api.expected_status,
            check_interval: api.check_interval_seconds,
            current_status: api.current_status,
            last_checked: api.last_checked,
            next_check_at: api.next_check_at,
            consecutive_failures: api.consecutive_failures,
            is_active: api.is_active,
            created_at: api.created_at,
            updated_at: api.updated_at,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub id: i64,
    pub checked_at: DateTime<Utc>,
    pub http_status: Option<i32>,
    pub response_time_ms: i32,
    pub is_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl From<health_check::Model> for HealthCheckResponse {
    fn from(check: health_check::Model) -> Self {
        Self {
            id: check.id,
            checked_at: check.checked_at,
            http_status: check.http_status,
            response_time_ms: check.response_time_ms,
            is_up: check.is_up,
            error_kind: check.error_kind,
            error_message: check.error_message,
            fingerprint: check.fingerprint,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CheckNowResponse {
    pub api_id: i32,
    pub current_status: ApiStatus,
    pub consecutive_failures: u32,
    pub check: Option<HealthCheckResponse>,
    pub opened_alerts: Vec<AlertResponse>,
    pub updated_alerts: Vec<AlertResponse>,
    pub resolved_alerts: Vec<AlertResponse>,
}

impl From<CheckOutcome> for CheckNowResponse {
    fn from(outcome: CheckOutcome) -> Self {
        Self {
            api_id: outcome.api_id,
            current_status: outcome.classification.status,
            consecutive_failures: outcome.classification.consecutive_failures,
            check: outcome.record.map(HealthCheckResponse::from),
            opened_alerts: outcome
                .opened_alerts
                .into_iter()
                .map(|a| AlertResponse::new(a, None))
                .collect(),
            updated_alerts: outcome
                .updated_alerts
                .into_iter()
                .map(|a| AlertResponse::new(a, None))
                .collect(),
            resolved_alerts: outcome
                .resolved_alerts
                .into_iter()
                .map(|a| AlertResponse::new(a, None))
                .collect(),
        }
    }
}
