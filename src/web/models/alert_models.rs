use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PageResponse;
use crate::db::entities::alert;
use crate::db::enums::{AlertType, Severity};
use crate::db::store::{AlertFilter, PageRequest};

#[derive(Debug, Default, Deserialize)]
pub struct AlertListQuery {
    pub resolved: Option<bool>,
    pub page: Option<u64>,
    pub size: Option<u64>,
}

impl AlertListQuery {
    pub fn filter(&self) -> AlertFilter {
        AlertFilter::from_resolved_flag(self.resolved)
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.size)
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    pub id: i32,
    pub api_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AlertResponse {
    pub fn new(alert: alert::Model, api_name: Option<String>) -> Self {
        Self {
            id: alert.id,
            api_id: alert.api_id,
            api_name,
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: alert.title,
            description: alert.description,
            is_resolved: alert.is_resolved,
            resolved_at: alert.resolved_at,
            created_at: alert.created_at,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AlertListResponse {
    #[serde(flatten)]
    pub page: PageResponse<AlertResponse>,
    pub unread_count: u64,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}
