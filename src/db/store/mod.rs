//! The History Store: the narrow persistence contract the monitoring engine
//! reads and writes through.
//!
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! database-less deployments, and [`SeaOrmStore`] backed by PostgreSQL.
//! Every write that results from one probe goes through
//! [`HistoryStore::commit_check`] so that the status update, the health-check
//! record and the alert mutations land together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use serde::Deserialize;
use thiserror::Error;

use crate::db::entities::{alert, health_check, tracked_api};
use crate::db::enums::{AlertType, ApiStatus, Severity};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::SeaOrmStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("History store unavailable: {0}")]
    Unavailable(String),
    #[error("Write conflict: {0}")]
    Conflict(String),
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::ConnectionAcquire(e) => StoreError::Unavailable(e.to_string()),
            DbErr::Conn(e) => StoreError::Unavailable(e.to_string()),
            DbErr::RecordNotUpdated => {
                StoreError::Conflict("record was modified concurrently".to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Owner-editable fields of a tracked API, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub name: String,
    pub base_url: String,
    pub documentation_url: Option<String>,
    pub health_check_url: Option<String>,
    pub http_method: String,
    pub expected_status: i32,
    pub check_interval_seconds: i32,
    pub is_active: bool,
}

impl ApiSettings {
    pub fn from_model(api: &tracked_api::Model) -> Self {
        Self {
            name: api.name.clone(),
            base_url: api.base_url.clone(),
            documentation_url: api.documentation_url.clone(),
            health_check_url: api.health_check_url.clone(),
            http_method: api.http_method.clone(),
            expected_status: api.expected_status,
            check_interval_seconds: api.check_interval_seconds,
            is_active: api.is_active,
        }
    }
}

/// The health-check row to append for one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHealthCheck {
    pub http_status: Option<i32>,
    pub response_time_ms: i32,
    pub is_up: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

impl AlertDraft {
    /// Whether applying this draft to `open` would change it.
    pub fn differs_from(&self, open: &alert::Model) -> bool {
        open.severity != self.severity
            || open.title != self.title
            || open.description.as_deref() != Some(self.description.as_str())
    }
}

/// A single alert-state change decided by the alert engine.
///
/// `Open` is keyed by (api, alert type, unresolved). When an open alert of
/// that type already exists it takes the draft's severity, title and
/// description and is reported as updated; writing an identical draft again
/// changes nothing. Otherwise a new alert is created. Stores apply it inside
/// the same atomic write as the rest of the commit (the Postgres store looks
/// the open alert up under the API row lock, backed by the partial unique
/// index). `Resolve` is a no-op when nothing of that type is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertMutation {
    Open(AlertDraft),
    Resolve(AlertType),
}

/// Everything one completed probe writes.
#[derive(Debug, Clone)]
pub struct CheckCommit {
    pub api_id: i32,
    pub checked_at: DateTime<Utc>,
    pub status: ApiStatus,
    pub consecutive_failures: i32,
    /// Replaces the stored fingerprint when `Some`.
    pub fingerprint: Option<String>,
    /// Replaces the stored next-due time when `Some`. On-demand checks leave
    /// the regular cadence untouched.
    pub next_check_at: Option<DateTime<Utc>>,
    pub record: NewHealthCheck,
    pub alerts: Vec<AlertMutation>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitReceipt {
    pub record: Option<health_check::Model>,
    pub opened: Vec<alert::Model>,
    pub updated: Vec<alert::Model>,
    pub resolved: Vec<alert::Model>,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Applied(CommitReceipt),
    /// The API was removed before the commit; nothing was written.
    ApiMissing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertFilter {
    #[default]
    All,
    Resolved,
    Unresolved,
}

impl AlertFilter {
    pub fn from_resolved_flag(resolved: Option<bool>) -> Self {
        match resolved {
            None => AlertFilter::All,
            Some(true) => AlertFilter::Resolved,
            Some(false) => AlertFilter::Unresolved,
        }
    }

    pub fn matches(self, alert: &alert::Model) -> bool {
        match self {
            AlertFilter::All => true,
            AlertFilter::Resolved => alert.is_resolved,
            AlertFilter::Unresolved => !alert.is_resolved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
}

impl PageRequest {
    pub const DEFAULT_SIZE: u64 = 20;
    pub const MAX_SIZE: u64 = 200;

    pub fn new(page: Option<u64>, size: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(0),
            size: size
                .unwrap_or(Self::DEFAULT_SIZE)
                .clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page * self.size) as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenAlertCounts {
    pub total: u64,
    pub critical: u64,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// All APIs the scheduler should pick up at start-up.
    async fn load_active_apis(&self) -> Result<Vec<tracked_api::Model>, StoreError>;

    async fn get_api(&self, api_id: i32) -> Result<Option<tracked_api::Model>, StoreError>;

    async fn list_apis(&self, user_id: i32) -> Result<Vec<tracked_api::Model>, StoreError>;

    async fn insert_api(
        &self,
        user_id: i32,
        settings: ApiSettings,
        next_check_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<tracked_api::Model, StoreError>;

    /// Applies owner edits. When `clear_deprecation` is set and the API is
    /// currently DEPRECATED, its status drops back to UNKNOWN and the open
    /// DEPRECATION alert is resolved in the same write.
    async fn update_api(
        &self,
        api_id: i32,
        settings: ApiSettings,
        clear_deprecation: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<tracked_api::Model>, StoreError>;

    /// Removes the API together with its health checks and alerts.
    async fn delete_api(&self, api_id: i32) -> Result<bool, StoreError>;

    async fn commit_check(&self, commit: CheckCommit) -> Result<CommitOutcome, StoreError>;

    /// Health checks for one API, newest first.
    async fn health_history(
        &self,
        api_id: i32,
        page: PageRequest,
    ) -> Result<Paged<health_check::Model>, StoreError>;

    /// Alerts for one owner, newest first.
    async fn list_alerts(
        &self,
        user_id: i32,
        filter: AlertFilter,
        page: PageRequest,
    ) -> Result<Paged<alert::Model>, StoreError>;

    async fn alerts_for_api(&self, api_id: i32) -> Result<Vec<alert::Model>, StoreError>;

    async fn open_alert_counts(&self, user_id: i32) -> Result<OpenAlertCounts, StoreError>;

    /// Owner-initiated resolution. Idempotent; `None` when the alert does not
    /// exist or belongs to someone else.
    async fn resolve_alert(
        &self,
        user_id: i32,
        alert_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<alert::Model>, StoreError>;
}
