//! The operations the rest of the system calls: register, edit and delete
//! tracked APIs, on-demand checks, history, alerts and the dashboard summary.
//! Every call is scoped to the owning user.

use chrono::Utc;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::db::entities::{health_check, tracked_api};
use crate::db::enums::ApiStatus;
use crate::db::store::{ApiSettings, HistoryStore, PageRequest, Paged, StoreError};
use crate::monitoring::scheduler::{CheckOutcome, Scheduler, SchedulerConfig, SchedulerError};
use crate::web::models::PageResponse;
use crate::web::models::alert_models::{AlertListQuery, AlertListResponse, AlertResponse};
use crate::web::models::dashboard_models::DashboardSummary;
use crate::web::models::tracked_api_models::{CreateTrackedApiRequest, UpdateTrackedApiRequest};

pub const SUPPORTED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "HEAD"];
pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_URL_CHARS: usize = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} is not a valid http(s) URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("Expected status must be between 100 and 599, got {0}")]
    InvalidExpectedStatus(i32),
    #[error("Check interval of {interval}s is below the minimum of {min}s")]
    IntervalTooShort { interval: i32, min: i32 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Tracked API {0} not found")]
    ApiNotFound(i32),
    #[error("Alert {0} not found")]
    AlertNotFound(i32),
    #[error("Monitoring is shutting down")]
    ShuttingDown,
    #[error("History store error: {0}")]
    Persistence(#[from] StoreError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for MonitorError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ApiNotFound(id) | SchedulerError::Deleted(id) => {
                MonitorError::ApiNotFound(id)
            }
            SchedulerError::ShuttingDown => MonitorError::ShuttingDown,
            SchedulerError::Persistence(e) => MonitorError::Persistence(e),
            SchedulerError::ConcurrencyViolation(id) => {
                MonitorError::Internal(format!("check for API {id} could not be completed"))
            }
        }
    }
}

pub struct MonitorService {
    scheduler: Arc<Scheduler>,
    store: Arc<dyn HistoryStore>,
}

impl MonitorService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let store = scheduler.store().clone();
        Self { scheduler, store }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub async fn register(
        &self,
        user_id: i32,
        request: CreateTrackedApiRequest,
    ) -> Result<tracked_api::Model, MonitorError> {
        let rules = self.scheduler.config();
        let settings = validate(
            ApiSettings {
                name: request.name.unwrap_or_default(),
                base_url: request.base_url.unwrap_or_default(),
                documentation_url: request.documentation_url,
                health_check_url: request.health_check_url,
                http_method: request.http_method.unwrap_or_else(|| "GET".to_string()),
                expected_status: request.expected_status.unwrap_or(200),
                check_interval_seconds: request
                    .check_interval
                    .unwrap_or(rules.default_check_interval_seconds),
                is_active: request.is_active.unwrap_or(true),
            },
            rules,
        )?;
        Ok(self.scheduler.register(user_id, settings).await?)
    }

    pub async fn update(
        &self,
        user_id: i32,
        api_id: i32,
        request: UpdateTrackedApiRequest,
    ) -> Result<tracked_api::Model, MonitorError> {
        let existing = self.owned_api(user_id, api_id).await?;
        let mut settings = ApiSettings::from_model(&existing);
        if let Some(name) = request.name {
            settings.name = name;
        }
        if let Some(base_url) = request.base_url {
            settings.base_url = base_url;
        }
        if let Some(url) = request.health_check_url {
            settings.health_check_url = Some(url);
        }
        if let Some(url) = request.documentation_url {
            settings.documentation_url = Some(url);
        }
        if let Some(method) = request.http_method {
            settings.http_method = method;
        }
        if let Some(status) = request.expected_status {
            settings.expected_status = status;
        }
        if let Some(interval) = request.check_interval {
            settings.check_interval_seconds = interval;
        }
        if let Some(active) = request.is_active {
            settings.is_active = active;
        }
        let settings = validate(settings, self.scheduler.config())?;

        self.scheduler
            .update_api(api_id, settings)
            .await?
            .ok_or(MonitorError::ApiNotFound(api_id))
    }

    pub async fn delete(&self, user_id: i32, api_id: i32) -> Result<(), MonitorError> {
        self.owned_api(user_id, api_id).await?;
        if self.scheduler.delete_api(api_id).await? {
            Ok(())
        } else {
            Err(MonitorError::ApiNotFound(api_id))
        }
    }

    pub async fn get(&self, user_id: i32, api_id: i32) -> Result<tracked_api::Model, MonitorError> {
        self.owned_api(user_id, api_id).await
    }

    pub async fn list(&self, user_id: i32) -> Result<Vec<tracked_api::Model>, MonitorError> {
        Ok(self.store.list_apis(user_id).await?)
    }

    pub async fn check_now(&self, user_id: i32, api_id: i32) -> Result<CheckOutcome, MonitorError> {
        let api = self.owned_api(user_id, api_id).await?;
        self.scheduler.ensure_tracked(&api);
        Ok(self.scheduler.check_now(api_id).await?)
    }

    pub async fn health_history(
        &self,
        user_id: i32,
        api_id: i32,
        page: PageRequest,
    ) -> Result<Paged<health_check::Model>, MonitorError> {
        self.owned_api(user_id, api_id).await?;
        Ok(self.store.health_history(api_id, page).await?)
    }

    pub async fn list_alerts(
        &self,
        user_id: i32,
        query: &AlertListQuery,
    ) -> Result<AlertListResponse, MonitorError> {
        let page = query.page_request();
        let alerts = self.store.list_alerts(user_id, query.filter(), page).await?;
        let counts = self.store.open_alert_counts(user_id).await?;
        let names: HashMap<i32, String> = self
            .store
            .list_apis(user_id)
            .await?
            .into_iter()
            .map(|api| (api.id, api.name))
            .collect();

        let content = alerts
            .items
            .into_iter()
            .map(|alert| {
                let name = names.get(&alert.api_id).cloned();
                AlertResponse::new(alert, name)
            })
            .collect();
        Ok(AlertListResponse {
            page: PageResponse::new(content, alerts.total, page),
            unread_count: counts.total,
        })
    }

    pub async fn unread_alert_count(&self, user_id: i32) -> Result<u64, MonitorError> {
        Ok(self.store.open_alert_counts(user_id).await?.total)
    }

    /// Owner acknowledgement. Idempotent; never changes the API's status.
    pub async fn resolve_alert(
        &self,
        user_id: i32,
        alert_id: i32,
    ) -> Result<AlertResponse, MonitorError> {
        let alert = self
            .store
            .resolve_alert(user_id, alert_id, Utc::now())
            .await?
            .ok_or(MonitorError::AlertNotFound(alert_id))?;
        let name = self.store.get_api(alert.api_id).await?.map(|api| api.name);
        Ok(AlertResponse::new(alert, name))
    }

    pub async fn dashboard_summary(&self, user_id: i32) -> Result<DashboardSummary, MonitorError> {
        let apis = self.store.list_apis(user_id).await?;
        let counts = self.store.open_alert_counts(user_id).await?;
        let mut summary = DashboardSummary {
            total_apis: apis.len() as u64,
            open_alerts: counts.total,
            critical_alerts: counts.critical,
            ..Default::default()
        };
        for api in &apis {
            match api.current_status {
                ApiStatus::Active => summary.active_apis += 1,
                ApiStatus::Degraded => summary.degraded_apis += 1,
                ApiStatus::Down => summary.down_apis += 1,
                ApiStatus::Deprecated => summary.deprecated_apis += 1,
                ApiStatus::Unknown => summary.unknown_apis += 1,
            }
        }
        Ok(summary)
    }

    async fn owned_api(&self, user_id: i32, api_id: i32) -> Result<tracked_api::Model, MonitorError> {
        match self.store.get_api(api_id).await {
            Ok(Some(api)) if api.user_id == user_id => Ok(api),
            Ok(_) => Err(MonitorError::ApiNotFound(api_id)),
            Err(e) => {
                error!(api_id, error = %e, "Failed to load tracked API.");
                Err(e.into())
            }
        }
    }
}

/// Normalizes and checks owner-supplied settings.
pub fn validate(
    mut settings: ApiSettings,
    rules: &SchedulerConfig,
) -> Result<ApiSettings, ConfigError> {
    settings.name = settings.name.trim().to_string();
    if settings.name.is_empty() {
        return Err(ConfigError::MissingField("name"));
    }
    if settings.name.chars().count() > MAX_NAME_CHARS {
        return Err(ConfigError::TooLong {
            field: "name",
            max: MAX_NAME_CHARS,
        });
    }

    settings.base_url = settings.base_url.trim().to_string();
    if settings.base_url.is_empty() {
        return Err(ConfigError::MissingField("baseUrl"));
    }
    check_url("baseUrl", &settings.base_url)?;
    settings.health_check_url = optional_url("healthCheckUrl", settings.health_check_url)?;
    settings.documentation_url = optional_url("documentationUrl", settings.documentation_url)?;

    settings.http_method = settings.http_method.trim().to_ascii_uppercase();
    if !SUPPORTED_METHODS.contains(&settings.http_method.as_str()) {
        return Err(ConfigError::UnsupportedMethod(settings.http_method));
    }

    if !(100..=599).contains(&settings.expected_status) {
        return Err(ConfigError::InvalidExpectedStatus(settings.expected_status));
    }

    let interval = settings.check_interval_seconds;
    let allowed = rules.allowed_check_intervals.contains(&interval);
    if interval <= 0 || (!allowed && interval < rules.min_check_interval_seconds) {
        return Err(ConfigError::IntervalTooShort {
            interval,
            min: rules.min_check_interval_seconds,
        });
    }
    Ok(settings)
}

fn optional_url(field: &'static str, value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => {
            check_url(field, &v)?;
            Ok(Some(v))
        }
        _ => Ok(None),
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.chars().count() > MAX_URL_CHARS {
        return Err(ConfigError::TooLong {
            field,
            max: MAX_URL_CHARS,
        });
    }
    let valid = Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ApiSettings {
        ApiSettings {
            name: "  Orders ".to_string(),
            base_url: "https://orders.example.com".to_string(),
            documentation_url: Some("".to_string()),
            health_check_url: Some(" https://orders.example.com/health ".to_string()),
            http_method: "get".to_string(),
            expected_status: 200,
            check_interval_seconds: 900,
            is_active: true,
        }
    }

    #[test]
    fn normalizes_valid_settings() {
        let s = validate(settings(), &SchedulerConfig::default()).unwrap();
        assert_eq!(s.name, "Orders");
        assert_eq!(s.http_method, "GET");
        assert_eq!(s.health_check_url.as_deref(), Some("https://orders.example.com/health"));
        assert_eq!(s.documentation_url, None);
    }

    #[test]
    fn rejects_missing_name_and_url() {
        let mut s = settings();
        s.name = "   ".to_string();
        assert_eq!(
            validate(s, &SchedulerConfig::default()),
            Err(ConfigError::MissingField("name"))
        );
        let mut s = settings();
        s.base_url = String::new();
        assert_eq!(
            validate(s, &SchedulerConfig::default()),
            Err(ConfigError::MissingField("baseUrl"))
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        let mut s = settings();
        s.base_url = "ftp://orders.example.com".to_string();
        assert!(matches!(
            validate(s, &SchedulerConfig::default()),
            Err(ConfigError::InvalidUrl { field: "baseUrl", .. })
        ));
        let mut s = settings();
        s.health_check_url = Some("not a url".to_string());
        assert!(matches!(
            validate(s, &SchedulerConfig::default()),
            Err(ConfigError::InvalidUrl { field: "healthCheckUrl", .. })
        ));
    }

    #[test]
    fn rejects_unknown_method_and_status() {
        let mut s = settings();
        s.http_method = "PATCH".to_string();
        assert_eq!(
            validate(s, &SchedulerConfig::default()),
            Err(ConfigError::UnsupportedMethod("PATCH".to_string()))
        );
        let mut s = settings();
        s.expected_status = 42;
        assert_eq!(
            validate(s, &SchedulerConfig::default()),
            Err(ConfigError::InvalidExpectedStatus(42))
        );
    }

    #[test]
    fn interval_floor_and_allowed_set() {
        let mut s = settings();
        s.check_interval_seconds = 60;
        assert_eq!(
            validate(s.clone(), &SchedulerConfig::default()),
            Err(ConfigError::IntervalTooShort {
                interval: 60,
                min: 300
            })
        );

        let rules = SchedulerConfig {
            allowed_check_intervals: vec![60],
            ..Default::default()
        };
        assert!(validate(s.clone(), &rules).is_ok());

        s.check_interval_seconds = 7200;
        assert!(validate(s, &SchedulerConfig::default()).is_ok());
    }
}
