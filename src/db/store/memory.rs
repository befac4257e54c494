use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    AlertFilter, AlertMutation, ApiSettings, CheckCommit, CommitOutcome, CommitReceipt,
    HistoryStore, OpenAlertCounts, PageRequest, Paged, StoreError,
};
use crate::db::entities::{alert, health_check, tracked_api};
use crate::db::enums::{AlertType, ApiStatus, Severity};

#[derive(Default)]
struct Tables {
    apis: BTreeMap<i32, tracked_api::Model>,
    checks: BTreeMap<i32, Vec<health_check::Model>>,
    alerts: BTreeMap<i32, alert::Model>,
    next_api_id: i32,
    next_check_id: i64,
    next_alert_id: i32,
}

impl Tables {
    fn open_alert_mut(&mut self, api_id: i32, alert_type: AlertType) -> Option<&mut alert::Model> {
        self.alerts
            .values_mut()
            .find(|a| a.api_id == api_id && a.alert_type == alert_type && !a.is_resolved)
    }
}

/// In-process History Store. All tables sit behind one lock, so every method
/// is a single atomic write.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_api_id: 1,
                next_check_id: 1,
                next_alert_id: 1,
                ..Default::default()
            }),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Paged<T> {
    Paged {
        items: items
            .iter()
            .skip(page.offset())
            .take(page.size as usize)
            .cloned()
            .collect(),
        total: items.len() as u64,
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn load_active_apis(&self) -> Result<Vec<tracked_api::Model>, StoreError> {
        let tables = self.read()?;
        Ok(tables.apis.values().filter(|a| a.is_active).cloned().collect())
    }

    async fn get_api(&self, api_id: i32) -> Result<Option<tracked_api::Model>, StoreError> {
        Ok(self.read()?.apis.get(&api_id).cloned())
    }

    async fn list_apis(&self, user_id: i32) -> Result<Vec<tracked_api::Model>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .apis
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_api(
        &self,
        user_id: i32,
        settings: ApiSettings,
        next_check_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<tracked_api::Model, StoreError> {
        let mut tables = self.write()?;
        let id = tables.next_api_id;
        tables.next_api_id += 1;
        let api = tracked_api::Model {
            id,
            user_id,
            name: settings.name,
            base_url: settings.base_url,
            documentation_url: settings.documentation_url,
            health_check_url: settings.health_check_url,
            http_method: settings.http_method,
            expected_status: settings.expected_status,
            check_interval_seconds: settings.check_interval_seconds,
            current_status: ApiStatus::Unknown,
            last_checked: None,
            next_check_at: Some(next_check_at),
            last_fingerprint: None,
            is_active: settings.is_active,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        };
        tables.apis.insert(id, api.clone());
        Ok(api)
    }

    async fn update_api(
        &self,
        api_id: i32,
        settings: ApiSettings,
        clear_deprecation: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<tracked_api::Model>, StoreError> {
        let mut tables = self.write()?;
        let Some(api) = tables.apis.get_mut(&api_id) else {
            return Ok(None);
        };
        api.name = settings.name;
        api.base_url = settings.base_url;
        api.documentation_url = settings.documentation_url;
        api.health_check_url = settings.health_check_url;
        api.http_method = settings.http_method;
        api.expected_status = settings.expected_status;
        api.check_interval_seconds = settings.check_interval_seconds;
        api.is_active = settings.is_active;
        api.updated_at = now;

        let reset = clear_deprecation && api.current_status == ApiStatus::Deprecated;
        if reset {
            api.current_status = ApiStatus::Unknown;
        }
        let updated = api.clone();

        if reset {
            if let Some(open) = tables.open_alert_mut(api_id, AlertType::Deprecation) {
                open.is_resolved = true;
                open.resolved_at = Some(now.max(open.created_at));
            }
        }
        Ok(Some(updated))
    }

    async fn delete_api(&self, api_id: i32) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.apis.remove(&api_id).is_none() {
            return Ok(false);
        }
        tables.checks.remove(&api_id);
        tables.alerts.retain(|_, a| a.api_id != api_id);
        Ok(true)
    }

    async fn commit_check(&self, commit: CheckCommit) -> Result<CommitOutcome, StoreError> {
        let mut tables = self.write()?;
        let Some(api) = tables.apis.get_mut(&commit.api_id) else {
            return Ok(CommitOutcome::ApiMissing);
        };
        api.current_status = commit.status;
        api.last_checked = Some(commit.checked_at);
        api.consecutive_failures = commit.consecutive_failures;
        if let Some(fingerprint) = &commit.fingerprint {
            api.last_fingerprint = Some(fingerprint.clone());
        }
        if let Some(next) = commit.next_check_at {
            api.next_check_at = Some(next);
        }
        let user_id = api.user_id;

        let check_id = tables.next_check_id;
        tables.next_check_id += 1;
        let record = health_check::Model {
            id: check_id,
            api_id: commit.api_id,
            checked_at: commit.checked_at,
            http_status: commit.record.http_status,
            response_time_ms: commit.record.response_time_ms,
            is_up: commit.record.is_up,
            error_kind: commit.record.error_kind,
            error_message: commit.record.error_message,
            fingerprint: commit.record.fingerprint,
        };
        tables
            .checks
            .entry(commit.api_id)
            .or_default()
            .push(record.clone());

        let mut receipt = CommitReceipt {
            record: Some(record),
            ..Default::default()
        };
        for mutation in commit.alerts {
            match mutation {
                AlertMutation::Open(draft) => {
                    if let Some(open) = tables.open_alert_mut(commit.api_id, draft.alert_type) {
                        if draft.differs_from(open) {
                            open.severity = draft.severity;
                            open.title = draft.title;
                            open.description = Some(draft.description);
                            receipt.updated.push(open.clone());
                        }
                    } else {
                        let id = tables.next_alert_id;
                        tables.next_alert_id += 1;
                        let created = alert::Model {
                            id,
                            api_id: commit.api_id,
                            user_id,
                            alert_type: draft.alert_type,
                            severity: draft.severity,
                            title: draft.title,
                            description: Some(draft.description),
                            is_resolved: false,
                            resolved_at: None,
                            created_at: commit.checked_at,
                        };
                        tables.alerts.insert(id, created.clone());
                        receipt.opened.push(created);
                    }
                }
                AlertMutation::Resolve(alert_type) => {
                    if let Some(open) = tables.open_alert_mut(commit.api_id, alert_type) {
                        open.is_resolved = true;
                        open.resolved_at = Some(commit.checked_at.max(open.created_at));
                        receipt.resolved.push(open.clone());
                    }
                }
            }
        }
        Ok(CommitOutcome::Applied(receipt))
    }

    async fn health_history(
        &self,
        api_id: i32,
        page: PageRequest,
    ) -> Result<Paged<health_check::Model>, StoreError> {
        let tables = self.read()?;
        let mut checks = tables.checks.get(&api_id).cloned().unwrap_or_default();
        checks.sort_by(|a, b| b.checked_at.cmp(&a.checked_at).then(b.id.cmp(&a.id)));
        Ok(paginate(&checks, page))
    }

    async fn list_alerts(
        &self,
        user_id: i32,
        filter: AlertFilter,
        page: PageRequest,
    ) -> Result<Paged<alert::Model>, StoreError> {
        let tables = self.read()?;
        let mut alerts: Vec<alert::Model> = tables
            .alerts
            .values()
            .filter(|a| a.user_id == user_id && filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(&alerts, page))
    }

    async fn alerts_for_api(&self, api_id: i32) -> Result<Vec<alert::Model>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .alerts
            .values()
            .filter(|a| a.api_id == api_id)
            .cloned()
            .collect())
    }

    async fn open_alert_counts(&self, user_id: i32) -> Result<OpenAlertCounts, StoreError> {
        let tables = self.read()?;
        let mut counts = OpenAlertCounts::default();
        for alert in tables
            .alerts
            .values()
            .filter(|a| a.user_id == user_id && !a.is_resolved)
        {
            counts.total += 1;
            if alert.severity == Severity::Critical {
                counts.critical += 1;
            }
        }
        Ok(counts)
    }

    async fn resolve_alert(
        &self,
        user_id: i32,
        alert_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<alert::Model>, StoreError> {
        let mut tables = self.write()?;
        let Some(alert) = tables
            .alerts
            .get_mut(&alert_id)
            .filter(|a| a.user_id == user_id)
        else {
            return Ok(None);
        };
        if !alert.is_resolved {
            alert.is_resolved = true;
            alert.resolved_at = Some(now.max(alert.created_at));
        }
        Ok(Some(alert.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{AlertDraft, NewHealthCheck};

    fn settings() -> ApiSettings {
        ApiSettings {
            name: "Payments".to_string(),
            base_url: "https://payments.example.com".to_string(),
            documentation_url: None,
            health_check_url: None,
            http_method: "GET".to_string(),
            expected_status: 200,
            check_interval_seconds: 300,
            is_active: true,
        }
    }

    fn commit(api_id: i32, alerts: Vec<AlertMutation>) -> CheckCommit {
        CheckCommit {
            api_id,
            checked_at: Utc::now(),
            status: ApiStatus::Down,
            consecutive_failures: 2,
            fingerprint: None,
            next_check_at: None,
            record: NewHealthCheck {
                http_status: Some(500),
                response_time_ms: 12,
                is_up: false,
                error_kind: Some("unexpected_status".to_string()),
                error_message: None,
                fingerprint: None,
            },
            alerts,
        }
    }

    fn open_down() -> AlertMutation {
        AlertMutation::Open(AlertDraft {
            alert_type: AlertType::Down,
            severity: Severity::Critical,
            title: "Payments is DOWN".to_string(),
            description: "2 consecutive failures".to_string(),
        })
    }

    #[tokio::test]
    async fn open_is_an_upsert_per_type() {
        let store = MemoryStore::new();
        let api = store
            .insert_api(7, settings(), Utc::now(), Utc::now())
            .await
            .unwrap();

        store.commit_check(commit(api.id, vec![open_down()])).await.unwrap();
        store.commit_check(commit(api.id, vec![open_down()])).await.unwrap();

        let alerts = store.alerts_for_api(api.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].is_resolved);
        assert_eq!(alerts[0].user_id, 7);
    }

    #[tokio::test]
    async fn open_alert_takes_the_latest_wording() {
        let store = MemoryStore::new();
        let api = store
            .insert_api(1, settings(), Utc::now(), Utc::now())
            .await
            .unwrap();
        let drift = |from: &str, to: &str| {
            AlertMutation::Open(AlertDraft {
                alert_type: AlertType::ResponseChange,
                severity: Severity::Low,
                title: "Payments response format changed".to_string(),
                description: format!("Response fingerprint changed from {from} to {to}."),
            })
        };

        store.commit_check(commit(api.id, vec![drift("a", "b")])).await.unwrap();
        let CommitOutcome::Applied(receipt) = store
            .commit_check(commit(api.id, vec![drift("b", "c")]))
            .await
            .unwrap()
        else {
            panic!("api should exist");
        };
        assert!(receipt.opened.is_empty());
        assert_eq!(receipt.updated.len(), 1);
        assert_eq!(
            receipt.updated[0].description.as_deref(),
            Some("Response fingerprint changed from b to c.")
        );

        // Replaying the same transition is a no-op.
        let CommitOutcome::Applied(replay) = store
            .commit_check(commit(api.id, vec![drift("b", "c")]))
            .await
            .unwrap()
        else {
            panic!("api should exist");
        };
        assert!(replay.updated.is_empty());
        assert_eq!(store.alerts_for_api(api.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_then_reopen_creates_a_new_alert() {
        let store = MemoryStore::new();
        let api = store
            .insert_api(1, settings(), Utc::now(), Utc::now())
            .await
            .unwrap();

        store.commit_check(commit(api.id, vec![open_down()])).await.unwrap();
        store
            .commit_check(commit(api.id, vec![AlertMutation::Resolve(AlertType::Down)]))
            .await
            .unwrap();
        store.commit_check(commit(api.id, vec![open_down()])).await.unwrap();

        let alerts = store.alerts_for_api(api.id).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts.iter().filter(|a| !a.is_resolved).count(), 1);
    }

    #[tokio::test]
    async fn commit_for_deleted_api_writes_nothing() {
        let store = MemoryStore::new();
        let api = store
            .insert_api(1, settings(), Utc::now(), Utc::now())
            .await
            .unwrap();
        assert!(store.delete_api(api.id).await.unwrap());

        let outcome = store.commit_check(commit(api.id, vec![open_down()])).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::ApiMissing));
        assert!(store.alerts_for_api(api.id).await.unwrap().is_empty());
        let history = store
            .health_history(api.id, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(history.total, 0);
    }

    #[tokio::test]
    async fn owner_resolution_is_idempotent_and_scoped_to_owner() {
        let store = MemoryStore::new();
        let api = store
            .insert_api(3, settings(), Utc::now(), Utc::now())
            .await
            .unwrap();
        store.commit_check(commit(api.id, vec![open_down()])).await.unwrap();
        let alert_id = store.alerts_for_api(api.id).await.unwrap()[0].id;

        assert!(store.resolve_alert(4, alert_id, Utc::now()).await.unwrap().is_none());

        let first = store.resolve_alert(3, alert_id, Utc::now()).await.unwrap().unwrap();
        let second = store.resolve_alert(3, alert_id, Utc::now()).await.unwrap().unwrap();
        assert!(first.is_resolved);
        assert_eq!(first.resolved_at, second.resolved_at);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store
            .insert_api(1, settings(), Utc::now(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
