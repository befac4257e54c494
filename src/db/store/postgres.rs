//! PostgreSQL-backed History Store built on SeaORM.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use std::time::Duration;
use tracing::info;

use super::{
    AlertFilter, AlertMutation, ApiSettings, CheckCommit, CommitOutcome, CommitReceipt,
    HistoryStore, OpenAlertCounts, PageRequest, Paged, StoreError,
};
use crate::db::entities::{alert, health_check, prelude::*, tracked_api};
use crate::db::enums::{AlertType, ApiStatus, Severity};
use crate::db::schema;

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(max_connections)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let db = Database::connect(opt).await?;
        Ok(Self { db })
    }

    /// Creates tables and indexes when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in schema::STATEMENTS {
            self.db.execute_unprepared(statement).await?;
        }
        info!("Database schema is up to date.");
        Ok(())
    }

    fn alert_filter(filter: AlertFilter) -> Option<bool> {
        match filter {
            AlertFilter::All => None,
            AlertFilter::Resolved => Some(true),
            AlertFilter::Unresolved => Some(false),
        }
    }

    async fn find_open_alert(
        txn: &DatabaseTransaction,
        api_id: i32,
        alert_type: AlertType,
    ) -> Result<Option<alert::Model>, StoreError> {
        Ok(Alert::find()
            .filter(alert::Column::ApiId.eq(api_id))
            .filter(alert::Column::AlertType.eq(alert_type))
            .filter(alert::Column::IsResolved.eq(false))
            .one(txn)
            .await?)
    }
}

#[async_trait]
impl HistoryStore for SeaOrmStore {
    async fn load_active_apis(&self) -> Result<Vec<tracked_api::Model>, StoreError> {
        Ok(TrackedApi::find()
            .filter(tracked_api::Column::IsActive.eq(true))
            .order_by_asc(tracked_api::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn get_api(&self, api_id: i32) -> Result<Option<tracked_api::Model>, StoreError> {
        Ok(TrackedApi::find_by_id(api_id).one(&self.db).await?)
    }

    async fn list_apis(&self, user_id: i32) -> Result<Vec<tracked_api::Model>, StoreError> {
        Ok(TrackedApi::find()
            .filter(tracked_api::Column::UserId.eq(user_id))
            .order_by_asc(tracked_api::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn insert_api(
        &self,
        user_id: i32,
        settings: ApiSettings,
        next_check_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<tracked_api::Model, StoreError> {
        let new_api = tracked_api::ActiveModel {
            user_id: Set(user_id),
            name: Set(settings.name),
            base_url: Set(settings.base_url),
            documentation_url: Set(settings.documentation_url),
            health_check_url: Set(settings.health_check_url),
            http_method: Set(settings.http_method),
            expected_status: Set(settings.expected_status),
            check_interval_seconds: Set(settings.check_interval_seconds),
            current_status: Set(ApiStatus::Unknown),
            last_checked: Set(None),
            next_check_at: Set(Some(next_check_at)),
            last_fingerprint: Set(None),
            is_active: Set(settings.is_active),
            consecutive_failures: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(new_api.insert(&self.db).await?)
    }

    async fn update_api(
        &self,
        api_id: i32,
        settings: ApiSettings,
        clear_deprecation: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<tracked_api::Model>, StoreError> {
        let txn = self.db.begin().await?;
        let Some(existing) = TrackedApi::find_by_id(api_id)
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        let reset = clear_deprecation && existing.current_status == ApiStatus::Deprecated;
        let mut active: tracked_api::ActiveModel = existing.into();
        active.name = Set(settings.name);
        active.base_url = Set(settings.base_url);
        active.documentation_url = Set(settings.documentation_url);
        active.health_check_url = Set(settings.health_check_url);
        active.http_method = Set(settings.http_method);
        active.expected_status = Set(settings.expected_status);
        active.check_interval_seconds = Set(settings.check_interval_seconds);
        active.is_active = Set(settings.is_active);
        active.updated_at = Set(now);
        if reset {
            active.current_status = Set(ApiStatus::Unknown);
            Alert::update_many()
                .col_expr(alert::Column::IsResolved, Expr::value(true))
                .col_expr(alert::Column::ResolvedAt, Expr::value(now))
                .filter(alert::Column::ApiId.eq(api_id))
                .filter(alert::Column::AlertType.eq(AlertType::Deprecation))
                .filter(alert::Column::IsResolved.eq(false))
                .exec(&txn)
                .await?;
        }
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(Some(updated))
    }

    async fn delete_api(&self, api_id: i32) -> Result<bool, StoreError> {
        let txn = self.db.begin().await?;
        HealthCheck::delete_many()
            .filter(health_check::Column::ApiId.eq(api_id))
            .exec(&txn)
            .await?;
        Alert::delete_many()
            .filter(alert::Column::ApiId.eq(api_id))
            .exec(&txn)
            .await?;
        let result = TrackedApi::delete_by_id(api_id).exec(&txn).await?;
        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }

    async fn commit_check(&self, commit: CheckCommit) -> Result<CommitOutcome, StoreError> {
        let txn = self.db.begin().await?;

        // Row lock serialises commits for one API across processes.
        let Some(api) = TrackedApi::find_by_id(commit.api_id)
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(CommitOutcome::ApiMissing);
        };
        let user_id = api.user_id;

        let mut active: tracked_api::ActiveModel = api.into();
        active.current_status = Set(commit.status);
        active.last_checked = Set(Some(commit.checked_at));
        active.consecutive_failures = Set(commit.consecutive_failures);
        if let Some(fingerprint) = &commit.fingerprint {
            active.last_fingerprint = Set(Some(fingerprint.clone()));
        }
        if let Some(next) = commit.next_check_at {
            active.next_check_at = Set(Some(next));
        }
        active.update(&txn).await?;

        let record = health_check::ActiveModel {
            api_id: Set(commit.api_id),
            checked_at: Set(commit.checked_at),
            http_status: Set(commit.record.http_status),
            response_time_ms: Set(commit.record.response_time_ms),
            is_up: Set(commit.record.is_up),
            error_kind: Set(commit.record.error_kind),
            error_message: Set(commit.record.error_message),
            fingerprint: Set(commit.record.fingerprint),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut receipt = CommitReceipt {
            record: Some(record),
            ..Default::default()
        };

        for mutation in commit.alerts {
            match mutation {
                AlertMutation::Open(draft) => {
                    match Self::find_open_alert(&txn, commit.api_id, draft.alert_type).await? {
                        Some(open) if draft.differs_from(&open) => {
                            let mut active: alert::ActiveModel = open.into();
                            active.severity = Set(draft.severity);
                            active.title = Set(draft.title);
                            active.description = Set(Some(draft.description));
                            receipt.updated.push(active.update(&txn).await?);
                        }
                        Some(_) => {}
                        None => {
                            let created = alert::ActiveModel {
                                api_id: Set(commit.api_id),
                                user_id: Set(user_id),
                                alert_type: Set(draft.alert_type),
                                severity: Set(draft.severity),
                                title: Set(draft.title),
                                description: Set(Some(draft.description)),
                                is_resolved: Set(false),
                                resolved_at: Set(None),
                                created_at: Set(commit.checked_at),
                                ..Default::default()
                            }
                            .insert(&txn)
                            .await?;
                            receipt.opened.push(created);
                        }
                    }
                }
                AlertMutation::Resolve(alert_type) => {
                    if let Some(open) =
                        Self::find_open_alert(&txn, commit.api_id, alert_type).await?
                    {
                        let resolved_at = commit.checked_at.max(open.created_at);
                        let mut active: alert::ActiveModel = open.into();
                        active.is_resolved = Set(true);
                        active.resolved_at = Set(Some(resolved_at));
                        receipt.resolved.push(active.update(&txn).await?);
                    }
                }
            }
        }

        txn.commit().await?;
        Ok(CommitOutcome::Applied(receipt))
    }

    async fn health_history(
        &self,
        api_id: i32,
        page: PageRequest,
    ) -> Result<Paged<health_check::Model>, StoreError> {
        let paginator = HealthCheck::find()
            .filter(health_check::Column::ApiId.eq(api_id))
            .order_by_desc(health_check::Column::CheckedAt)
            .order_by_desc(health_check::Column::Id)
            .paginate(&self.db, page.size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.page).await?;
        Ok(Paged { items, total })
    }

    async fn list_alerts(
        &self,
        user_id: i32,
        filter: AlertFilter,
        page: PageRequest,
    ) -> Result<Paged<alert::Model>, StoreError> {
        let mut query = Alert::find().filter(alert::Column::UserId.eq(user_id));
        if let Some(resolved) = Self::alert_filter(filter) {
            query = query.filter(alert::Column::IsResolved.eq(resolved));
        }
        let paginator = query
            .order_by_desc(alert::Column::CreatedAt)
            .order_by_desc(alert::Column::Id)
            .paginate(&self.db, page.size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.page).await?;
        Ok(Paged { items, total })
    }

    async fn alerts_for_api(&self, api_id: i32) -> Result<Vec<alert::Model>, StoreError> {
        Ok(Alert::find()
            .filter(alert::Column::ApiId.eq(api_id))
            .order_by_asc(alert::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn open_alert_counts(&self, user_id: i32) -> Result<OpenAlertCounts, StoreError> {
        let open = Alert::find()
            .filter(alert::Column::UserId.eq(user_id))
            .filter(alert::Column::IsResolved.eq(false));
        let total = open.clone().count(&self.db).await?;
        let critical = open
            .filter(alert::Column::Severity.eq(Severity::Critical))
            .count(&self.db)
            .await?;
        Ok(OpenAlertCounts { total, critical })
    }

    async fn resolve_alert(
        &self,
        user_id: i32,
        alert_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<alert::Model>, StoreError> {
        let Some(existing) = Alert::find_by_id(alert_id)
            .filter(alert::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        if existing.is_resolved {
            return Ok(Some(existing));
        }
        let resolved_at = now.max(existing.created_at);
        let mut active: alert::ActiveModel = existing.into();
        active.is_resolved = Set(true);
        active.resolved_at = Set(Some(resolved_at));
        Ok(Some(active.update(&self.db).await?))
    }
}
