use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::enums::ApiStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "tracked_apis")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub base_url: String,
    #[sea_orm(nullable)]
    pub documentation_url: Option<String>,
    /// Stored as entered; `None` means "probe the base URL".
    #[sea_orm(nullable)]
    pub health_check_url: Option<String>,
    pub http_method: String,
    pub expected_status: i32,
    pub check_interval_seconds: i32,
    pub current_status: ApiStatus,
    #[sea_orm(nullable)]
    pub last_checked: Option<ChronoDateTimeUtc>,
    #[sea_orm(nullable)]
    pub next_check_at: Option<ChronoDateTimeUtc>,
    #[sea_orm(nullable)]
    pub last_fingerprint: Option<String>,
    pub is_active: bool,
    pub consecutive_failures: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

impl Model {
    /// The URL a probe is sent to. Falls back to the base URL when the owner
    /// never set a dedicated health-check endpoint.
    pub fn effective_health_check_url(&self) -> &str {
        self.health_check_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(&self.base_url)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds.max(1) as u64)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::health_check::Entity")]
    HealthCheck,
    #[sea_orm(has_many = "super::alert::Entity")]
    Alert,
}

impl Related<super::health_check::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::HealthCheck.def()
    }
}

impl Related<super::alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Alert.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
