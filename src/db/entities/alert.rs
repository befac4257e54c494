use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{AlertType, Severity};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub api_id: i32,
    pub user_id: i32,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub is_resolved: bool,
    #[sea_orm(nullable)]
    pub resolved_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tracked_api::Entity",
        from = "Column::ApiId",
        to = "super::tracked_api::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    TrackedApi,
}

impl Related<super::tracked_api::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrackedApi.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
