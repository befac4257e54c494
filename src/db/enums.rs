use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current health classification of a tracked API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "api_status_enum")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiStatus {
    #[sea_orm(string_value = "UNKNOWN")]
    Unknown,
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "DEGRADED")]
    Degraded,
    #[sea_orm(string_value = "DOWN")]
    Down,
    #[sea_orm(string_value = "DEPRECATED")]
    Deprecated,
}

impl ApiStatus {
    /// DOWN and DEGRADED carry their own alert types; every other transition
    /// is informational.
    pub fn is_failure_state(self) -> bool {
        matches!(self, ApiStatus::Down | ApiStatus::Degraded)
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiStatus::Unknown => "UNKNOWN",
            ApiStatus::Active => "ACTIVE",
            ApiStatus::Degraded => "DEGRADED",
            ApiStatus::Down => "DOWN",
            ApiStatus::Deprecated => "DEPRECATED",
        };
        f.write_str(s)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "alert_type_enum")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    #[sea_orm(string_value = "DOWN")]
    Down,
    #[sea_orm(string_value = "DEGRADED")]
    Degraded,
    #[sea_orm(string_value = "STATUS_CHANGE")]
    StatusChange,
    #[sea_orm(string_value = "DEPRECATION")]
    Deprecation,
    #[sea_orm(string_value = "RESPONSE_CHANGE")]
    ResponseChange,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::Down => "DOWN",
            AlertType::Degraded => "DEGRADED",
            AlertType::StatusChange => "STATUS_CHANGE",
            AlertType::Deprecation => "DEPRECATION",
            AlertType::ResponseChange => "RESPONSE_CHANGE",
        };
        f.write_str(s)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "severity_enum")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[sea_orm(string_value = "LOW")]
    Low,
    #[sea_orm(string_value = "MEDIUM")]
    Medium,
    #[sea_orm(string_value = "HIGH")]
    High,
    #[sea_orm(string_value = "CRITICAL")]
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}
