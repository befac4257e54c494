use serde::Serialize;

/// Per-owner counts for the dashboard header.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_apis: u64,
    pub active_apis: u64,
    pub degraded_apis: u64,
    pub down_apis: u64,
    pub deprecated_apis: u64,
    pub unknown_apis: u64,
    pub open_alerts: u64,
    pub critical_alerts: u64,
}
