//! Alert engine: decides which alerts open or resolve for one status
//! transition. Pure; the resulting mutations are committed by the scheduler
//! together with the health-check record.

use crate::db::entities::tracked_api;
use crate::db::enums::{AlertType, ApiStatus, Severity};
use crate::db::store::{AlertDraft, AlertMutation};
use crate::monitoring::classifier::{Classification, Degradation};
use crate::monitoring::probe::{ProbeResult, truncate_chars};

pub const MAX_TITLE_CHARS: usize = 200;

/// Inputs for one evaluation. `api` is the state *before* this probe.
pub struct Transition<'a> {
    pub api: &'a tracked_api::Model,
    pub classification: &'a Classification,
    pub probe: &'a ProbeResult,
    /// Fingerprint this probe would store. Only successful probes carry one.
    pub new_fingerprint: Option<&'a str>,
}

pub fn evaluate(t: &Transition<'_>) -> Vec<AlertMutation> {
    let previous = t.api.current_status;
    let current = t.classification.status;
    let mut mutations = Vec::new();

    match current {
        ApiStatus::Down => mutations.push(open(
            AlertType::Down,
            Severity::Critical,
            format!("{} is DOWN", t.api.name),
            down_description(t),
        )),
        ApiStatus::Degraded => {
            let (severity, description) = degraded_details(t.classification.degradation);
            mutations.push(open(
                AlertType::Degraded,
                severity,
                format!("{} is degraded", t.api.name),
                description,
            ));
        }
        ApiStatus::Active => {
            mutations.push(AlertMutation::Resolve(AlertType::Down));
            mutations.push(AlertMutation::Resolve(AlertType::Degraded));
        }
        ApiStatus::Deprecated if previous != ApiStatus::Deprecated => mutations.push(open(
            AlertType::Deprecation,
            Severity::High,
            format!("{} is deprecated", t.api.name),
            format!(
                "{} announced deprecation on {}. Plan a migration before it is retired.",
                t.api.name,
                t.api.effective_health_check_url()
            ),
        )),
        ApiStatus::Deprecated | ApiStatus::Unknown => {}
    }

    if t.classification.undeprecated && current != ApiStatus::Deprecated {
        mutations.push(AlertMutation::Resolve(AlertType::Deprecation));
    }

    if is_informational_change(t, previous, current) {
        mutations.push(open(
            AlertType::StatusChange,
            Severity::Low,
            format!("{} changed status to {}", t.api.name, current),
            format!("Status changed from {previous} to {current}."),
        ));
    }

    if let Some(mutation) = response_change(t, current) {
        mutations.push(mutation);
    }

    mutations
}

/// Transitions not covered by DOWN, DEGRADED or DEPRECATION alerts. The very
/// first classification of a never-checked API is not a change.
fn is_informational_change(t: &Transition<'_>, previous: ApiStatus, current: ApiStatus) -> bool {
    let first_classification = previous == ApiStatus::Unknown && t.api.last_checked.is_none();
    previous != current
        && !previous.is_failure_state()
        && !current.is_failure_state()
        && current != ApiStatus::Deprecated
        && !first_classification
}

fn response_change(t: &Transition<'_>, current: ApiStatus) -> Option<AlertMutation> {
    let severity = match current {
        ApiStatus::Active => Severity::Low,
        ApiStatus::Degraded => Severity::Medium,
        _ => return None,
    };
    let before = t.api.last_fingerprint.as_deref()?;
    let after = t.new_fingerprint?;
    if before == after {
        return None;
    }
    Some(open(
        AlertType::ResponseChange,
        severity,
        format!("{} response format changed", t.api.name),
        format!(
            "Response fingerprint changed from {} to {}.",
            short(before),
            short(after)
        ),
    ))
}

fn down_description(t: &Transition<'_>) -> String {
    let reason = match (&t.probe.error_message, t.probe.status_code) {
        (Some(message), _) => message.clone(),
        (None, Some(code)) => format!("HTTP {code}"),
        (None, None) => "no response".to_string(),
    };
    format!(
        "{} failed consecutive health checks against {}. Last error: {}",
        t.api.name,
        t.api.effective_health_check_url(),
        reason
    )
}

fn degraded_details(degradation: Option<Degradation>) -> (Severity, String) {
    match degradation {
        Some(Degradation::Latency {
            latency_ms,
            baseline_ms,
            ratio,
            severe,
        }) => (
            if severe { Severity::High } else { Severity::Medium },
            format!(
                "Response time {latency_ms} ms is {ratio:.1}x the recent baseline of {baseline_ms} ms."
            ),
        ),
        Some(Degradation::LooseStatus { observed, expected }) => (
            Severity::Medium,
            format!("Responded with HTTP {observed}, expected {expected}."),
        ),
        None => (Severity::Medium, "Service is degraded.".to_string()),
    }
}

fn open(alert_type: AlertType, severity: Severity, title: String, description: String) -> AlertMutation {
    AlertMutation::Open(AlertDraft {
        alert_type,
        severity,
        title: truncate_chars(&title, MAX_TITLE_CHARS),
        description,
    })
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
