//! Status classifier: turns the recent probe window into an [`ApiStatus`].
//!
//! Pure and synchronous. Given the same previous status, window and policy it
//! always returns the same [`Classification`].

use serde::Deserialize;
use std::collections::HashSet;

use crate::db::enums::ApiStatus;
use crate::monitoring::probe::{DeprecationSignal, ProbeResult};
use crate::monitoring::window::{ProbeSample, ProbeWindow};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierPolicy {
    /// Consecutive target-side failures that make an API DOWN.
    pub down_threshold: u32,
    /// A success slower than `latency_multiple` x baseline is DEGRADED.
    pub latency_multiple: f64,
    /// Prior successes needed before a latency baseline exists.
    pub min_baseline_samples: usize,
    /// Latencies below this are never called slow, whatever the baseline.
    pub min_degraded_latency_ms: u64,
    /// Fingerprints known to belong to "this API is retired" responses.
    pub deprecated_fingerprints: HashSet<String>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            down_threshold: 2,
            latency_multiple: 3.0,
            min_baseline_samples: 3,
            min_degraded_latency_ms: 250,
            deprecated_fingerprints: HashSet::new(),
        }
    }
}

impl ClassifierPolicy {
    /// Builds the window sample for a probe, folding tagged fingerprints into
    /// the deprecation signal.
    pub fn sample(&self, result: &ProbeResult) -> ProbeSample {
        let mut sample = ProbeSample::from(result);
        let tagged = result
            .fingerprint
            .as_ref()
            .is_some_and(|fp| self.deprecated_fingerprints.contains(fp));
        if tagged {
            sample.deprecation = DeprecationSignal::Deprecated;
        }
        sample
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Degradation {
    Latency {
        latency_ms: u64,
        baseline_ms: u64,
        ratio: f64,
        /// At least twice the configured multiple.
        severe: bool,
    },
    /// Right status family, wrong exact code.
    LooseStatus { observed: u16, expected: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub status: ApiStatus,
    /// Trailing target-side failures; monitor-side errors are skipped.
    pub consecutive_failures: u32,
    pub degradation: Option<Degradation>,
    /// A DEPRECATED status was lifted by an explicit `Deprecation: false`.
    pub undeprecated: bool,
}

impl Classification {
    fn new(status: ApiStatus, consecutive_failures: u32) -> Self {
        Self {
            status,
            consecutive_failures,
            degradation: None,
            undeprecated: false,
        }
    }
}

pub fn classify(
    previous: ApiStatus,
    window: &ProbeWindow,
    expected_status: u16,
    policy: &ClassifierPolicy,
) -> Classification {
    let failures = trailing_failures(window);
    let Some(latest) = window.latest() else {
        return Classification::new(ApiStatus::Unknown, 0);
    };

    if latest.deprecation == DeprecationSignal::Deprecated {
        return Classification::new(ApiStatus::Deprecated, failures);
    }
    let undeprecated = previous == ApiStatus::Deprecated;
    if undeprecated && latest.deprecation != DeprecationSignal::Undeprecated {
        return Classification::new(ApiStatus::Deprecated, failures);
    }

    let mut classification = if latest.is_monitor_error() {
        Classification::new(ApiStatus::Unknown, failures)
    } else if failures >= policy.down_threshold.max(1) {
        Classification::new(ApiStatus::Down, failures)
    } else if !latest.success {
        // One blip below the threshold keeps whatever we believed before.
        let retained = if undeprecated { ApiStatus::Unknown } else { previous };
        Classification::new(retained, failures)
    } else {
        classify_success(latest, window, expected_status, policy)
    };
    classification.undeprecated = undeprecated;
    classification
}

fn classify_success(
    latest: &ProbeSample,
    window: &ProbeWindow,
    expected_status: u16,
    policy: &ClassifierPolicy,
) -> Classification {
    if let Some(observed) = latest.status_code.filter(|code| *code != expected_status) {
        let mut c = Classification::new(ApiStatus::Degraded, 0);
        c.degradation = Some(Degradation::LooseStatus {
            observed,
            expected: expected_status,
        });
        return c;
    }

    if let Some(baseline_ms) = latency_baseline(window, policy.min_baseline_samples) {
        let ratio = latest.latency_ms as f64 / baseline_ms.max(1) as f64;
        if ratio > policy.latency_multiple && latest.latency_ms >= policy.min_degraded_latency_ms {
            let mut c = Classification::new(ApiStatus::Degraded, 0);
            c.degradation = Some(Degradation::Latency {
                latency_ms: latest.latency_ms,
                baseline_ms,
                ratio,
                severe: ratio >= policy.latency_multiple * 2.0,
            });
            return c;
        }
    }

    Classification::new(ApiStatus::Active, 0)
}

fn trailing_failures(window: &ProbeWindow) -> u32 {
    let mut failures = 0u32;
    for sample in window.iter_recent().filter(|s| !s.is_monitor_error()) {
        if sample.success {
            return failures;
        }
        failures += 1;
    }
    // The run reaches past the oldest sample held.
    failures.saturating_add(window.carried_failures())
}

/// Mean latency of the successes before the latest sample.
fn latency_baseline(window: &ProbeWindow, min_samples: usize) -> Option<u64> {
    let (count, total) = window
        .iter_recent()
        .skip(1)
        .filter(|s| s.success)
        .fold((0u64, 0u64), |(n, sum), s| (n + 1, sum.saturating_add(s.latency_ms)));
    if count == 0 || count < min_samples as u64 {
        return None;
    }
    Some(total / count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::probe::ProbeErrorKind;

    fn ok(latency_ms: u64) -> ProbeSample {
        ProbeSample {
            success: true,
            status_code: Some(200),
            latency_ms,
            error_kind: None,
            deprecation: DeprecationSignal::None,
        }
    }

    fn fail(code: u16) -> ProbeSample {
        ProbeSample {
            success: false,
            status_code: Some(code),
            latency_ms: 20,
            error_kind: Some(ProbeErrorKind::UnexpectedStatus),
            deprecation: DeprecationSignal::None,
        }
    }

    fn monitor_error() -> ProbeSample {
        ProbeSample {
            success: false,
            status_code: None,
            latency_ms: 0,
            error_kind: Some(ProbeErrorKind::Monitor),
            deprecation: DeprecationSignal::None,
        }
    }

    fn window(samples: &[ProbeSample]) -> ProbeWindow {
        let mut w = ProbeWindow::new(10);
        for s in samples {
            w.push(*s);
        }
        w
    }

    fn run(previous: ApiStatus, samples: &[ProbeSample]) -> Classification {
        classify(previous, &window(samples), 200, &ClassifierPolicy::default())
    }

    #[test]
    fn empty_window_is_unknown() {
        assert_eq!(run(ApiStatus::Active, &[]).status, ApiStatus::Unknown);
    }

    #[test]
    fn healthy_response_is_active() {
        let c = run(ApiStatus::Unknown, &[ok(40)]);
        assert_eq!(c.status, ApiStatus::Active);
        assert_eq!(c.consecutive_failures, 0);
        assert!(c.degradation.is_none());
    }

    #[test]
    fn single_failure_keeps_previous_status() {
        assert_eq!(run(ApiStatus::Active, &[ok(40), fail(500)]).status, ApiStatus::Active);
        assert_eq!(run(ApiStatus::Unknown, &[fail(500)]).status, ApiStatus::Unknown);
    }

    #[test]
    fn threshold_failures_are_down() {
        let c = run(ApiStatus::Unknown, &[fail(500), fail(500)]);
        assert_eq!(c.status, ApiStatus::Down);
        assert_eq!(c.consecutive_failures, 2);
    }

    #[test]
    fn threshold_above_window_capacity_still_reaches_down() {
        let policy = ClassifierPolicy {
            down_threshold: 3,
            ..Default::default()
        };
        let mut w = ProbeWindow::new(2);
        w.push(fail(500));
        w.push(fail(500));
        assert_eq!(classify(ApiStatus::Active, &w, 200, &policy).status, ApiStatus::Active);
        w.push(fail(500));
        let c = classify(ApiStatus::Active, &w, 200, &policy);
        assert_eq!(c.status, ApiStatus::Down);
        assert_eq!(c.consecutive_failures, 3);
    }

    #[test]
    fn carried_failures_join_the_run() {
        let mut w = ProbeWindow::with_carried_failures(10, 1);
        w.push(fail(503));
        let c = classify(ApiStatus::Active, &w, 200, &ClassifierPolicy::default());
        assert_eq!(c.status, ApiStatus::Down);
        assert_eq!(c.consecutive_failures, 2);
    }

    #[test]
    fn recovery_after_down_is_active() {
        let c = run(ApiStatus::Down, &[fail(500), fail(500), ok(40)]);
        assert_eq!(c.status, ApiStatus::Active);
        assert_eq!(c.consecutive_failures, 0);
    }

    #[test]
    fn monitor_errors_do_not_count_as_failures() {
        let c = run(ApiStatus::Active, &[ok(40), fail(503), monitor_error()]);
        assert_eq!(c.status, ApiStatus::Unknown);
        assert_eq!(c.consecutive_failures, 1);

        // The run of target failures continues across a monitor error.
        let c = run(ApiStatus::Unknown, &[fail(503), monitor_error(), fail(503)]);
        assert_eq!(c.status, ApiStatus::Down);
    }

    #[test]
    fn loose_status_match_is_degraded() {
        let mut accepted = ok(40);
        accepted.status_code = Some(202);
        let c = run(ApiStatus::Active, &[accepted]);
        assert_eq!(c.status, ApiStatus::Degraded);
        assert_eq!(
            c.degradation,
            Some(Degradation::LooseStatus {
                observed: 202,
                expected: 200
            })
        );
    }

    #[test]
    fn latency_above_baseline_is_degraded() {
        let c = run(ApiStatus::Active, &[ok(100), ok(100), ok(100), ok(450)]);
        assert_eq!(c.status, ApiStatus::Degraded);
        match c.degradation {
            Some(Degradation::Latency { baseline_ms, severe, .. }) => {
                assert_eq!(baseline_ms, 100);
                assert!(!severe);
            }
            other => panic!("unexpected degradation {other:?}"),
        }

        let c = run(ApiStatus::Active, &[ok(100), ok(100), ok(100), ok(700)]);
        assert!(matches!(
            c.degradation,
            Some(Degradation::Latency { severe: true, .. })
        ));
    }

    #[test]
    fn latency_needs_a_baseline_and_a_floor() {
        // Two prior samples are not a baseline yet.
        assert_eq!(run(ApiStatus::Active, &[ok(100), ok(100), ok(900)]).status, ApiStatus::Active);
        // Fast endpoints are never slow.
        assert_eq!(
            run(ApiStatus::Active, &[ok(10), ok(10), ok(10), ok(200)]).status,
            ApiStatus::Active
        );
    }

    #[test]
    fn deprecation_signal_is_sticky() {
        let mut deprecated = ok(40);
        deprecated.deprecation = DeprecationSignal::Deprecated;
        let c = run(ApiStatus::Active, &[deprecated]);
        assert_eq!(c.status, ApiStatus::Deprecated);

        // Later probes without the header do not lift it.
        let c = run(ApiStatus::Deprecated, &[deprecated, ok(40)]);
        assert_eq!(c.status, ApiStatus::Deprecated);
        let c = run(ApiStatus::Deprecated, &[deprecated, fail(500), fail(500)]);
        assert_eq!(c.status, ApiStatus::Deprecated);
    }

    #[test]
    fn explicit_undeprecation_reclassifies() {
        let mut lifted = ok(40);
        lifted.deprecation = DeprecationSignal::Undeprecated;
        let c = run(ApiStatus::Deprecated, &[lifted]);
        assert_eq!(c.status, ApiStatus::Active);
        assert!(c.undeprecated);
    }

    #[test]
    fn tagged_fingerprint_counts_as_deprecation() {
        let mut policy = ClassifierPolicy::default();
        policy.deprecated_fingerprints.insert("abc".to_string());
        let result = ProbeResult {
            checked_at: chrono::Utc::now(),
            success: true,
            status_code: Some(200),
            latency: std::time::Duration::from_millis(30),
            fingerprint: Some("abc".to_string()),
            error_kind: None,
            error_message: None,
            deprecation: DeprecationSignal::None,
        };
        let mut w = ProbeWindow::new(4);
        w.push(policy.sample(&result));
        assert_eq!(classify(ApiStatus::Active, &w, 200, &policy).status, ApiStatus::Deprecated);
    }

    #[test]
    fn classification_is_deterministic() {
        let samples = [ok(100), fail(500), ok(120)];
        assert_eq!(run(ApiStatus::Active, &samples), run(ApiStatus::Active, &samples));
    }
}
