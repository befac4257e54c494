#![allow(dead_code)]

use apiwatch::db::entities::{alert, tracked_api};
use apiwatch::db::enums::AlertType;
use apiwatch::db::store::{ApiSettings, MemoryStore};
use apiwatch::monitoring::probe::DeprecationSignal;
use apiwatch::monitoring::{
    ClassifierPolicy, ProbeErrorKind, ProbeResult, Prober, Scheduler, SchedulerConfig,
};
use apiwatch::notifications::{AlertNotifier, NotifyError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// Replays queued results in order; answers 200 once the queue runs dry.
#[derive(Default)]
pub struct ScriptedProber {
    script: Mutex<VecDeque<ProbeResult>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
    pub started: Notify,
}

impl ScriptedProber {
    pub fn new(results: impl IntoIterator<Item = ProbeResult>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Every probe blocks until [`ScriptedProber::release`] is called.
    pub fn gated(results: impl IntoIterator<Item = ProbeResult>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(results)
        }
    }

    pub fn push(&self, result: ProbeResult) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, _api: &tracked_api::Model) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| ok(200, "steady"))
    }
}

pub fn ok(status: u16, fingerprint: &str) -> ProbeResult {
    ProbeResult {
        checked_at: Utc::now(),
        success: true,
        status_code: Some(status),
        latency: Duration::from_millis(40),
        fingerprint: Some(fingerprint.to_string()),
        error_kind: None,
        error_message: None,
        deprecation: DeprecationSignal::None,
    }
}

pub fn server_error(status: u16) -> ProbeResult {
    ProbeResult {
        status_code: Some(status),
        ..ProbeResult::failure(
            ProbeErrorKind::UnexpectedStatus,
            format!("Expected status 200 but got {status}"),
            Duration::from_millis(40),
        )
    }
}

pub fn deprecated(fingerprint: &str) -> ProbeResult {
    ProbeResult {
        deprecation: DeprecationSignal::Deprecated,
        ..ok(200, fingerprint)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(i32, AlertType)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(i32, AlertType)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn notify(
        &self,
        api: &tracked_api::Model,
        alert: &alert::Model,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((api.id, alert.alert_type));
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub prober: Arc<ScriptedProber>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<Scheduler>,
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        first_check_delay_seconds: 60,
        persistence_retry_seconds: 30,
        ..Default::default()
    }
}

/// For gated probes under paused time: the outer probe deadline must not fire
/// while a test holds the gate.
pub fn patient_config() -> SchedulerConfig {
    SchedulerConfig {
        probe_deadline_seconds: 86_400,
        ..test_config()
    }
}

pub fn harness(prober: ScriptedProber) -> Harness {
    harness_with(prober, test_config())
}

pub fn harness_with(prober: ScriptedProber, config: SchedulerConfig) -> Harness {
    harness_with_policy(prober, config, ClassifierPolicy::default())
}

pub fn harness_with_policy(
    prober: ScriptedProber,
    config: SchedulerConfig,
    policy: ClassifierPolicy,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let prober = Arc::new(prober);
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        prober.clone(),
        notifier.clone(),
        policy,
        config,
    ));
    Harness {
        store,
        prober,
        notifier,
        scheduler,
    }
}

pub fn settings(name: &str, interval: i32) -> ApiSettings {
    ApiSettings {
        name: name.to_string(),
        base_url: "https://api.example.com".to_string(),
        documentation_url: None,
        health_check_url: Some("https://api.example.com/health".to_string()),
        http_method: "GET".to_string(),
        expected_status: 200,
        check_interval_seconds: interval,
        is_active: true,
    }
}

/// Polls until `check` holds; spawned notifier tasks land asynchronously.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
