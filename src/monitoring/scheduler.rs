//! Scheduler: owns the probe cadence of every tracked API.
//!
//! Each API has one slot. A slot is either idle, probing, or deleted while a
//! probe was still in flight. At most one probe per API is in flight at any
//! time; an on-demand check that arrives while a probe is running waits for
//! that probe's result. Probes run as separate tasks bounded by a global
//! semaphore, so a slow target never delays another API's probe.
//!
//! Applying a result (classification, alert evaluation and the store commit)
//! happens under a per-API async lock that owner edits and deletions also
//! take. The lock is never held across the network call itself.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::db::entities::{alert, health_check, tracked_api};
use crate::db::enums::{AlertType, ApiStatus};
use crate::db::store::{
    ApiSettings, CheckCommit, CommitOutcome, HistoryStore, NewHealthCheck, StoreError,
};
use crate::monitoring::alert_engine::{self, Transition};
use crate::monitoring::classifier::{Classification, ClassifierPolicy, classify};
use crate::monitoring::probe::{ProbeErrorKind, ProbeResult, Prober};
use crate::monitoring::window::ProbeWindow;
use crate::notifications::AlertNotifier;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_probes: usize,
    pub min_check_interval_seconds: i32,
    /// Intervals accepted even when below the floor.
    pub allowed_check_intervals: Vec<i32>,
    pub default_check_interval_seconds: i32,
    pub first_check_delay_seconds: u64,
    pub persistence_retry_seconds: u64,
    /// Hard stop for a single probe, on top of the HTTP client timeout.
    pub probe_deadline_seconds: u64,
    pub window_size: usize,
    pub drain_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 10,
            min_check_interval_seconds: 300,
            allowed_check_intervals: vec![300, 900, 1800, 3600, 86400],
            default_check_interval_seconds: 3600,
            first_check_delay_seconds: 60,
            persistence_retry_seconds: 30,
            probe_deadline_seconds: 30,
            window_size: 10,
            drain_timeout_seconds: 15,
        }
    }
}

impl SchedulerConfig {
    pub fn first_check_delay(&self) -> Duration {
        Duration::from_secs(self.first_check_delay_seconds)
    }

    pub fn persistence_retry(&self) -> Duration {
        Duration::from_secs(self.persistence_retry_seconds.max(1))
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_secs(self.probe_deadline_seconds.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("API {0} is not tracked")]
    ApiNotFound(i32),
    #[error("API {0} was deleted")]
    Deleted(i32),
    #[error("Scheduler is shutting down")]
    ShuttingDown,
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
    /// A second probe for the same API completed; its result was discarded.
    #[error("Concurrent probe detected for API {0}")]
    ConcurrencyViolation(i32),
}

/// The applied result of one probe.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub api_id: i32,
    pub probe: ProbeResult,
    pub classification: Classification,
    pub record: Option<health_check::Model>,
    pub opened_alerts: Vec<alert::Model>,
    /// Open alerts that took a new severity or wording from this probe.
    pub updated_alerts: Vec<alert::Model>,
    pub resolved_alerts: Vec<alert::Model>,
}

pub type CheckResult = Result<CheckOutcome, SchedulerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    Probing,
    /// Deleted while a probe was in flight; the slot goes away when it lands.
    Deleted,
}

struct InFlight {
    probe_id: u64,
    waiters: Vec<oneshot::Sender<CheckResult>>,
}

struct ApiSlot {
    api: tracked_api::Model,
    window: ProbeWindow,
    phase: SlotPhase,
    in_flight: Option<InFlight>,
    next_due: Option<Instant>,
    /// A scheduled tick fired while an on-demand probe was running.
    due_while_probing: bool,
    /// Bumped on every (re)schedule; older queue entries are stale.
    generation: u64,
    apply_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ApiSlot {
    fn new(api: tracked_api::Model, window_size: usize) -> Self {
        // Continue the failure run persisted before a restart.
        let carried = u32::try_from(api.consecutive_failures).unwrap_or(0);
        Self {
            window: ProbeWindow::with_carried_failures(window_size, carried),
            api,
            phase: SlotPhase::Idle,
            in_flight: None,
            next_due: None,
            due_while_probing: false,
            generation: 0,
            apply_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn in_flight_id(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.probe_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    due: Instant,
    api_id: i32,
    generation: u64,
}

struct ProbeTicket {
    api_id: i32,
    probe_id: u64,
    api: tracked_api::Model,
    scheduled: bool,
}

struct SchedulerState {
    slots: HashMap<i32, ApiSlot>,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    accepting: bool,
    next_probe_id: u64,
    window_size: usize,
}

impl SchedulerState {
    /// Inserts or refreshes the slot for `api`, queueing it at `due`.
    fn track(&mut self, api: tracked_api::Model, due: Option<Instant>) {
        let api_id = api.id;
        let window_size = self.window_size;
        let slot = self
            .slots
            .entry(api_id)
            .or_insert_with(|| ApiSlot::new(api.clone(), window_size));
        slot.api = api;
        if let Some(due) = due {
            self.schedule(api_id, due);
        }
    }

    fn schedule(&mut self, api_id: i32, due: Instant) {
        let Some(slot) = self.slots.get_mut(&api_id) else {
            return;
        };
        slot.generation += 1;
        if !slot.api.is_active || slot.phase == SlotPhase::Deleted {
            slot.next_due = None;
            return;
        }
        slot.next_due = Some(due);
        self.queue.push(Reverse(QueueEntry {
            due,
            api_id,
            generation: slot.generation,
        }));
    }

    fn unschedule(&mut self, api_id: i32) {
        if let Some(slot) = self.slots.get_mut(&api_id) {
            slot.generation += 1;
            slot.next_due = None;
        }
    }

    fn begin_probe(
        &mut self,
        api_id: i32,
        scheduled: bool,
        waiter: Option<oneshot::Sender<CheckResult>>,
    ) -> Option<ProbeTicket> {
        let probe_id = self.next_probe_id;
        let slot = self.slots.get_mut(&api_id)?;
        if slot.phase != SlotPhase::Idle {
            return None;
        }
        self.next_probe_id += 1;
        slot.phase = SlotPhase::Probing;
        slot.in_flight = Some(InFlight {
            probe_id,
            waiters: waiter.into_iter().collect(),
        });
        if scheduled {
            slot.next_due = None;
        }
        Some(ProbeTicket {
            api_id,
            probe_id,
            api: slot.api.clone(),
            scheduled,
        })
    }

    /// The slot a probe result may be applied to.
    fn slot_for(&self, ticket: &ProbeTicket) -> Result<&ApiSlot, SchedulerError> {
        match self.slots.get(&ticket.api_id) {
            None => Err(SchedulerError::Deleted(ticket.api_id)),
            Some(slot) if slot.phase == SlotPhase::Deleted => {
                Err(SchedulerError::Deleted(ticket.api_id))
            }
            Some(slot) if slot.in_flight_id() != Some(ticket.probe_id) => {
                error!(
                    api_id = ticket.api_id,
                    probe_id = ticket.probe_id,
                    in_flight = ?slot.in_flight_id(),
                    "Concurrency violation: result from a probe that does not own the slot. Discarding it."
                );
                Err(SchedulerError::ConcurrencyViolation(ticket.api_id))
            }
            Some(slot) => Ok(slot),
        }
    }
}

struct Shared {
    store: Arc<dyn HistoryStore>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn AlertNotifier>,
    policy: ClassifierPolicy,
    config: SchedulerConfig,
    permits: Semaphore,
    state: Mutex<SchedulerState>,
    wake: Notify,
    active_probes: AtomicUsize,
    drained: Notify,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Scheduler {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn AlertNotifier>,
        policy: ClassifierPolicy,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let state = SchedulerState {
            slots: HashMap::new(),
            queue: BinaryHeap::new(),
            accepting: true,
            next_probe_id: 1,
            window_size: config.window_size,
        };
        Self {
            shared: Arc::new(Shared {
                store,
                prober,
                notifier,
                policy,
                permits: Semaphore::new(config.max_concurrent_probes.max(1)),
                config,
                state: Mutex::new(state),
                wake: Notify::new(),
                active_probes: AtomicUsize::new(0),
                drained: Notify::new(),
                shutdown,
            }),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.shared.store
    }

    /// Loads every active API from the store and starts dispatching.
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        let apis = self.shared.store.load_active_apis().await?;
        let count = apis.len();
        {
            let mut state = self.shared.state();
            for api in apis {
                let due = due_at(api.next_check_at);
                state.track(api, Some(due));
            }
        }

        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.is_none() {
            let shutdown_rx = self.shared.shutdown.subscribe();
            *dispatcher = Some(tokio::spawn(run_dispatcher(
                self.shared.clone(),
                shutdown_rx,
            )));
        }
        info!(apis = count, "Health-check scheduler started.");
        Ok(count)
    }

    pub async fn register(
        &self,
        user_id: i32,
        settings: ApiSettings,
    ) -> Result<tracked_api::Model, SchedulerError> {
        if !self.shared.state().accepting {
            return Err(SchedulerError::ShuttingDown);
        }
        let delay = self.shared.config.first_check_delay();
        let now = Utc::now();
        let first_check =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let api = self
            .shared
            .store
            .insert_api(user_id, settings, first_check, now)
            .await?;

        self.shared
            .state()
            .track(api.clone(), Some(Instant::now() + delay));
        self.shared.wake.notify_one();
        info!(api_id = api.id, user_id, name = %api.name, "Tracked API registered.");
        Ok(api)
    }

    /// Applies owner edits. Any edit lifts a sticky DEPRECATED status. A new
    /// interval takes effect from the last check.
    pub async fn update_api(
        &self,
        api_id: i32,
        settings: ApiSettings,
    ) -> Result<Option<tracked_api::Model>, SchedulerError> {
        let apply_lock = self.apply_lock(api_id);
        let _guard = match &apply_lock {
            Some(l) => Some(l.lock().await),
            None => None,
        };

        let Some(updated) = self
            .shared
            .store
            .update_api(api_id, settings, true, Utc::now())
            .await?
        else {
            return Ok(None);
        };

        {
            let mut guard = self.shared.state();
            let state = &mut *guard;
            let reschedule = match state.slots.get_mut(&api_id) {
                Some(slot) if slot.phase == SlotPhase::Deleted => None,
                Some(slot) => {
                    let cadence_changed = slot.api.check_interval_seconds
                        != updated.check_interval_seconds
                        || slot.api.is_active != updated.is_active;
                    if slot.api.current_status == ApiStatus::Deprecated
                        && updated.current_status != ApiStatus::Deprecated
                    {
                        slot.window.clear();
                    }
                    slot.api = updated.clone();
                    if !updated.is_active {
                        Some(None)
                    } else if cadence_changed {
                        Some(Some(due_after_edit(&updated)))
                    } else {
                        None
                    }
                }
                None => {
                    if updated.is_active {
                        state.track(updated.clone(), Some(due_at(updated.next_check_at)));
                    }
                    None
                }
            };
            match reschedule {
                Some(Some(due)) => state.schedule(api_id, due),
                Some(None) => state.unschedule(api_id),
                None => {}
            }
        }
        self.shared.wake.notify_one();
        debug!(api_id, "Tracked API updated.");
        Ok(Some(updated))
    }

    /// Removes the API. A probe still in flight finishes but its result is
    /// discarded.
    pub async fn delete_api(&self, api_id: i32) -> Result<bool, SchedulerError> {
        let apply_lock = self.apply_lock(api_id);
        let _guard = match &apply_lock {
            Some(l) => Some(l.lock().await),
            None => None,
        };

        let deleted = self.shared.store.delete_api(api_id).await?;
        {
            let mut guard = self.shared.state();
            let state = &mut *guard;
            if let Some(slot) = state.slots.get_mut(&api_id) {
                slot.generation += 1;
                slot.next_due = None;
                if slot.phase == SlotPhase::Probing {
                    slot.phase = SlotPhase::Deleted;
                } else {
                    state.slots.remove(&api_id);
                }
            }
        }
        if deleted {
            info!(api_id, "Tracked API deleted.");
        }
        Ok(deleted)
    }

    /// Makes sure an API loaded outside the scheduler (e.g. an inactive one)
    /// has a slot, so it can be checked on demand.
    pub fn ensure_tracked(&self, api: &tracked_api::Model) {
        let mut state = self.shared.state();
        if state.slots.contains_key(&api.id) {
            return;
        }
        let due = api.is_active.then(|| due_at(api.next_check_at));
        state.track(api.clone(), due);
        drop(state);
        self.shared.wake.notify_one();
    }

    /// Probes now without touching the regular cadence. Joins the in-flight
    /// probe instead when there is one.
    pub async fn check_now(&self, api_id: i32) -> CheckResult {
        let (rx, ticket) = {
            let mut guard = self.shared.state();
            let state = &mut *guard;
            if !state.accepting {
                return Err(SchedulerError::ShuttingDown);
            }
            let Some(slot) = state.slots.get_mut(&api_id) else {
                return Err(SchedulerError::ApiNotFound(api_id));
            };
            let (tx, rx) = oneshot::channel();
            match slot.phase {
                SlotPhase::Deleted => return Err(SchedulerError::Deleted(api_id)),
                SlotPhase::Probing => {
                    if let Some(in_flight) = slot.in_flight.as_mut() {
                        in_flight.waiters.push(tx);
                    }
                    debug!(api_id, "Check requested while a probe is in flight; joining it.");
                    (rx, None)
                }
                SlotPhase::Idle => (rx, state.begin_probe(api_id, false, Some(tx))),
            }
        };
        if let Some(ticket) = ticket {
            spawn_probe(self.shared.clone(), ticket);
        }
        rx.await.map_err(|_| SchedulerError::ShuttingDown)?
    }

    /// Stops dispatching, then waits (bounded) for in-flight probes.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state();
            state.accepting = false;
            state.queue.clear();
        }
        self.shared.shutdown.send_replace(true);

        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatcher task ended abnormally.");
            }
        }

        let shared = &self.shared;
        let drain = async {
            loop {
                let notified = shared.drained.notified();
                if shared.active_probes.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(shared.config.drain_timeout(), drain).await {
            Ok(()) => info!("Health-check scheduler stopped; no probes in flight."),
            Err(_) => warn!(
                in_flight = shared.active_probes.load(Ordering::SeqCst),
                "Drain timeout elapsed with probes still in flight."
            ),
        }
    }

    pub fn phase(&self, api_id: i32) -> Option<SlotPhase> {
        self.shared.state().slots.get(&api_id).map(|s| s.phase)
    }

    pub fn next_due(&self, api_id: i32) -> Option<Instant> {
        self.shared.state().slots.get(&api_id).and_then(|s| s.next_due)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.active_probes.load(Ordering::SeqCst)
    }

    pub fn tracked_apis(&self) -> usize {
        self.shared.state().slots.len()
    }

    fn apply_lock(&self, api_id: i32) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.shared
            .state()
            .slots
            .get(&api_id)
            .map(|s| s.apply_lock.clone())
    }
}

async fn run_dispatcher(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let next_wake = dispatch_due(&shared);
        let sleep = async move {
            match next_wake {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = shared.wake.notified() => {}
            _ = sleep => {}
        }
    }
    debug!("Health-check dispatcher exited.");
}

/// Starts every probe whose due time has passed. Returns when to wake next.
fn dispatch_due(shared: &Arc<Shared>) -> Option<Instant> {
    let mut tickets = Vec::new();
    let next_wake = {
        let mut guard = shared.state();
        let state = &mut *guard;
        if !state.accepting {
            return None;
        }
        let now = Instant::now();
        while let Some(Reverse(entry)) = state.queue.pop() {
            if entry.due > now {
                state.queue.push(Reverse(entry));
                break;
            }
            let Some(slot) = state.slots.get_mut(&entry.api_id) else {
                continue;
            };
            if slot.generation != entry.generation {
                continue;
            }
            match slot.phase {
                SlotPhase::Idle => {
                    if let Some(ticket) = state.begin_probe(entry.api_id, true, None) {
                        tickets.push(ticket);
                    }
                }
                SlotPhase::Probing => {
                    debug!(api_id = entry.api_id, "Scheduled check deferred until the in-flight probe completes.");
                    slot.due_while_probing = true;
                }
                SlotPhase::Deleted => {}
            }
        }
        state.queue.peek().map(|Reverse(entry)| entry.due)
    };
    for ticket in tickets {
        spawn_probe(shared.clone(), ticket);
    }
    next_wake
}

fn spawn_probe(shared: Arc<Shared>, ticket: ProbeTicket) {
    shared.active_probes.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        let result = execute(&shared, &ticket).await;
        finish(&shared, &ticket, result);
        if shared.active_probes.fetch_sub(1, Ordering::SeqCst) == 1 {
            shared.drained.notify_waiters();
        }
    });
}

async fn execute(shared: &Shared, ticket: &ProbeTicket) -> CheckResult {
    let probe = {
        let _permit = shared
            .permits
            .acquire()
            .await
            .map_err(|_| SchedulerError::ShuttingDown)?;
        let deadline = shared.config.probe_deadline();
        match tokio::time::timeout(deadline, shared.prober.probe(&ticket.api)).await {
            Ok(result) => result,
            Err(_) => ProbeResult::failure(
                ProbeErrorKind::Timeout,
                format!("Probe did not finish within {}s", deadline.as_secs()),
                deadline,
            ),
        }
    };
    debug!(
        api_id = ticket.api_id,
        success = probe.success,
        status_code = ?probe.status_code,
        latency_ms = probe.latency_ms(),
        "Probe finished."
    );
    apply(shared, ticket, probe).await
}

struct Prepared {
    commit: CheckCommit,
    classification: Classification,
    window: ProbeWindow,
    previous: ApiStatus,
}

fn prepare(
    slot: &ApiSlot,
    ticket: &ProbeTicket,
    probe: &ProbeResult,
    policy: &ClassifierPolicy,
) -> Prepared {
    let mut window = slot.window.clone();
    window.push(policy.sample(probe));
    let expected = u16::try_from(slot.api.expected_status).unwrap_or(200);
    let classification = classify(slot.api.current_status, &window, expected, policy);

    let new_fingerprint = if probe.success {
        probe.fingerprint.clone()
    } else {
        None
    };
    let alerts = alert_engine::evaluate(&Transition {
        api: &slot.api,
        classification: &classification,
        probe,
        new_fingerprint: new_fingerprint.as_deref(),
    });
    let next_check_at = ticket.scheduled.then(|| {
        probe.checked_at + chrono::Duration::seconds(i64::from(slot.api.check_interval_seconds.max(1)))
    });

    Prepared {
        commit: CheckCommit {
            api_id: ticket.api_id,
            checked_at: probe.checked_at,
            status: classification.status,
            consecutive_failures: i32::try_from(classification.consecutive_failures)
                .unwrap_or(i32::MAX),
            fingerprint: new_fingerprint,
            next_check_at,
            record: NewHealthCheck {
                http_status: probe.status_code.map(i32::from),
                response_time_ms: i32::try_from(probe.latency_ms()).unwrap_or(i32::MAX),
                is_up: probe.success,
                error_kind: probe.error_kind.map(|k| k.as_str().to_string()),
                error_message: probe.error_message.clone(),
                fingerprint: probe.fingerprint.clone(),
            },
            alerts,
        },
        classification,
        window,
        previous: slot.api.current_status,
    }
}

async fn apply(shared: &Shared, ticket: &ProbeTicket, probe: ProbeResult) -> CheckResult {
    let apply_lock = shared.state().slot_for(ticket)?.apply_lock.clone();
    let _guard = apply_lock.lock().await;

    // Re-read under the apply lock: an edit or a deletion may have landed
    // while this probe was on the wire.
    let prepared = {
        let state = shared.state();
        let slot = state.slot_for(ticket)?;
        prepare(slot, ticket, &probe, &shared.policy)
    };
    let Prepared {
        commit,
        classification,
        window,
        previous,
    } = prepared;
    let api_id = ticket.api_id;
    let fingerprint = commit.fingerprint.clone();
    let next_check_at = commit.next_check_at;
    let checked_at = commit.checked_at;

    let receipt = match shared.store.commit_check(commit).await {
        Ok(CommitOutcome::Applied(receipt)) => receipt,
        Ok(CommitOutcome::ApiMissing) => {
            info!(api_id, "API deleted while its probe was in flight; result discarded.");
            return Err(SchedulerError::Deleted(api_id));
        }
        Err(e) => {
            warn!(api_id, error = %e, "Failed to persist health check; it will be retried.");
            return Err(SchedulerError::Persistence(e));
        }
    };

    let api_after = {
        let mut state = shared.state();
        match state.slots.get_mut(&api_id) {
            Some(slot) if slot.phase != SlotPhase::Deleted => {
                slot.window = window;
                slot.api.current_status = classification.status;
                slot.api.last_checked = Some(checked_at);
                slot.api.consecutive_failures =
                    i32::try_from(classification.consecutive_failures).unwrap_or(i32::MAX);
                if fingerprint.is_some() {
                    slot.api.last_fingerprint = fingerprint;
                }
                if next_check_at.is_some() {
                    slot.api.next_check_at = next_check_at;
                }
                slot.api.clone()
            }
            _ => ticket.api.clone(),
        }
    };

    if previous != classification.status {
        info!(
            api_id,
            from = %previous,
            to = %classification.status,
            "API status changed."
        );
    } else if !probe.success && !probe.is_monitor_error() {
        warn!(
            api_id,
            error_kind = ?probe.error_kind,
            consecutive_failures = classification.consecutive_failures,
            "Health check failed."
        );
    }
    for alert in &receipt.opened {
        info!(api_id, alert_id = alert.id, alert_type = %alert.alert_type, severity = %alert.severity, "Alert opened.");
        spawn_notify(shared, &api_after, alert);
    }
    for alert in &receipt.updated {
        info!(api_id, alert_id = alert.id, alert_type = %alert.alert_type, severity = %alert.severity, "Open alert updated.");
        // A repeated STATUS_CHANGE or RESPONSE_CHANGE is a new event.
        if matches!(alert.alert_type, AlertType::StatusChange | AlertType::ResponseChange) {
            spawn_notify(shared, &api_after, alert);
        }
    }
    for alert in &receipt.resolved {
        info!(api_id, alert_id = alert.id, alert_type = %alert.alert_type, "Alert resolved.");
    }

    Ok(CheckOutcome {
        api_id,
        probe,
        classification,
        record: receipt.record,
        opened_alerts: receipt.opened,
        updated_alerts: receipt.updated,
        resolved_alerts: receipt.resolved,
    })
}

fn spawn_notify(shared: &Shared, api: &tracked_api::Model, alert: &alert::Model) {
    let notifier = shared.notifier.clone();
    let api = api.clone();
    let alert = alert.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&api, &alert).await {
            warn!(alert_id = alert.id, error = %e, "Failed to deliver alert notification.");
        }
    });
}

/// Releases the slot, hands the result to any waiters and decides what runs
/// next for this API.
fn finish(shared: &Arc<Shared>, ticket: &ProbeTicket, result: CheckResult) {
    let (waiters, follow_up) = {
        let mut guard = shared.state();
        let state = &mut *guard;
        let Some(slot) = state.slots.get_mut(&ticket.api_id) else {
            return;
        };
        if slot.in_flight_id() != Some(ticket.probe_id) {
            return;
        }
        let waiters = slot.in_flight.take().map(|f| f.waiters).unwrap_or_default();

        if slot.phase == SlotPhase::Deleted {
            state.slots.remove(&ticket.api_id);
            (waiters, None)
        } else {
            slot.phase = SlotPhase::Idle;
            let due_while_probing = std::mem::take(&mut slot.due_while_probing);
            let interval = slot.api.check_interval();
            let follow_up = if ticket.scheduled {
                // A failed commit keeps the check due: retry soon rather than
                // skip a whole interval.
                let delay = match &result {
                    Err(SchedulerError::Persistence(_)) => shared.config.persistence_retry(),
                    _ => interval,
                };
                state.schedule(ticket.api_id, Instant::now() + delay);
                None
            } else if due_while_probing && state.accepting {
                state.begin_probe(ticket.api_id, true, None)
            } else {
                None
            };
            (waiters, follow_up)
        }
    };

    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
    if let Some(ticket) = follow_up {
        spawn_probe(shared.clone(), ticket);
    }
    shared.wake.notify_one();
}

/// Converts a persisted due time into a scheduler instant; overdue checks
/// are due now.
fn due_at(next_check_at: Option<DateTime<Utc>>) -> Instant {
    let now = Instant::now();
    next_check_at
        .and_then(|at| (at - Utc::now()).to_std().ok())
        .map_or(now, |wait| now + wait)
}

fn due_after_edit(api: &tracked_api::Model) -> Instant {
    let base = api
        .last_checked
        .map(|at| at + chrono::Duration::seconds(i64::from(api.check_interval_seconds.max(1))))
        .or(api.next_check_at);
    due_at(base)
}
