use std::collections::VecDeque;

use crate::monitoring::probe::{DeprecationSignal, ProbeErrorKind, ProbeResult};

/// The part of a [`ProbeResult`] the classifier looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSample {
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub error_kind: Option<ProbeErrorKind>,
    pub deprecation: DeprecationSignal,
}

impl ProbeSample {
    pub fn is_monitor_error(&self) -> bool {
        self.error_kind.is_some_and(ProbeErrorKind::is_monitor_side)
    }
}

impl From<&ProbeResult> for ProbeSample {
    fn from(result: &ProbeResult) -> Self {
        Self {
            success: result.success,
            status_code: result.status_code,
            latency_ms: result.latency_ms(),
            error_kind: result.error_kind,
            deprecation: result.deprecation,
        }
    }
}

/// Fixed-capacity ring of the most recent probe samples for one API.
///
/// Failures that no longer fit (evicted, or persisted before a restart) are
/// kept as a count so a failure run is never capped by the capacity.
#[derive(Debug, Clone)]
pub struct ProbeWindow {
    samples: VecDeque<ProbeSample>,
    capacity: usize,
    carried_failures: u32,
}

impl ProbeWindow {
    pub fn new(capacity: usize) -> Self {
        Self::with_carried_failures(capacity, 0)
    }

    /// A window that continues a failure run of `failures` probes.
    pub fn with_carried_failures(capacity: usize, failures: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            carried_failures: failures,
        }
    }

    pub fn push(&mut self, sample: ProbeSample) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                if evicted.success {
                    self.carried_failures = 0;
                } else if !evicted.is_monitor_error() {
                    self.carried_failures = self.carried_failures.saturating_add(1);
                }
            }
        }
        if sample.success {
            self.carried_failures = 0;
        }
        self.samples.push_back(sample);
    }

    /// Failures that precede every sample still held. Only meaningful while
    /// the window holds no success.
    pub fn carried_failures(&self) -> u32 {
        self.carried_failures
    }

    pub fn latest(&self) -> Option<&ProbeSample> {
        self.samples.back()
    }

    /// Newest first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &ProbeSample> {
        self.samples.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.carried_failures = 0;
    }
}
