//! The health-monitoring engine: probing, classification, alerting and the
//! scheduler that drives them.

pub mod alert_engine;
pub mod classifier;
pub mod fingerprint;
pub mod probe;
pub mod scheduler;
pub mod service;
pub mod window;

pub use classifier::{Classification, ClassifierPolicy};
pub use probe::{HttpProber, ProbeConfig, ProbeErrorKind, ProbeResult, Prober};
pub use scheduler::{CheckOutcome, CheckResult, Scheduler, SchedulerConfig, SchedulerError};
pub use service::{ConfigError, MonitorError, MonitorService};
