//! ProbeMesh - chained HTTP probing for a pool of coordinating minions
//!
//! This library provides the pieces a minion node needs:
//! - cron-like schedules deciding when a probe runs
//! - an execution context accumulating everything a probe run observed
//! - a sandboxed expression language evaluated against that context
//! - the probe engine executing chained HTTP requests
//! - hysteresis based up/down tracking and notification triggers
//! - the UDP rank-voting protocol electing a leader among minions

pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod expr;
pub mod minion;
pub mod notification;
pub mod probe;
pub mod schedule;
pub mod scheduler;

// Re-export main types
pub use context::{ContextValue, ProbeContext};
pub use engine::{execute_probe, execute_probe_request, ExecuteOptions, RunOutcome};
pub use error::{ContextError, EventError, ProbeError, ProtocolError, ScheduleError};
pub use event::{ProbeEventProcessor, ProbeEventTracker, TrackerSnapshot};
pub use expr::{evaluate, EvalError, Evaluator, Value, ValueKind};
pub use minion::{Coordinator, CoordinatorConfig, Message};
pub use notification::{ChannelTrigger, LogTrigger, TransitionEvent, Trigger};
pub use probe::{Probe, ProbeRequest};
pub use schedule::{Interval, Schedule};
pub use scheduler::ProbeScheduler;

/// Re-export common error types
pub use anyhow;

/// The version of the probe configuration format
pub const CONFIG_VERSION: &str = "1.0.0";

/// Default per-request HTTP timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
