//! Up/down tracking with hysteresis.
//!
//! Each probe gets a [`ProbeEventTracker`] counting consecutive successes
//! and failures. A status flips only when a run exceeds its threshold:
//! down when `fail_count > fail_threshold` while up, up when
//! `success_count > success_threshold` while down. A single opposite
//! outcome resets the run.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::context::{probe_key, ProbeContext, PROBE_KEY};
use crate::error::EventError;
use crate::notification::{LogTrigger, TransitionEvent, Trigger};
use crate::probe::{Probe, DEFAULT_THRESHOLD};

/// Outcome records kept per probe.
pub const DEFAULT_HISTORY_WINDOW: usize = 30;

/// One probe run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRecord {
    pub down: bool,
    pub time: DateTime<Utc>,
}

/// Per-probe hysteresis state.
#[derive(Debug, Clone)]
pub struct ProbeEventTracker {
    probe_name: String,
    probe_id: String,
    fail_threshold: u32,
    success_threshold: u32,
    fail_count: u32,
    success_count: u32,
    first_up: DateTime<Utc>,
    last_up: DateTime<Utc>,
    first_down: DateTime<Utc>,
    last_down: DateTime<Utc>,
    last_status_down: bool,
    history: VecDeque<HistoryRecord>,
    window: usize,
}

/// Point-in-time copy of a tracker, plus the transition the last update fired.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub probe_name: String,
    pub probe_id: String,
    pub fail_threshold: u32,
    pub success_threshold: u32,
    pub fail_count: u32,
    pub success_count: u32,
    pub is_down: bool,
    pub first_up: DateTime<Utc>,
    pub last_up: DateTime<Utc>,
    pub first_down: DateTime<Utc>,
    pub last_down: DateTime<Utc>,
    pub history: Vec<HistoryRecord>,
    pub transition: Option<TransitionEvent>,
}

impl ProbeEventTracker {
    /// A tracker starts out down, with every timestamp at the Unix epoch.
    pub fn new(probe_name: impl Into<String>, probe_id: impl Into<String>) -> Self {
        Self {
            probe_name: probe_name.into(),
            probe_id: probe_id.into(),
            fail_threshold: DEFAULT_THRESHOLD,
            success_threshold: DEFAULT_THRESHOLD,
            fail_count: 0,
            success_count: 0,
            first_up: DateTime::UNIX_EPOCH,
            last_up: DateTime::UNIX_EPOCH,
            first_down: DateTime::UNIX_EPOCH,
            last_down: DateTime::UNIX_EPOCH,
            last_status_down: true,
            history: VecDeque::with_capacity(DEFAULT_HISTORY_WINDOW + 1),
            window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_thresholds(mut self, success_threshold: u32, fail_threshold: u32) -> Self {
        self.success_threshold = success_threshold;
        self.fail_threshold = fail_threshold;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn probe_name(&self) -> &str {
        &self.probe_name
    }

    pub fn is_down(&self) -> bool {
        self.last_status_down
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.history.iter()
    }

    fn set_thresholds(&mut self, success_threshold: u32, fail_threshold: u32) {
        self.success_threshold = success_threshold;
        self.fail_threshold = fail_threshold;
    }

    /// Record one outcome and return the transition it confirms, if any.
    pub fn record(&mut self, down: bool, time: DateTime<Utc>) -> Option<TransitionEvent> {
        if down {
            self.fail_count = self.fail_count.saturating_add(1);
            self.success_count = 0;
        } else {
            self.success_count = self.success_count.saturating_add(1);
            self.fail_count = 0;
        }

        self.history.push_back(HistoryRecord { down, time });
        while self.history.len() > self.window {
            self.history.pop_front();
        }

        if self.fail_count > self.fail_threshold && !self.last_status_down {
            self.last_status_down = true;
            let (first, previous) = self.run_boundary(self.fail_count);
            self.first_down = first;
            if let Some(previous) = previous {
                self.last_up = previous;
            }
            Some(self.transition())
        } else if self.success_count > self.success_threshold && self.last_status_down {
            self.last_status_down = false;
            let (first, previous) = self.run_boundary(self.success_count);
            self.first_up = first;
            if let Some(previous) = previous {
                self.last_down = previous;
            }
            Some(self.transition())
        } else {
            None
        }
    }

    /// Time of the first record of the current run and of the record before it.
    fn run_boundary(&self, run_length: u32) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        let run_length = usize::try_from(run_length).unwrap_or(usize::MAX);
        let first = self.history.len().saturating_sub(run_length);
        let first_time = self.history.get(first).map_or(DateTime::UNIX_EPOCH, |record| record.time);
        let previous = first.checked_sub(1).and_then(|index| self.history.get(index)).map(|record| record.time);
        (first_time, previous)
    }

    fn transition(&self) -> TransitionEvent {
        TransitionEvent {
            probe_name: self.probe_name.clone(),
            probe_id: self.probe_id.clone(),
            is_down: self.last_status_down,
            first_up: self.first_up,
            last_up: self.last_up,
            first_down: self.first_down,
            last_down: self.last_down,
        }
    }

    /// Record the outcome of a completed probe run.
    pub fn accept_probe_context(&mut self, ctx: &ProbeContext) -> Result<Option<TransitionEvent>, EventError> {
        let succeeded = ctx.get_bool(&probe_key(&self.probe_name, "success"))?;
        let started = ctx.get_time(&probe_key(&self.probe_name, "starttime"))?;
        Ok(self.record(!succeeded, started))
    }

    pub fn snapshot(&self, transition: Option<TransitionEvent>) -> TrackerSnapshot {
        TrackerSnapshot {
            probe_name: self.probe_name.clone(),
            probe_id: self.probe_id.clone(),
            fail_threshold: self.fail_threshold,
            success_threshold: self.success_threshold,
            fail_count: self.fail_count,
            success_count: self.success_count,
            is_down: self.last_status_down,
            first_up: self.first_up,
            last_up: self.last_up,
            first_down: self.first_down,
            last_down: self.last_down,
            history: self.history.iter().copied().collect(),
            transition,
        }
    }
}

/// Routes completed probe contexts to per-probe trackers and fires the trigger.
pub struct ProbeEventProcessor {
    trackers: RwLock<HashMap<String, Arc<Mutex<ProbeEventTracker>>>>,
    trigger: Arc<dyn Trigger>,
    window: usize,
}

impl Default for ProbeEventProcessor {
    fn default() -> Self {
        Self::new(Arc::new(LogTrigger))
    }
}

impl ProbeEventProcessor {
    pub fn new(trigger: Arc<dyn Trigger>) -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
            trigger,
            window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Create or update the tracker for `probe` using its configured thresholds.
    pub async fn register_probe(&self, probe: &Probe) {
        let mut trackers = self.trackers.write().await;
        match trackers.get(&probe.name) {
            Some(tracker) => tracker.lock().await.set_thresholds(probe.up_threshold, probe.down_threshold),
            None => {
                let tracker = ProbeEventTracker::new(&probe.name, &probe.id)
                    .with_thresholds(probe.up_threshold, probe.down_threshold)
                    .with_window(self.window);
                trackers.insert(probe.name.clone(), Arc::new(Mutex::new(tracker)));
            }
        }
    }

    async fn tracker_for(&self, name: &str, id: &str) -> Arc<Mutex<ProbeEventTracker>> {
        if let Some(tracker) = self.trackers.read().await.get(name) {
            return Arc::clone(tracker);
        }
        let mut trackers = self.trackers.write().await;
        Arc::clone(trackers.entry(name.to_string()).or_insert_with(|| {
            debug!(probe = %name, "creating event tracker");
            Arc::new(Mutex::new(ProbeEventTracker::new(name, id).with_window(self.window)))
        }))
    }

    /// Feed a completed probe context into its tracker.
    ///
    /// The trigger fires while the probe's tracker is locked, so transitions
    /// of one probe are delivered in order.
    pub async fn accept_probe_context(&self, ctx: &ProbeContext) -> Result<TrackerSnapshot, EventError> {
        let name = ctx.get_string(PROBE_KEY)?;
        let id = ctx.get_string(&probe_key(name, "id"))?;

        let tracker = self.tracker_for(name, id).await;
        let mut tracker = tracker.lock().await;
        let transition = tracker.accept_probe_context(ctx)?;
        if let Some(event) = &transition {
            debug!(probe = %name, is_down = event.is_down, "status transition confirmed");
            self.trigger.fire(event);
        }
        Ok(tracker.snapshot(transition))
    }

    /// Current state of a probe's tracker.
    pub async fn snapshot(&self, name: &str) -> Option<TrackerSnapshot> {
        let tracker = self.trackers.read().await.get(name).cloned()?;
        let tracker = tracker.lock().await;
        Some(tracker.snapshot(None))
    }

    pub async fn probe_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.trackers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_first_success_run_fires_up() {
        let mut tracker = ProbeEventTracker::new("Local", "local-1");
        assert!(tracker.record(false, at(0)).is_none());
        assert!(tracker.record(false, at(1)).is_none());
        let event = tracker.record(false, at(2)).expect("third success fires");
        assert!(!event.is_down);
        assert_eq!(event.first_up, at(0));
        assert_eq!(event.last_down, DateTime::UNIX_EPOCH);
        assert!(event.is_first_this_year());
    }

    #[test]
    fn test_down_boundary_is_first_failure() {
        let mut tracker = ProbeEventTracker::new("Local", "local-1");
        for second in 0..5 {
            tracker.record(false, at(second));
        }
        assert!(!tracker.is_down());

        assert!(tracker.record(true, at(10)).is_none());
        assert!(tracker.record(true, at(11)).is_none());
        let event = tracker.record(true, at(12)).expect("third failure fires");
        assert!(event.is_down);
        assert_eq!(event.first_down, at(10));
        assert_eq!(event.last_up, at(4));
        assert_eq!(event.previous_span(), TimeDelta::seconds(10));
    }

    #[test]
    fn test_single_failure_resets_nothing_fires() {
        let mut tracker = ProbeEventTracker::new("Local", "local-1");
        for second in 0..3 {
            tracker.record(false, at(second));
        }
        let outcomes = [true, false, true, false, false, true, false];
        for (offset, down) in outcomes.into_iter().enumerate() {
            assert!(tracker.record(down, at(10 + offset as i64)).is_none());
        }
        assert!(!tracker.is_down());
    }

    #[test]
    fn test_history_window_is_capped() {
        let mut tracker = ProbeEventTracker::new("Local", "local-1").with_window(5);
        for second in 0..12 {
            tracker.record(second % 2 == 0, at(second));
        }
        let history: Vec<_> = tracker.history().map(|record| record.time).collect();
        assert_eq!(history, (7..12).map(at).collect::<Vec<_>>());
    }

    #[test]
    fn test_context_without_outcome_is_rejected() {
        let mut tracker = ProbeEventTracker::new("Local", "local-1");
        let ctx = ProbeContext::new();
        assert_eq!(
            tracker.accept_probe_context(&ctx).unwrap_err(),
            EventError::MissingKey("probe.Local.success".to_string())
        );
    }

    #[tokio::test]
    async fn test_registered_thresholds_are_used() {
        let processor = ProbeEventProcessor::default();
        let probe = Probe::new("Local", "local-1", "http://localhost").with_thresholds(0, 0);
        processor.register_probe(&probe).await;

        let mut ctx = ProbeContext::new();
        ctx.insert(PROBE_KEY, "Local");
        ctx.insert("probe.Local.id", "local-1");
        ctx.insert("probe.Local.success", true);
        ctx.insert("probe.Local.starttime", at(0));

        let snapshot = processor.accept_probe_context(&ctx).await.unwrap();
        assert!(snapshot.transition.is_some());
        assert!(!snapshot.is_down);
        assert_eq!(processor.probe_names().await, vec!["Local".to_string()]);
    }
}
