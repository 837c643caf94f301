//! Runs registered probes whenever their schedule matches.
//!
//! Every second the scheduler checks each probe's schedule. A matching probe
//! runs on its own task with a fresh context, and the finished context is
//! handed to the event processor. A probe never has two runs in flight: a
//! tick that lands while the previous run is still going is skipped.
//!
//! Ticks are matched against wall-clock seconds. When a tick lands late and
//! a second goes by unseen, that second is checked on the next tick, so a
//! schedule matching only that second still runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ProbeContext;
use crate::engine::{execute_probe, ExecuteOptions, RunOutcome};
use crate::error::{ProbeError, ScheduleError};
use crate::event::{ProbeEventProcessor, TrackerSnapshot};
use crate::probe::Probe;
use crate::schedule::Schedule;

/// Scheduler tick period.
pub const TICK: Duration = Duration::from_secs(1);

/// Longest gap of missed seconds replayed after a late tick. Larger gaps
/// (suspend, clock jumps) only check the current second.
pub const MAX_CATCH_UP_SECONDS: i64 = 60;

struct ScheduledProbe {
    probe: Arc<Probe>,
    schedule: Schedule,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when a run ends, even if it panicked.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ProbeScheduler {
    probes: Vec<ScheduledProbe>,
    processor: Arc<ProbeEventProcessor>,
    options: ExecuteOptions,
}

impl ProbeScheduler {
    pub fn new(processor: Arc<ProbeEventProcessor>, options: ExecuteOptions) -> Self {
        Self {
            probes: Vec::new(),
            processor,
            options: options.ignore_schedule(true),
        }
    }

    /// Add a probe. Probes whose schedule does not parse are rejected.
    pub async fn register(&mut self, probe: Probe) -> Result<(), ScheduleError> {
        let schedule = probe.parsed_schedule()?;
        self.processor.register_probe(&probe).await;
        info!(probe = %probe.name, schedule = %probe.schedule, "probe registered");
        self.probes.push(ScheduledProbe {
            probe: Arc::new(probe),
            schedule,
            in_flight: Arc::new(AtomicBool::new(false)),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn processor(&self) -> &Arc<ProbeEventProcessor> {
        &self.processor
    }

    /// Start a run of every probe due at `now`.
    ///
    /// Each handle resolves to the tracker state after the run, or `None`
    /// when the run was cancelled before it started.
    pub fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Vec<JoinHandle<Option<TrackerSnapshot>>> {
        self.tick_seconds(&[now], cancel)
    }

    /// Like [`ProbeScheduler::tick`] for several seconds at once. A probe
    /// matching more than one of them still starts a single run.
    pub fn tick_seconds(
        &self,
        seconds: &[DateTime<Utc>],
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<Option<TrackerSnapshot>>> {
        self.probes
            .iter()
            .filter(|scheduled| seconds.iter().any(|second| scheduled.schedule.matches(second)))
            .filter_map(|scheduled| {
                if scheduled.in_flight.swap(true, Ordering::AcqRel) {
                    warn!(probe = %scheduled.probe.name, "previous run still in flight, skipping tick");
                    return None;
                }
                let guard = InFlight(Arc::clone(&scheduled.in_flight));
                Some(tokio::spawn(run_probe(
                    Arc::clone(&scheduled.probe),
                    Arc::clone(&self.processor),
                    self.options.clone(),
                    cancel.child_token(),
                    guard,
                )))
            })
            .collect()
    }

    /// Tick until `shutdown` is cancelled, then wait for in-flight runs.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut running: Vec<JoinHandle<Option<TrackerSnapshot>>> = Vec::new();
        let mut last_second = None;
        info!(probes = self.probes.len(), "probe scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    running.retain(|handle| !handle.is_finished());
                    let seconds = seconds_due(last_second, Utc::now());
                    if let Some(latest) = seconds.last() {
                        last_second = Some(*latest);
                    }
                    running.extend(self.tick_seconds(&seconds, &shutdown));
                }
            }
        }

        info!(in_flight = running.len(), "probe scheduler stopping");
        for result in join_all(running).await {
            if let Err(err) = result {
                warn!(error = %err, "probe run task failed");
            }
        }
    }
}

/// Wall-clock seconds not yet checked, oldest first.
///
/// `last` is the newest second already checked. A tick landing within the
/// same second yields nothing; a clock stepping backwards restarts from `now`.
fn seconds_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let now = now.trunc_subsecs(0);
    let Some(last) = last else {
        return vec![now];
    };

    let missed = (now - last).num_seconds();
    match missed {
        0 => Vec::new(),
        1..=MAX_CATCH_UP_SECONDS => (1..=missed).map(|offset| last + TimeDelta::seconds(offset)).collect(),
        _ => {
            warn!(missed, "scheduler clock jumped, not replaying missed seconds");
            vec![now]
        }
    }
}

async fn run_probe(
    probe: Arc<Probe>,
    processor: Arc<ProbeEventProcessor>,
    options: ExecuteOptions,
    cancel: CancellationToken,
    _guard: InFlight,
) -> Option<TrackerSnapshot> {
    let mut ctx = ProbeContext::new();
    match execute_probe(&cancel, &probe, &mut ctx, &options).await {
        Ok(RunOutcome::Succeeded) => debug!(probe = %probe.name, "probe run succeeded"),
        Ok(RunOutcome::Skipped) => return None,
        Err(ProbeError::Cancelled { .. }) => return None,
        Err(err) if err.is_configuration() => warn!(probe = %probe.name, error = %err, "probe configuration is broken"),
        Err(err) => debug!(probe = %probe.name, error = %err, "probe run failed"),
    }

    match processor.accept_probe_context(&ctx).await {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(probe = %probe.name, error = %err, "probe context rejected by event processor");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeRequest;

    fn unreachable_probe(name: &str) -> Probe {
        Probe::new(name, format!("{name}-id"), "http://127.0.0.1:1")
            .with_request(ProbeRequest::new("Home").path(r#""/""#))
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let mut scheduler = ProbeScheduler::new(Arc::new(ProbeEventProcessor::default()), ExecuteOptions::new(1));
        let probe = unreachable_probe("Broken").with_schedule("* * *");
        assert!(scheduler.register(probe).await.is_err());
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let mut scheduler = ProbeScheduler::new(Arc::new(ProbeEventProcessor::default()), ExecuteOptions::new(1));
        scheduler.register(unreachable_probe("Local")).await.unwrap();

        let cancel = CancellationToken::new();
        let now = Utc::now();
        let first = scheduler.tick(now, &cancel);
        let second = scheduler.tick(now, &cancel);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        for handle in first {
            let snapshot = handle.await.unwrap().expect("failed run is still tracked");
            assert_eq!(snapshot.fail_count, 1);
        }
        assert_eq!(scheduler.tick(now, &cancel).len(), 1);
    }

    fn at(secs: i64, millis: u32) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, millis * 1_000_000).unwrap()
    }

    #[test]
    fn test_late_tick_replays_skipped_second() {
        assert_eq!(seconds_due(None, at(10, 400)), vec![at(10, 0)]);
        assert_eq!(seconds_due(Some(at(10, 0)), at(10, 999)), Vec::<DateTime<Utc>>::new());
        assert_eq!(seconds_due(Some(at(10, 0)), at(11, 2)), vec![at(11, 0)]);
        assert_eq!(seconds_due(Some(at(10, 0)), at(12, 1)), vec![at(11, 0), at(12, 0)]);
    }

    #[test]
    fn test_clock_jumps_check_current_second_only() {
        assert_eq!(seconds_due(Some(at(10, 0)), at(5, 500)), vec![at(5, 0)]);
        assert_eq!(
            seconds_due(Some(at(10, 0)), at(10 + MAX_CATCH_UP_SECONDS + 1, 0)),
            vec![at(10 + MAX_CATCH_UP_SECONDS + 1, 0)]
        );
    }

    #[tokio::test]
    async fn test_probe_due_in_skipped_second_runs_once() {
        let mut scheduler = ProbeScheduler::new(Arc::new(ProbeEventProcessor::default()), ExecuteOptions::new(1));
        let second = at(11, 0);
        let schedule = format!("{} * * * * * *", chrono::Timelike::second(&second));
        scheduler
            .register(unreachable_probe("Once").with_schedule(schedule))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        assert!(scheduler.tick(at(12, 0), &cancel).is_empty());

        let handles = scheduler.tick_seconds(&seconds_due(Some(at(10, 0)), at(12, 3)), &cancel);
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_non_matching_schedule_does_not_run() {
        let mut scheduler = ProbeScheduler::new(Arc::new(ProbeEventProcessor::default()), ExecuteOptions::new(1));
        scheduler
            .register(unreachable_probe("Yearly").with_schedule("0 0 0 1 1 * 1999"))
            .await
            .unwrap();
        assert!(scheduler.tick(Utc::now(), &CancellationToken::new()).is_empty());
    }
}
