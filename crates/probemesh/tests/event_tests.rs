//! Up/down hysteresis driven through the event processor.

mod common;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use probemesh::notification::ChannelTrigger;
use probemesh::{EventError, LogTrigger, Probe, ProbeContext, ProbeEventProcessor, TransitionEvent};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn run_context(probe: &str, success: bool, started: DateTime<Utc>) -> ProbeContext {
    let mut ctx = ProbeContext::new();
    ctx.insert("probe", probe);
    ctx.insert(format!("probe.{probe}.id"), format!("{probe}-id"));
    ctx.insert(format!("probe.{probe}.success"), success);
    ctx.insert(format!("probe.{probe}.fail"), !success);
    ctx.insert(format!("probe.{probe}.starttime"), started);
    ctx
}

fn recording_processor() -> (ProbeEventProcessor, Arc<Mutex<Vec<TransitionEvent>>>) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    let processor = ProbeEventProcessor::new(Arc::new(move |event: &TransitionEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    (processor, fired)
}

#[tokio::test]
async fn test_down_fires_only_after_third_failure() {
    common::init_tracing();
    let (processor, fired) = recording_processor();

    let outcomes = [true, true, true, false, false, false];
    let mut transitions = Vec::new();
    for (second, success) in outcomes.into_iter().enumerate() {
        let snapshot = processor
            .accept_probe_context(&run_context("Local", success, at(second as i64)))
            .await
            .unwrap();
        transitions.push(snapshot.transition.map(|event| event.is_down));
    }

    assert_eq!(transitions, vec![None, None, Some(false), None, None, Some(true)]);

    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), 2);
    let down = &fired[1];
    assert_eq!(down.first_down, at(3));
    assert_eq!(down.last_up, at(2));
    assert_eq!(down.first_up, at(0));
    assert_eq!(down.previous_span(), TimeDelta::seconds(3));
}

#[tokio::test]
async fn test_isolated_failures_fire_nothing() {
    let (processor, fired) = recording_processor();
    let probe = Probe::new("Local", "Local-id", "http://localhost").with_thresholds(2, 2);
    processor.register_probe(&probe).await;

    for second in 0..3 {
        processor.accept_probe_context(&run_context("Local", true, at(second))).await.unwrap();
    }
    let outcomes = [false, true, false, false, true, true, false, true];
    for (offset, success) in outcomes.into_iter().enumerate() {
        let snapshot = processor
            .accept_probe_context(&run_context("Local", success, at(10 + offset as i64)))
            .await
            .unwrap();
        assert!(snapshot.transition.is_none());
        assert!(!snapshot.is_down);
    }
    assert_eq!(fired.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_probes_are_tracked_independently() {
    let processor = ProbeEventProcessor::new(Arc::new(LogTrigger));
    for second in 0..3 {
        processor.accept_probe_context(&run_context("Alpha", true, at(second))).await.unwrap();
        processor.accept_probe_context(&run_context("Beta", false, at(second))).await.unwrap();
    }

    let alpha = processor.snapshot("Alpha").await.unwrap();
    let beta = processor.snapshot("Beta").await.unwrap();
    assert!(!alpha.is_down);
    assert_eq!(alpha.success_count, 3);
    assert!(beta.is_down);
    assert_eq!(beta.fail_count, 3);
    assert_eq!(processor.probe_names().await, vec!["Alpha".to_string(), "Beta".to_string()]);
}

#[tokio::test]
async fn test_history_is_capped() {
    let processor = ProbeEventProcessor::new(Arc::new(LogTrigger)).with_window(4);
    for second in 0..10 {
        processor.accept_probe_context(&run_context("Local", second % 3 != 0, at(second))).await.unwrap();
    }
    let snapshot = processor.snapshot("Local").await.unwrap();
    let times: Vec<_> = snapshot.history.iter().map(|record| record.time).collect();
    assert_eq!(times, vec![at(6), at(7), at(8), at(9)]);
}

#[tokio::test]
async fn test_transitions_reach_channel_in_order() {
    let (trigger, mut events) = ChannelTrigger::new(8);
    let processor = ProbeEventProcessor::new(Arc::new(trigger));
    let outcomes = [true, true, true, false, false, false, true, true, true];
    for (second, success) in outcomes.into_iter().enumerate() {
        processor.accept_probe_context(&run_context("Local", success, at(second as i64))).await.unwrap();
    }

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push((event.is_down, event.changed_at()));
    }
    assert_eq!(received, vec![(false, at(0)), (true, at(3)), (false, at(6))]);
}

#[tokio::test]
async fn test_incomplete_context_is_rejected() {
    let processor = ProbeEventProcessor::default();
    let mut ctx = ProbeContext::new();
    ctx.insert("probe", "Local");
    ctx.insert("probe.Local.id", "local-1");

    let err = tokio_test::assert_err!(processor.accept_probe_context(&ctx).await);
    assert_eq!(err, EventError::MissingKey("probe.Local.success".to_string()));

    ctx.insert("probe.Local.success", "yes");
    let err = tokio_test::assert_err!(processor.accept_probe_context(&ctx).await);
    assert!(matches!(err, EventError::WrongType { .. }));
}
