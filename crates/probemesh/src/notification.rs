//! Transition notifications.
//!
//! The event processor hands every up/down transition to a [`Trigger`].
//! Delivery transports (mail, callbacks) live outside this crate and can
//! consume events through a [`ChannelTrigger`].

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::context::format_duration;

/// Spans longer than this many days are reported as "first time this year".
pub const YEAR_DAYS: i64 = 365;

/// A confirmed change of a probe's up/down status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub probe_name: String,
    pub probe_id: String,
    pub is_down: bool,
    pub first_up: DateTime<Utc>,
    pub last_up: DateTime<Utc>,
    pub first_down: DateTime<Utc>,
    pub last_down: DateTime<Utc>,
}

impl TransitionEvent {
    /// When the new status began.
    pub fn changed_at(&self) -> DateTime<Utc> {
        if self.is_down {
            self.first_down
        } else {
            self.first_up
        }
    }

    /// How long the previous status lasted.
    pub fn previous_span(&self) -> TimeDelta {
        if self.is_down {
            self.first_down - self.first_up
        } else {
            self.first_up - self.first_down
        }
    }

    /// True when the previous status has no start within the last year.
    pub fn is_first_this_year(&self) -> bool {
        self.previous_span() > TimeDelta::days(YEAR_DAYS)
    }
}

/// Receives status transitions.
pub trait Trigger: Send + Sync {
    fn fire(&self, event: &TransitionEvent);
}

impl<F> Trigger for F
where
    F: Fn(&TransitionEvent) + Send + Sync,
{
    fn fire(&self, event: &TransitionEvent) {
        self(event)
    }
}

fn rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Default trigger: writes one log line per transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTrigger;

impl LogTrigger {
    /// The line logged for `event`.
    pub fn message(event: &TransitionEvent) -> String {
        let at = rfc3339(&event.changed_at());
        let span = format_duration(&event.previous_span());
        match (event.is_down, event.is_first_this_year()) {
            (false, true) => format!(
                "Probe {} [{}] is detected online for the first time this year at {at}",
                event.probe_name, event.probe_id
            ),
            (false, false) => format!(
                "Probe {} [{}] is back up at {at} after downed for {span}",
                event.probe_name, event.probe_id
            ),
            (true, true) => format!(
                "Probe {} [{}] is downed for the first time this year at {at}",
                event.probe_name, event.probe_id
            ),
            (true, false) => format!(
                "Probe {} [{}] is downed at {at} after on-line for {span}",
                event.probe_name, event.probe_id
            ),
        }
    }
}

impl Trigger for LogTrigger {
    fn fire(&self, event: &TransitionEvent) {
        let message = Self::message(event);
        if event.is_down {
            warn!(probe = %event.probe_name, probe_id = %event.probe_id, "{message}");
        } else {
            info!(probe = %event.probe_name, probe_id = %event.probe_id, "{message}");
        }
    }
}

/// Forwards transitions into a bounded channel, in firing order.
///
/// Events are dropped with a warning when the channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelTrigger {
    sender: mpsc::Sender<TransitionEvent>,
}

impl ChannelTrigger {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransitionEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl Trigger for ChannelTrigger {
    fn fire(&self, event: &TransitionEvent) {
        if let Err(err) = self.sender.try_send(event.clone()) {
            warn!(probe = %event.probe_name, error = %err, "transition event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(is_down: bool, first_up: DateTime<Utc>, first_down: DateTime<Utc>) -> TransitionEvent {
        TransitionEvent {
            probe_name: "Local".to_string(),
            probe_id: "local-1".to_string(),
            is_down,
            first_up,
            last_up: first_up,
            first_down,
            last_down: first_down,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_first_time_online() {
        let message = LogTrigger::message(&event(false, at(0), DateTime::UNIX_EPOCH));
        assert_eq!(
            message,
            "Probe Local [local-1] is detected online for the first time this year at 2020-09-13T12:26:40Z"
        );
    }

    #[test]
    fn test_back_up_after_downtime() {
        let message = LogTrigger::message(&event(false, at(90), at(0)));
        assert!(message.contains("is back up at 2020-09-13T12:28:10Z after downed for 1m 30s"), "{message}");
    }

    #[test]
    fn test_down_after_uptime() {
        let message = LogTrigger::message(&event(true, at(0), at(3600)));
        assert!(message.contains("is downed at 2020-09-13T13:26:40Z after on-line for 1h"), "{message}");
    }

    #[tokio::test]
    async fn test_channel_trigger_preserves_order() {
        let (trigger, mut receiver) = ChannelTrigger::new(4);
        trigger.fire(&event(true, at(0), at(10)));
        trigger.fire(&event(false, at(20), at(10)));
        assert!(receiver.recv().await.unwrap().is_down);
        assert!(!receiver.recv().await.unwrap().is_down);
    }

    #[test]
    fn test_closure_trigger() {
        let fired = std::sync::atomic::AtomicUsize::new(0);
        let trigger = |_: &TransitionEvent| {
            fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        };
        trigger.fire(&event(true, at(0), at(1)));
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
