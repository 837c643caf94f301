//! Probe configuration types.
//!
//! A [`Probe`] is read-only during execution. Every dynamic field of a
//! [`ProbeRequest`] is an expression evaluated against the run's context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::schedule::Schedule;

/// Consecutive outcomes required before a status flip, when unset.
pub const DEFAULT_THRESHOLD: u32 = 2;

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_schedule() -> String {
    "* * * * * * *".to_string()
}

/// A named monitoring unit: an ordered chain of HTTP requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub id: String,
    pub base_url: String,
    /// Seven field schedule, see [`crate::schedule`].
    #[serde(default = "default_schedule", alias = "cron")]
    pub schedule: String,
    #[serde(default)]
    pub requests: Vec<ProbeRequest>,
    #[serde(default = "default_threshold")]
    pub up_threshold: u32,
    #[serde(default = "default_threshold")]
    pub down_threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationTargets>,
}

impl Probe {
    pub fn new(name: impl Into<String>, id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            base_url: base_url.into(),
            schedule: default_schedule(),
            requests: Vec::new(),
            up_threshold: DEFAULT_THRESHOLD,
            down_threshold: DEFAULT_THRESHOLD,
            notification: None,
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn with_request(mut self, request: ProbeRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn with_thresholds(mut self, up: u32, down: u32) -> Self {
        self.up_threshold = up;
        self.down_threshold = down;
        self
    }

    /// Parse this probe's schedule string.
    pub fn parsed_schedule(&self) -> Result<Schedule, ScheduleError> {
        Schedule::parse(&self.schedule)
    }

    /// Comma joined request names, in execution order.
    pub fn request_names(&self) -> String {
        self.requests
            .iter()
            .map(|request| request.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One step in a probe's chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub name: String,
    /// Appended to the probe's base URL. Must evaluate to a string.
    #[serde(default, rename = "path_expr")]
    pub path: String,
    /// Must evaluate to a string such as `"GET"`.
    #[serde(default, rename = "method_expr")]
    pub method: String,
    /// Header name to value expressions. A header may carry several values.
    #[serde(default, rename = "headers_exprs")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, rename = "body_expr")]
    pub body: String,
    #[serde(default, rename = "start_request_if_expr")]
    pub start_if: String,
    #[serde(default, rename = "success_if_expr")]
    pub success_if: String,
    #[serde(default, rename = "fail_if_expr")]
    pub fail_if: String,
    /// Stored with the request but not used to gate it.
    #[serde(default, rename = "certificate_check_expr")]
    pub certificate_check: String,
}

impl ProbeRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: r#""GET""#.to_string(),
            ..Default::default()
        }
    }

    pub fn path(mut self, expression: impl Into<String>) -> Self {
        self.path = expression.into();
        self
    }

    pub fn method(mut self, expression: impl Into<String>) -> Self {
        self.method = expression.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(expression.into());
        self
    }

    pub fn body(mut self, expression: impl Into<String>) -> Self {
        self.body = expression.into();
        self
    }

    pub fn start_if(mut self, expression: impl Into<String>) -> Self {
        self.start_if = expression.into();
        self
    }

    pub fn success_if(mut self, expression: impl Into<String>) -> Self {
        self.success_if = expression.into();
        self
    }

    pub fn fail_if(mut self, expression: impl Into<String>) -> Self {
        self.fail_if = expression.into();
        self
    }
}

/// Where transition notifications for a probe are delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpTarget {
    pub host: String,
    pub port: u16,
    pub from: Mailbox,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub to: Vec<Mailbox>,
    #[serde(default)]
    pub cc: Vec<Mailbox>,
    #[serde(default)]
    pub bcc: Vec<Mailbox>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

/// URLs called when the probe goes up or down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackTarget {
    #[serde(default)]
    pub up_call: String,
    #[serde(default)]
    pub down_call: String,
}
