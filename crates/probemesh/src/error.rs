//! Error types for ProbeMesh.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures that concern can produce.

use thiserror::Error;

use crate::expr::EvalError;

/// Failure parsing a schedule string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid schedule: expected {expected} fields but found {found} in [{schedule}]")]
    FieldCount { expected: usize, found: usize, schedule: String },

    #[error("invalid schedule field segment [{segment}]")]
    InvalidField { segment: String },
}

/// Failure reading a typed value from a probe context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context key not found: {0}")]
    KeyNotFound(String),

    #[error("context value {key} is {found}, not {expected}")]
    TypeMismatch { key: String, expected: &'static str, found: &'static str },
}

/// Failure of a probe run or of a single probe request.
///
/// Decision errors (`SuccessCriteriaFalse`, `FailCriteriaTrue`,
/// `StartConditionFalse`) mean the probe ran as configured and the endpoint
/// answered "wrong". Every other variant means the probe could not be carried
/// out as configured.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("context cancelled before probe {probe} could proceed")]
    Cancelled { probe: String },

    #[error("probe {probe} request {request} start condition is false")]
    StartConditionFalse { probe: String, request: String },

    #[error("probe {probe} request {request} start condition could not be evaluated: {source}")]
    StartConditionEvaluation {
        probe: String,
        request: String,
        #[source]
        source: EvalError,
    },

    #[error("probe {probe} request {request} {field} could not be evaluated: {source}")]
    Evaluation {
        probe: String,
        request: String,
        field: String,
        #[source]
        source: EvalError,
    },

    #[error("probe {probe} request {request} is invalid: {reason}")]
    InvalidRequest { probe: String, request: String, reason: String },

    #[error("probe {probe} request {request} http client could not be built: {source}")]
    HttpClient {
        probe: String,
        request: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http error for probe {probe} request {request}: {source}")]
    Transport {
        probe: String,
        request: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("probe {probe} request {request} success criteria returns false")]
    SuccessCriteriaFalse { probe: String, request: String },

    #[error("probe {probe} request {request} fail criteria returns true")]
    FailCriteriaTrue { probe: String, request: String },

    #[error("probe {probe} request {request} {criteria} could not be evaluated: {source}")]
    CriteriaEvaluation {
        probe: String,
        request: String,
        criteria: &'static str,
        #[source]
        source: EvalError,
    },
}

impl ProbeError {
    /// The endpoint answered but did not satisfy the configured criteria.
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            ProbeError::SuccessCriteriaFalse { .. }
                | ProbeError::FailCriteriaTrue { .. }
                | ProbeError::StartConditionFalse { .. }
        )
    }

    /// The probe configuration itself is broken (an expression failed).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProbeError::StartConditionEvaluation { .. }
                | ProbeError::Evaluation { .. }
                | ProbeError::CriteriaEvaluation { .. }
                | ProbeError::InvalidRequest { .. }
        )
    }

    /// The target could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProbeError::Transport { .. })
    }
}

/// Failure feeding a context into the event processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("probe context is missing required key {0}")]
    MissingKey(String),

    #[error("probe context key {key} is {found}, not {expected}")]
    WrongType { key: String, expected: &'static str, found: &'static str },
}

impl From<ContextError> for EventError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::KeyNotFound(key) => EventError::MissingKey(key),
            ContextError::TypeMismatch { key, expected, found } => {
                EventError::WrongType { key, expected, found }
            }
        }
    }
}

/// Malformed inbound coordination datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("unknown command [{0}]")]
    UnknownCommand(String),

    #[error("invalid number [{value}] in {command}")]
    InvalidNumber { command: &'static str, value: String },
}
