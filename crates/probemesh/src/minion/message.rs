//! Plain-text wire messages exchanged between minions.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// One coordination datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// `VREQ <vote count>`: ask the receiver for its rank.
    VoteRequest(u64),
    /// `VRES <rank>`: answer to a vote request.
    VoteResponse(u64),
    /// `PING`
    Ping,
    /// `PONG`
    Pong,
}

impl Message {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

fn parse_number(command: &'static str, value: Option<&str>) -> Result<u64, ProtocolError> {
    let value = value.unwrap_or_default().trim();
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        command,
        value: value.to_string(),
    })
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let (command, argument) = match s.split_once(' ') {
            Some((command, argument)) => (command, Some(argument)),
            None => (s, None),
        };
        match (command, argument) {
            ("VREQ", argument) => parse_number("VREQ", argument).map(Message::VoteRequest),
            ("VRES", argument) => parse_number("VRES", argument).map(Message::VoteResponse),
            ("PING", None) => Ok(Message::Ping),
            ("PONG", None) => Ok(Message::Pong),
            _ => Err(ProtocolError::UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::VoteRequest(count) => write!(f, "VREQ {count}"),
            Message::VoteResponse(rank) => write!(f, "VRES {rank}"),
            Message::Ping => f.write_str("PING"),
            Message::Pong => f.write_str("PONG"),
        }
    }
}
