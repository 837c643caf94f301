//! Minion coordination.
//!
//! Minions on one subnet elect a leader by exchanging random 64-bit ranks
//! over UDP and keep track of each other with periodic pings. The vote is
//! re-run on every vote tick so the group recovers from minions joining and
//! leaving. Highest rank wins; equal ranks keep the current leader.

mod coordinator;
mod message;
mod network;
mod transport;

use std::time::Duration;

pub use coordinator::{Coordinator, CoordinatorState, PingPong};
pub use message::Message;
pub use network::{netmask_for_prefix, network_group, outbound_ip, MAX_GROUP_SIZE};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport, MAX_DATAGRAM};

/// UDP port every minion listens on.
pub const DEFAULT_PORT: u16 = 62891;

/// Timing and addressing of the coordination protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub netmask_prefix: u8,
    pub vote_interval: Duration,
    pub ping_interval: Duration,
    /// How long pings stay suspended after a vote round starts.
    pub vote_grace: Duration,
    /// Unanswered pings older than this are reported.
    pub ping_warn_after: Duration,
    pub mailbox_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            netmask_prefix: 24,
            vote_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            vote_grace: Duration::from_secs(5),
            ping_warn_after: Duration::from_secs(10),
            mailbox_capacity: 1024,
        }
    }
}
