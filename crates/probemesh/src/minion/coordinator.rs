//! Rank voting and liveness pings between minions.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message::Message;
use super::network::{netmask_for_prefix, network_group};
use super::transport::Transport;
use super::CoordinatorConfig;

/// Liveness bookkeeping for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    pub ping: Instant,
    pub pong: Instant,
    pub pong_received: bool,
}

impl PingPong {
    fn answered_now() -> Self {
        let now = Instant::now();
        Self { ping: now, pong: now, pong_received: true }
    }

    /// Last measured round trip, zero while a ping is outstanding.
    pub fn round_trip(&self) -> Duration {
        if self.pong_received {
            self.pong.saturating_duration_since(self.ping)
        } else {
            Duration::ZERO
        }
    }
}

/// Everything one minion believes about the group.
#[derive(Debug, Clone)]
pub struct CoordinatorState {
    pub rank: u64,
    pub vote_count: u64,
    pub my_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub leader_ip: Ipv4Addr,
    pub leader_rank: u64,
    pub can_ping: bool,
    pub peers: HashMap<Ipv4Addr, PingPong>,
    round: u64,
}

impl CoordinatorState {
    fn new(my_ip: Ipv4Addr, netmask: Ipv4Addr, rank: u64) -> Self {
        Self {
            rank,
            vote_count: 0,
            my_ip,
            netmask,
            leader_ip: my_ip,
            leader_rank: rank,
            can_ping: true,
            peers: HashMap::new(),
            round: 0,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader_rank == self.rank
    }
}

/// One minion's side of the coordination protocol.
pub struct Coordinator {
    config: CoordinatorConfig,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<CoordinatorState>>,
}

impl Coordinator {
    /// A coordinator with a random rank that starts out believing it leads.
    pub fn new(config: CoordinatorConfig, my_ip: Ipv4Addr, transport: Arc<dyn Transport>) -> Self {
        Self::with_rank(config, my_ip, transport, rand::random())
    }

    pub fn with_rank(config: CoordinatorConfig, my_ip: Ipv4Addr, transport: Arc<dyn Transport>, rank: u64) -> Self {
        let netmask = netmask_for_prefix(config.netmask_prefix);
        Self {
            state: Arc::new(Mutex::new(CoordinatorState::new(my_ip, netmask, rank))),
            config,
            transport,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.lock().clone()
    }

    pub fn rank(&self) -> u64 {
        self.state.lock().rank
    }

    /// Believed leader address and rank.
    pub fn leader(&self) -> (Ipv4Addr, u64) {
        let state = self.state.lock();
        (state.leader_ip, state.leader_rank)
    }

    fn target(&self, ip: Ipv4Addr) -> SocketAddr {
        SocketAddr::from((ip, self.config.port))
    }

    async fn send(&self, ip: Ipv4Addr, message: Message) {
        if let Err(err) = self.transport.send_to(self.target(ip), &message.to_bytes()).await {
            error!(peer = %ip, message = %message, error = %err, "failed to send message");
        }
    }

    /// Start a vote round: forget the current leader and ask every address
    /// in the subnet for its rank. Pings stay suspended for the vote grace
    /// period, after which the believed leader is logged.
    pub async fn send_vote_request(&self) {
        let (candidates, round) = {
            let mut state = self.state.lock();
            state.leader_ip = state.my_ip;
            state.leader_rank = state.rank;
            state.can_ping = false;
            state.round = state.round.wrapping_add(1);

            let my_ip = state.my_ip;
            let candidates: Vec<(Ipv4Addr, u64)> = network_group(my_ip, state.netmask)
                .into_iter()
                .filter(|ip| *ip != my_ip)
                .map(|ip| {
                    let count = state.vote_count;
                    state.vote_count = state.vote_count.wrapping_add(1);
                    (ip, count)
                })
                .collect();
            (candidates, state.round)
        };

        info!(peers = candidates.len(), "sending vote requests");
        for (ip, count) in candidates {
            self.send(ip, Message::VoteRequest(count)).await;
        }

        let state = Arc::clone(&self.state);
        let grace = self.config.vote_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut state = state.lock();
            if state.round != round {
                return;
            }
            if state.is_leader() {
                info!("current leader is myself");
            } else {
                info!(leader = %state.leader_ip, rank = state.leader_rank, "current leader elected");
            }
            state.can_ping = true;
        });
    }

    /// Ping every known peer, warning about peers whose last ping went unanswered.
    pub async fn send_ping_requests(&self) {
        let targets: Vec<Ipv4Addr> = {
            let mut state = self.state.lock();
            if !state.can_ping {
                debug!("vote round in progress, skipping pings");
                return;
            }
            let my_ip = state.my_ip;
            let warn_after = self.config.ping_warn_after;
            let now = Instant::now();
            state
                .peers
                .iter_mut()
                .filter(|(ip, _)| **ip != my_ip)
                .map(|(ip, pingpong)| {
                    let silent_for = now.saturating_duration_since(pingpong.ping);
                    if !pingpong.pong_received && silent_for > warn_after {
                        warn!(
                            peer = %ip,
                            silent_for = %humantime::format_duration(silent_for),
                            "peer not responding to ping, it will be dropped on the next vote"
                        );
                    }
                    pingpong.pong_received = false;
                    pingpong.ping = now;
                    *ip
                })
                .collect()
        };

        for ip in targets {
            self.send(ip, Message::Ping).await;
        }
    }

    /// Decode and handle one datagram; malformed payloads are logged and dropped.
    pub async fn handle_datagram(&self, payload: &[u8], from: SocketAddr) {
        let text = String::from_utf8_lossy(payload);
        match text.parse::<Message>() {
            Ok(message) => self.handle_message(message, from).await,
            Err(err) => warn!(peer = %from, error = %err, "dropping malformed message"),
        }
    }

    pub async fn handle_message(&self, message: Message, from: SocketAddr) {
        let from_ip = match from.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(ip) => {
                warn!(peer = %ip, "dropping message from IPv6 peer");
                return;
            }
        };
        debug!(peer = %from_ip, message = %message, "received message");

        match message {
            Message::VoteRequest(count) => {
                info!(peer = %from_ip, "received vote request");
                let rank = self.rank();
                self.send(from_ip, Message::VoteResponse(rank)).await;
                if count == 0 {
                    self.send_vote_request().await;
                }
            }
            Message::VoteResponse(their_rank) => {
                let mut state = self.state.lock();
                if their_rank > state.leader_rank {
                    state.leader_ip = from_ip;
                    state.leader_rank = their_rank;
                    info!(leader = %from_ip, rank = their_rank, "chose new leader");
                }
                state
                    .peers
                    .entry(from_ip)
                    .and_modify(|pingpong| {
                        pingpong.pong = Instant::now();
                        pingpong.pong_received = true;
                    })
                    .or_insert_with(PingPong::answered_now);
            }
            Message::Ping => self.send(from_ip, Message::Pong).await,
            Message::Pong => {
                if let Some(pingpong) = self.state.lock().peers.get_mut(&from_ip) {
                    pingpong.pong = Instant::now();
                    pingpong.pong_received = true;
                }
            }
        }
    }

    /// Serve the protocol until `shutdown` is cancelled.
    ///
    /// A dedicated task reads datagrams into a bounded mailbox; this loop
    /// handles them along with the vote and ping ticks. The first vote round
    /// starts immediately. On shutdown the reader stops and the socket is
    /// closed, then the tickers stop, then whatever is still queued is
    /// discarded.
    pub async fn run(&self, shutdown: CancellationToken) {
        let (mailbox, mut inbox) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let reader_stop = shutdown.child_token();
        let reader = tokio::spawn(read_datagrams(Arc::clone(&self.transport), mailbox, reader_stop.clone()));

        let mut vote_ticker = interval(self.config.vote_interval);
        vote_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping_ticker = interval_at(Instant::now() + self.config.ping_interval, self.config.ping_interval);
        ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        {
            let state = self.state.lock();
            info!(ip = %state.my_ip, netmask = %state.netmask, rank = state.rank, port = self.config.port, "coordinator started");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = vote_ticker.tick() => self.send_vote_request().await,
                _ = ping_ticker.tick() => self.send_ping_requests().await,
                Some((payload, from)) = inbox.recv() => self.handle_datagram(&payload, from).await,
            }
        }

        reader_stop.cancel();
        if let Err(err) = reader.await {
            error!(error = %err, "datagram reader task failed");
        }
        self.transport.close().await;
        debug!("coordinator socket closed");
        drop(vote_ticker);
        drop(ping_ticker);

        let mut discarded = 0usize;
        while inbox.try_recv().is_ok() {
            discarded += 1;
        }
        info!(discarded, "coordinator stopped");
    }
}

async fn read_datagrams(
    transport: Arc<dyn Transport>,
    mailbox: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    stop: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = stop.cancelled() => break,
            received = transport.recv_from() => received,
        };
        match received {
            Ok(datagram) => {
                if mailbox.send(datagram).await.is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => {
                warn!(error = %err, "transport closed, stopping reader");
                break;
            }
            Err(err) => warn!(error = %err, "failed to receive datagram"),
        }
    }
}
