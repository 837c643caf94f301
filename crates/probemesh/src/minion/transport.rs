//! Datagram transports used by the coordinator.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Largest datagram read from the wire.
pub const MAX_DATAGRAM: usize = 1024;

/// Datagram transport shared by the reader task and every sender.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `target`.
    async fn send_to(&self, target: SocketAddr, payload: &[u8]) -> io::Result<()>;

    /// Wait for the next datagram and its sender.
    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Release the endpoint. Later sends and receives fail with `NotConnected`.
    async fn close(&self);
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}

/// UDP transport; writes are serialised through a mutex.
///
/// The socket is released on [`Transport::close`] once the last in-flight
/// operation returns.
pub struct UdpTransport {
    socket: parking_lot::Mutex<Option<Arc<UdpSocket>>>,
    writer: Mutex<()>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: parking_lot::Mutex::new(Some(Arc::new(socket))),
            writer: Mutex::new(()),
        })
    }

    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.socket.lock().clone().ok_or_else(closed)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, target: SocketAddr, payload: &[u8]) -> io::Result<()> {
        let socket = self.socket()?;
        let _guard = self.writer.lock().await;
        socket.send_to(payload, target).await.map(|_| ())
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let socket = self.socket()?;
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, from) = socket.recv_from(&mut buf).await?;
        Ok((buf[..len].to_vec(), from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    async fn close(&self) {
        self.socket.lock().take();
    }
}

type Datagram = (Vec<u8>, SocketAddr);

/// In-process datagram network, for running several coordinators in one process.
///
/// Datagrams to unbound addresses are silently dropped, as UDP would.
#[derive(Default)]
pub struct MemoryNetwork {
    nodes: parking_lot::Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a transport at `addr`, replacing any previous binding.
    pub fn bind(self: &Arc<Self>, addr: SocketAddr) -> MemoryTransport {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.nodes.lock().insert(addr, sender);
        MemoryTransport {
            addr,
            network: Arc::clone(self),
            inbox: Mutex::new(receiver),
            closed: AtomicBool::new(false),
        }
    }

    fn unbind(&self, addr: SocketAddr) {
        self.nodes.lock().remove(&addr);
    }

    fn deliver(&self, from: SocketAddr, target: SocketAddr, payload: &[u8]) {
        let mut nodes = self.nodes.lock();
        if let Some(node) = nodes.get(&target) {
            if node.send((payload.to_vec(), from)).is_err() {
                nodes.remove(&target);
            }
        }
    }
}

pub struct MemoryTransport {
    addr: SocketAddr,
    network: Arc<MemoryNetwork>,
    inbox: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, target: SocketAddr, payload: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed());
        }
        self.network.deliver(self.addr, target, payload);
        Ok(())
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed());
        }
        self.inbox.lock().await.recv().await.ok_or_else(closed)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.network.unbind(self.addr);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[tokio::test]
    async fn test_memory_network_delivers_with_sender() {
        let network = MemoryNetwork::new();
        let a = network.bind(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), 9000)));
        let b = network.bind(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 2), 9000)));

        a.send_to(b.local_addr().unwrap(), b"PING").await.unwrap();
        a.send_to(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 9), 9000)), b"PING").await.unwrap();

        let (payload, from) = b.recv_from().await.unwrap();
        assert_eq!(payload, b"PING");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_udp_loopback() {
        let a = UdpTransport::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();
        let b = UdpTransport::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();

        a.send_to(b.local_addr().unwrap(), b"VREQ 0").await.unwrap();
        let (payload, from) = b.recv_from().await.unwrap();
        assert_eq!(payload, b"VREQ 0");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_closed_udp_transport_releases_port() {
        let a = UdpTransport::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();
        let addr = a.local_addr().unwrap();
        a.close().await;

        let err = a.send_to(addr, b"PING").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(a.recv_from().await.unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert!(UdpTransport::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_memory_transport_is_unbound() {
        let network = MemoryNetwork::new();
        let a = network.bind(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), 9000)));
        let b = network.bind(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 2), 9000)));

        a.send_to(b.local_addr().unwrap(), b"PING").await.unwrap();
        b.close().await;
        a.send_to(b.local_addr().unwrap(), b"PING").await.unwrap();

        assert!(!network.nodes.lock().contains_key(&b.local_addr().unwrap()));
        assert_eq!(b.recv_from().await.unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert_eq!(b.send_to(a.local_addr().unwrap(), b"PONG").await.unwrap_err().kind(), io::ErrorKind::NotConnected);
    }
}
