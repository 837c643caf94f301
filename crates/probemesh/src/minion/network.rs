//! Subnet arithmetic for peer discovery.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

/// Upper bound on the number of candidate peer addresses in one group.
pub const MAX_GROUP_SIZE: usize = 256;

/// Netmask for a CIDR prefix length; values above 32 clamp to /32.
pub fn netmask_for_prefix(prefix: u8) -> Ipv4Addr {
    let bits = match prefix {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - u32::from(p)),
    };
    Ipv4Addr::from(bits)
}

fn octet_candidates(octet: u8, mask: u8) -> Vec<u8> {
    (0..=u8::MAX).filter(|candidate| candidate & mask == octet & mask).collect()
}

/// Every address sharing `ip`'s network under `mask`, lowest first.
///
/// Stops after [`MAX_GROUP_SIZE`] addresses, so masks wider than /24 only
/// yield the first 256 hosts of the network.
pub fn network_group(ip: Ipv4Addr, mask: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, d] = ip.octets();
    let [ma, mb, mc, md] = mask.octets();
    let (la, lb, lc, ld) = (
        octet_candidates(a, ma),
        octet_candidates(b, mb),
        octet_candidates(c, mc),
        octet_candidates(d, md),
    );

    let mut group = Vec::with_capacity(MAX_GROUP_SIZE);
    for &a in &la {
        for &b in &lb {
            for &c in &lc {
                for &d in &ld {
                    group.push(Ipv4Addr::new(a, b, c, d));
                    if group.len() == MAX_GROUP_SIZE {
                        return group;
                    }
                }
            }
        }
    }
    group
}

/// The local address the OS would use for outbound traffic.
///
/// No packet is sent; connecting a UDP socket only selects a route.
pub async fn outbound_ip() -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket.connect("8.8.8.8:80").await?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("outbound address {ip} is not IPv4"),
        )),
    }
}
