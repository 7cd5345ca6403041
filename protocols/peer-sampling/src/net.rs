// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! UDP transport for running a peer sampler on tokio.
//!
//! Peers are identified by `/ip4/<addr>/udp/<port>` or `/ip6/<addr>/udp/<port>` multiaddrs.

use std::{
    io,
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use multiaddr::{Multiaddr, Protocol};
use tokio::{
    net::UdpSocket,
    time::{self, Interval, MissedTickBehavior},
};

use crate::{Outbound, PeerSampler};

/// Largest payload of a UDP datagram.
const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Extracts the socket address of a `/ip4|ip6/../udp/..` multiaddr.
pub fn multiaddr_to_socketaddr(addr: &Multiaddr) -> Option<SocketAddr> {
    let mut iter = addr.iter();
    let proto1 = iter.next()?;
    let proto2 = iter.next()?;

    if iter.next().is_some() {
        return None;
    }

    match (proto1, proto2) {
        (Protocol::Ip4(ip), Protocol::Udp(port)) => Some(SocketAddr::new(ip.into(), port)),
        (Protocol::Ip6(ip), Protocol::Udp(port)) => Some(SocketAddr::new(ip.into(), port)),
        _ => None,
    }
}

pub fn socketaddr_to_multiaddr(addr: SocketAddr) -> Multiaddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    };
    Multiaddr::empty().with(ip).with(Protocol::Udp(addr.port()))
}

fn invalid_address(addr: &Multiaddr) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("not an IP/UDP multiaddr: {addr}"),
    )
}

/// A UDP socket addressed with multiaddrs.
#[derive(Debug)]
pub struct UdpNetwork {
    socket: UdpSocket,
    local_addr: Multiaddr,
}

impl UdpNetwork {
    /// Binds a socket on `addr`. Port `0` picks a free port, see [`UdpNetwork::local_addr`].
    pub async fn bind(addr: &Multiaddr) -> io::Result<Self> {
        let socket_addr = multiaddr_to_socketaddr(addr).ok_or_else(|| invalid_address(addr))?;
        let socket = UdpSocket::bind(socket_addr).await?;
        let local_addr = socketaddr_to_multiaddr(socket.local_addr()?);
        tracing::debug!(address=%local_addr, "Bound UDP socket");

        Ok(UdpNetwork { socket, local_addr })
    }

    /// Address the socket is bound to, to be used as the identity of the local node.
    pub fn local_addr(&self) -> &Multiaddr {
        &self.local_addr
    }

    pub async fn send(&self, to: &Multiaddr, data: &[u8]) -> io::Result<usize> {
        let socket_addr = multiaddr_to_socketaddr(to).ok_or_else(|| invalid_address(to))?;
        self.socket.send_to(data, socket_addr).await
    }

    /// Waits for a datagram. Returns its length and sender.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, Multiaddr)> {
        let (len, from) = self.socket.recv_from(buf).await?;
        Ok((len, socketaddr_to_multiaddr(from)))
    }
}

enum Event {
    Datagram(usize, Multiaddr),
    Tick,
}

/// Runs a peer sampler over a [`UdpNetwork`]: received datagrams are handed to the sampler,
/// which is also polled at a regular interval to run its periodic exchange.
pub struct Driver<S> {
    sampler: S,
    network: UdpNetwork,
    interval: Interval,
    buffer: Vec<u8>,
}

impl<S> Driver<S>
where
    S: PeerSampler<Id = Multiaddr>,
{
    /// Creates a driver polling the sampler's timer every `tick`. The tick should be shorter
    /// than the periods of the sampler.
    pub fn new(sampler: S, network: UdpNetwork, tick: Duration) -> Self {
        let mut interval = time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Driver {
            sampler,
            network,
            interval,
            buffer: vec![0; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut S {
        &mut self.sampler
    }

    pub fn network(&self) -> &UdpNetwork {
        &self.network
    }

    /// Waits for a datagram or a tick, feeds it to the sampler and sends what the sampler
    /// produced.
    ///
    /// Malformed datagrams are logged and dropped. Socket errors are returned.
    pub async fn step(&mut self) -> io::Result<()> {
        let event = tokio::select! {
            received = self.network.recv(&mut self.buffer) => {
                let (len, from) = received?;
                Event::Datagram(len, from)
            }
            _ = self.interval.tick() => Event::Tick,
        };

        match event {
            Event::Datagram(len, from) => {
                if let Err(e) = self.sampler.parse_data(&self.buffer[..len], Instant::now()) {
                    tracing::debug!(peer=%from, "Dropping datagram: {e}");
                }
            }
            Event::Tick => {
                if let Err(e) = self.sampler.parse_data(&[], Instant::now()) {
                    tracing::warn!("Gossip cycle failed: {e}");
                }
            }
        }

        self.flush().await
    }

    /// Sends every message queued by the sampler.
    pub async fn flush(&mut self) -> io::Result<()> {
        while let Some(Outbound { to, data }) = self.sampler.poll_outbound() {
            match self.network.send(&to, &data).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                    tracing::debug!(peer=%to, "Cannot send datagram: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Runs the sampler until a socket error occurs.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            self.step().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_multiaddrs() {
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4000".parse().unwrap();
        let socket_addr = multiaddr_to_socketaddr(&addr).unwrap();
        assert_eq!(socket_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(socketaddr_to_multiaddr(socket_addr), addr);

        let addr: Multiaddr = "/ip6/::1/udp/4000".parse().unwrap();
        assert_eq!(
            multiaddr_to_socketaddr(&addr),
            Some("[::1]:4000".parse().unwrap())
        );
    }

    #[test]
    fn other_multiaddrs_are_rejected() {
        for addr in [
            "/ip4/127.0.0.1/tcp/4000",
            "/ip4/127.0.0.1",
            "/ip4/127.0.0.1/udp/4000/quic-v1",
            "/memory/5",
        ] {
            let addr: Multiaddr = addr.parse().unwrap();
            assert!(multiaddr_to_socketaddr(&addr).is_none(), "{addr}");
        }
    }

    #[tokio::test]
    async fn bind_reports_actual_port() {
        let network = UdpNetwork::bind(&"/ip4/127.0.0.1/udp/0".parse().unwrap())
            .await
            .unwrap();
        let port = multiaddr_to_socketaddr(network.local_addr()).unwrap().port();
        assert_ne!(port, 0);

        let err = UdpNetwork::bind(&"/memory/1".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
