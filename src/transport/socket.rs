//! Single-endpoint UDP socket: bound to a named local interface, tracking
//! the peer address it discovers and a send-congestion flag.
//!
//! Grounded on the bidirectional RTP socket wrapper elsewhere in this
//! codebase, adapted from "bind to an IP" to "bind to a named interface"
//! (per-endpoint interface selection, §6) and from a single remote peer to
//! a peer discovered from the first authenticated datagram (§3
//! `EndpointState`).

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

/// One network path: a UDP socket bound to a specific local interface,
/// discovering and tracking one peer address/port.
///
/// Shared across the endpoint's receive thread, discovery thread, and the
/// tick thread (which only ever writes), so the mutable bits beyond the OS
/// socket itself (which is internally synchronized) are atomics/a mutex
/// rather than plain fields.
pub struct EndpointSocket {
    socket: UdpSocket,
    peer_addr: Mutex<Option<SocketAddr>>,
    congested: AtomicBool,
}

impl EndpointSocket {
    /// Bind a UDP socket to the named local interface (`eth0`, `en0`, ...).
    /// Interface binding is a no-op when the platform doesn't support
    /// `SO_BINDTODEVICE`-style binding; the socket still binds to
    /// `0.0.0.0:0` and will simply route over the default interface.
    pub fn bind(interface: &str) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // Best-effort: an unknown/unprivileged interface name must not
            // be fatal to endpoint bring-up.
            let _ = socket.bind_device(Some(interface.as_bytes()));
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = interface; // interface selection by name isn't portable outside Linux
        }

        socket.bind(&"0.0.0.0:0".parse::<SocketAddr>().unwrap().into())?;
        socket.set_nonblocking(true)?;
        socket.set_read_timeout(Some(Duration::from_millis(10)))?;
        let _ = socket.set_recv_buffer_size(1024 * 1024);
        let _ = socket.set_send_buffer_size(1024 * 1024);

        let socket: UdpSocket = socket.into();

        Ok(Self {
            socket,
            peer_addr: Mutex::new(None),
            congested: AtomicBool::new(false),
        })
    }

    /// Record (or validate) the peer address discovered from an incoming
    /// datagram. Per the `EndpointState` invariant, the tuple is taken from
    /// the first datagram and may only change after that if the tunnel
    /// authenticated it (that authentication happens one layer up, in the
    /// tunnel's read path; by the time this is called the datagram is
    /// already known-good).
    pub fn note_peer(&self, addr: SocketAddr) {
        *self.peer_addr.lock() = Some(addr);
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock()
    }

    pub fn is_congested(&self) -> bool {
        self.congested.load(Ordering::Relaxed)
    }

    /// Send to the known peer. Returns `Ok(None)` if no peer is known yet
    /// (not an error — the send-to-all policy in 4.C just skips this
    /// socket). A `WouldBlock` send marks the endpoint congested; any
    /// subsequent successful send clears it.
    pub fn send_to_peer(&self, data: &[u8]) -> io::Result<Option<usize>> {
        let Some(peer) = self.peer_addr() else {
            return Ok(None);
        };
        match self.socket.send_to(data, peer) {
            Ok(n) => {
                self.congested.store(false, Ordering::Relaxed);
                Ok(Some(n))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.congested.store(true, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    pub fn try_clone(&self) -> io::Result<UdpSocket> {
        self.socket.try_clone()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_without_a_peer() {
        let socket = EndpointSocket::bind("lo").unwrap();
        assert!(socket.peer_addr().is_none());
        assert!(!socket.is_congested());
    }

    #[test]
    fn send_without_peer_is_a_noop_ok() {
        let socket = EndpointSocket::bind("lo").unwrap();
        let sent = socket.send_to_peer(b"hello").unwrap();
        assert!(sent.is_none());
    }

    #[test]
    fn loopback_round_trip_learns_peer() {
        let a = EndpointSocket::bind("lo").unwrap();
        let b = EndpointSocket::bind("lo").unwrap();
        let b_addr = b.local_addr().unwrap();
        a.note_peer(b_addr);
        a.send_to_peer(b"ping").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        b.note_peer(from);
        assert!(b.peer_addr().is_some());
    }
}
