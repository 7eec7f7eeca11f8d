//! Shared Noise/WireGuard tunnel (the `TunnelState` of §3).
//!
//! Exactly one tunnel instance exists process-wide; every endpoint
//! encrypts/decrypts through it. Concurrency is mediated by a single lock
//! internal to this wrapper (a `parking_lot::Mutex`, matching the mutex
//! this codebase already reaches for off the realtime path) — the
//! underlying WireGuard state machine itself isn't internally
//! synchronized, so receive threads and the tick thread all serialize on
//! this one lock exactly as §5 describes.

use std::net::IpAddr;
use std::time::Duration;

use boringtun::noise::{Tunn, TunnResult};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Outcome of feeding a ciphertext datagram into the tunnel's read path.
pub enum TunnelEvent<'a> {
    /// Cleartext IPv4 payload recovered; the caller strips the synthetic
    /// 20-byte IPv4 header before handing it to the demux (per §6).
    CleartextIpv4(&'a [u8]),
    /// A handshake/keepalive response that must be broadcast to all
    /// sockets, after which the caller should drain with a zero-length
    /// read in case more is queued.
    ToNetwork(&'a [u8]),
    /// Nothing to deliver or send (also the fully-drained terminal case).
    Done,
}

pub struct Tunnel {
    inner: Mutex<Tunn>,
}

impl Tunnel {
    pub fn new(local_private: [u8; 32], peer_public: [u8; 32]) -> Result<Self> {
        let tunn = Tunn::new(
            local_private.into(),
            peer_public.into(),
            None,
            None,
            0,
            None,
        )
        .map_err(|e| Error::Tunnel(format!("{e:?}")))?;
        Ok(Self {
            inner: Mutex::new(tunn),
        })
    }

    /// Encrypt `plaintext` (a synthetic-IPv4-framed payload) for
    /// transmission. Returns the ciphertext to broadcast to all sockets,
    /// or `None` if the tunnel has nothing to send yet (e.g. handshake not
    /// complete — boringtun queues the plaintext and emits a handshake
    /// initiation instead, which the caller still broadcasts).
    pub fn encapsulate<'a>(&self, plaintext: &[u8], dst: &'a mut [u8]) -> Result<Option<&'a [u8]>> {
        let mut tunn = self.inner.lock();
        match tunn.encapsulate(plaintext, dst) {
            TunnResult::Done => Ok(None),
            TunnResult::WriteToNetwork(buf) => {
                let n = buf.len();
                Ok(Some(&dst[..n]))
            }
            TunnResult::Err(e) => Err(Error::Tunnel(format!("{e:?}"))),
            _ => Ok(None),
        }
    }

    /// Feed one incoming ciphertext datagram into the tunnel's read path.
    /// `dst` is the per-endpoint scratch buffer (§4.C requires these be
    /// disjoint per endpoint so concurrent receive threads never share
    /// scratch).
    pub fn decapsulate<'a>(
        &self,
        src: Option<IpAddr>,
        ciphertext: &[u8],
        dst: &'a mut [u8],
    ) -> TunnelEvent<'a> {
        let mut tunn = self.inner.lock();
        match tunn.decapsulate(src, ciphertext, dst) {
            TunnResult::Done => TunnelEvent::Done,
            TunnResult::Err(e) => {
                // Per §7, a decrypt error is logged unless it's the
                // duplicate-packet case, and the datagram is otherwise
                // simply dropped.
                if !is_duplicate_packet_error(&e) {
                    log::warn!("tunnel decrypt error: {e:?}");
                }
                TunnelEvent::Done
            }
            TunnResult::WriteToTunnelV4(buf, _addr) => {
                let n = buf.len();
                TunnelEvent::CleartextIpv4(&dst[..n])
            }
            TunnResult::WriteToTunnelV6(buf, _addr) => {
                let n = buf.len();
                TunnelEvent::CleartextIpv4(&dst[..n])
            }
            TunnResult::WriteToNetwork(buf) => {
                let n = buf.len();
                TunnelEvent::ToNetwork(&dst[..n])
            }
        }
    }

    /// The tick routine (4.C): called every `TICK_INTERVAL` from the
    /// realtime-elevated tick thread. Returns bytes to broadcast if the
    /// tunnel has a handshake retry or keepalive due.
    pub fn tick<'a>(&self, dst: &'a mut [u8]) -> Option<&'a [u8]> {
        let mut tunn = self.inner.lock();
        match tunn.update_timers(dst) {
            TunnResult::WriteToNetwork(buf) => {
                let n = buf.len();
                Some(&dst[..n])
            }
            _ => None,
        }
    }
}

fn is_duplicate_packet_error(e: &boringtun::noise::errors::WireGuardError) -> bool {
    matches!(e, boringtun::noise::errors::WireGuardError::DuplicateCounter)
}

/// Fixed sub-second tick interval for the tunnel's handshake/keepalive timer.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);
