//! Secure multi-endpoint transport (component C).
//!
//! Owns N [`socket::EndpointSocket`]s and the single shared
//! [`tunnel::Tunnel`]. Runs one discovery/receive thread per endpoint plus
//! one realtime-elevated tick thread, and exposes `send`/`deinit` to the
//! caller. The raw-function-pointer callback of the distilled spec is
//! replaced with a single-method capability trait, per §9's redesign note.

pub mod socket;
pub mod tunnel;

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Settings;
use crate::error::Result;
use crate::stats::STATS;
use socket::EndpointSocket;
use tunnel::{Tunnel, TunnelEvent, TICK_INTERVAL};

/// Per-endpoint IP+UDP header overhead folded into the byte counters, per
/// §4.C's `bytesIn += len + 28` / `bytesOut += len + 28` accounting.
const IP_UDP_OVERHEAD: u64 = 28;

const SCRATCH_LEN: usize = 1500;

/// Receives cleartext payloads recovered from the tunnel. One call per
/// decrypted datagram; implementations must not block (the caller holds
/// the tunnel lock across `onPeerPacket`'s decrypt step, though not across
/// this callback itself).
pub trait PacketSink: Send + Sync {
    fn on_packet(&self, payload: &[u8]);
}

impl<F: Fn(&[u8]) + Send + Sync> PacketSink for F {
    fn on_packet(&self, payload: &[u8]) {
        self(payload)
    }
}

struct JoinHandles {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Transport {
    sockets: Vec<Arc<EndpointSocket>>,
    tunnel: Arc<Tunnel>,
    threads: Option<JoinHandles>,
}

impl Transport {
    /// Bind one socket per configured endpoint, stand up the shared
    /// tunnel, and start the receive/discovery threads plus the tick
    /// thread. `sink` is invoked once per cleartext payload the tunnel
    /// recovers, from whichever endpoint's receive thread decrypted it.
    pub fn init(settings: &Settings, sink: Arc<dyn PacketSink>) -> Result<Self> {
        let local_private = settings.decode_local_private_key()?;
        let peer_public = settings.decode_peer_public_key()?;
        let tunnel = Arc::new(Tunnel::new(local_private, peer_public)?);

        let mut sockets = Vec::with_capacity(settings.endpoints.len());
        for ep in &settings.endpoints {
            sockets.push(Arc::new(EndpointSocket::bind(&ep.interface)?));
        }

        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::with_capacity(sockets.len() + 1);

        for (idx, socket) in sockets.iter().enumerate() {
            let socket = Arc::clone(socket);
            let all_sockets = sockets.clone();
            let tunnel = Arc::clone(&tunnel);
            let sink = Arc::clone(&sink);
            let running = Arc::clone(&running);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("aural-relay-recv-{idx}"))
                    .spawn(move || recv_loop(idx, socket, all_sockets, tunnel, sink, running))
                    .expect("spawning receive thread"),
            );
        }

        {
            let all_sockets = sockets.clone();
            let tunnel = Arc::clone(&tunnel);
            let running = Arc::clone(&running);
            handles.push(
                std::thread::Builder::new()
                    .name("aural-relay-tick".into())
                    .spawn(move || tick_loop(all_sockets, tunnel, running))
                    .expect("spawning tick thread"),
            );
        }

        for endpoint_stats in STATS.endpoints.iter().take(sockets.len()) {
            endpoint_stats.open.store(1, Ordering::Relaxed);
        }

        Ok(Self {
            sockets,
            tunnel,
            threads: Some(JoinHandles { running, handles }),
        })
    }

    /// Wrap `buf` in a synthetic IPv4 header and broadcast the tunnel's
    /// ciphertext to every endpoint with a known peer. Per the send-to-all
    /// policy (§4.C), a single socket failing to send never aborts the
    /// others.
    pub fn send(&self, buf: &[u8]) -> Result<()> {
        let mut plaintext = Vec::with_capacity(buf.len() + 20);
        plaintext.extend_from_slice(&synthetic_ipv4_header(buf.len()));
        plaintext.extend_from_slice(buf);

        let mut scratch = [0u8; SCRATCH_LEN + 20];
        let ciphertext = self.tunnel.encapsulate(&plaintext, &mut scratch)?;
        if let Some(ciphertext) = ciphertext {
            self.broadcast(ciphertext, buf.len());
        }
        Ok(())
    }

    fn broadcast(&self, data: &[u8], payload_len: usize) {
        for (idx, socket) in self.sockets.iter().enumerate() {
            match socket.send_to_peer(data) {
                Ok(Some(_)) => {
                    STATS
                        .endpoint(idx)
                        .bytes_out
                        .fetch_add(payload_len as u64 + IP_UDP_OVERHEAD, Ordering::Relaxed);
                }
                Ok(None) => {}
                Err(e) => log::debug!("endpoint {idx}: send failed: {e}"),
            }
        }
        for (idx, socket) in self.sockets.iter().enumerate() {
            STATS
                .endpoint(idx)
                .send_congested
                .store(socket.is_congested() as u32, Ordering::Relaxed);
        }
    }

    /// Best-effort shutdown (§10.5): flips the running flag, closes no
    /// sockets explicitly (dropping them does that), and joins every
    /// thread with a bounded timeout, logging rather than panicking if a
    /// join doesn't complete in time.
    pub fn deinit(&mut self) {
        let Some(JoinHandles { running, handles }) = self.threads.take() else {
            return;
        };
        running.store(false, Ordering::Relaxed);
        for handle in handles {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                log::warn!("transport thread {name} panicked during shutdown");
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn synthetic_ipv4_header(payload_len: usize) -> [u8; 20] {
    let mut header = [0u8; 20];
    header[0] = 0x45; // version 4, IHL 5
    let total_len = (payload_len as u16 + 20).to_be_bytes();
    header[2] = total_len[0];
    header[3] = total_len[1];
    header
}

fn recv_loop(
    idx: usize,
    socket: Arc<EndpointSocket>,
    all_sockets: Vec<Arc<EndpointSocket>>,
    tunnel: Arc<Tunnel>,
    sink: Arc<dyn PacketSink>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; SCRATCH_LEN];
    let mut scratch = [0u8; SCRATCH_LEN];
    while running.load(Ordering::Relaxed) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => {
                log::debug!("endpoint {idx}: recv error: {e}");
                continue;
            }
        };

        socket.note_peer(from);
        STATS
            .endpoint(idx)
            .bytes_in
            .fetch_add(n as u64 + IP_UDP_OVERHEAD, Ordering::Relaxed);

        on_peer_packet(idx, &buf[..n], from.ip(), &tunnel, &all_sockets, &sink, &mut scratch);
    }
}

fn on_peer_packet(
    idx: usize,
    ciphertext: &[u8],
    from: IpAddr,
    tunnel: &Tunnel,
    all_sockets: &[Arc<EndpointSocket>],
    sink: &Arc<dyn PacketSink>,
    scratch: &mut [u8],
) {
    match tunnel.decapsulate(Some(from), ciphertext, scratch) {
        TunnelEvent::CleartextIpv4(payload) => {
            // Strip the synthetic 20-byte IPv4 header before handing off.
            if payload.len() > 20 {
                sink.on_packet(&payload[20..]);
            }
        }
        TunnelEvent::ToNetwork(bytes) => {
            let bytes = bytes.to_vec();
            for (sidx, socket) in all_sockets.iter().enumerate() {
                if let Err(e) = socket.send_to_peer(&bytes) {
                    log::debug!("endpoint {sidx}: handshake response send failed: {e}");
                }
            }
            let _ = idx;
        }
        TunnelEvent::Done => {}
    }
}

fn tick_loop(sockets: Vec<Arc<EndpointSocket>>, tunnel: Arc<Tunnel>, running: Arc<AtomicBool>) {
    elevate_current_thread();
    let mut scratch = [0u8; SCRATCH_LEN];
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(TICK_INTERVAL);
        if let Some(bytes) = tunnel.tick(&mut scratch) {
            let bytes = bytes.to_vec();
            for (idx, socket) in sockets.iter().enumerate() {
                if let Err(e) = socket.send_to_peer(&bytes) {
                    log::debug!("endpoint {idx}: tick send failed: {e}");
                }
            }
        }
    }
}

/// Best-effort realtime priority bump for the tick thread, so it is never
/// starved behind the decode/receive threads that also contend on the
/// tunnel lock. A failure here is not fatal; the tick loop still runs at
/// normal priority.
#[cfg(target_os = "linux")]
fn elevate_current_thread() {
    unsafe {
        let params = libc::sched_param { sched_priority: 10 };
        let _ = libc::sched_setscheduler(0, libc::SCHED_FIFO, &params);
    }
}

#[cfg(target_os = "windows")]
fn elevate_current_thread() {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
    };
    unsafe {
        SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL);
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn elevate_current_thread() {}
