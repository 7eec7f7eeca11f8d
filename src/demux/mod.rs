//! Packet demultiplexer & FEC (component D).
//!
//! A cleartext payload handed up from the transport is a small header
//! (channel id + SBN) followed by one FEC symbol. This module tracks SBN
//! ordering per channel, buffers symbols until a block is decodable, runs
//! the RaptorQ decode, and delivers the recovered payload slab to the
//! channel's callback. A per-channel lock (mirroring the tunnel's own
//! single-lock design) serialises delivery so the downstream framer never
//! sees concurrent `onBlock` calls from different endpoints.

use parking_lot::Mutex;
use raptorq::{Decoder, EncodingPacket, ObjectTransmissionInformation, PayloadId};

use crate::stats::STATS;

/// Header fields parsed off the front of every cleartext payload. The wire
/// layout (channel id, then SBN, then symbol id, then symbol bytes) is a
/// single fixed-size prefix; anything shorter is simply unparsable and
/// dropped.
const HEADER_LEN: usize = 4;

pub struct ParsedHeader {
    pub ch_id: u8,
    pub sbn: u8,
    pub esi: u8,
}

/// Parses `chId` (1 byte), `sbn` (1 byte), `esi` (1 byte, the encoding
/// symbol id within the block), and a reserved byte, followed by the
/// symbol payload. Returns `None` if `payload` is too short to contain the
/// header.
pub fn parse_header(payload: &[u8]) -> Option<(ParsedHeader, &[u8])> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    let header = ParsedHeader {
        ch_id: payload[0],
        sbn: payload[1],
        esi: payload[2],
    };
    Some((header, &payload[HEADER_LEN..]))
}

/// A channel's FEC parameters: `K` source symbols of `L` bytes each.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSpec {
    pub source_symbols: u8,
    pub symbol_len: usize,
}

struct BlockBuffer {
    sbn: u8,
    decoder: Decoder,
    symbols_received: u8,
}

impl BlockBuffer {
    fn new(spec: ChannelSpec, sbn: u8) -> Self {
        let oti = ObjectTransmissionInformation::new(
            spec.source_symbols as u64 * spec.symbol_len as u64,
            spec.symbol_len as u16,
            1,
            1,
            1,
        );
        Self {
            sbn,
            decoder: Decoder::new(oti),
            symbols_received: 0,
        }
    }
}

/// Per-channel SBN tracking, symbol buffering, and FEC decode. Exactly one
/// instance exists in this core (the audio channel), but the type itself
/// is channel-polymorphic per the distilled spec.
pub struct Channel {
    spec: ChannelSpec,
    state: Mutex<ChannelState>,
    on_block: Box<dyn Fn(&[u8], u8) + Send + Sync>,
}

struct ChannelState {
    sbn_last: Option<u8>,
    current: Option<BlockBuffer>,
}

/// Outcome of feeding a channel an SBN, for the caller (the framer) to act
/// on: a forward jump must reset its accumulator even though no block is
/// delivered.
pub enum SbnOutcome {
    Delivered,
    Duplicate,
    OutOfOrder,
    ForwardJump,
}

impl Channel {
    pub fn new(spec: ChannelSpec, on_block: impl Fn(&[u8], u8) + Send + Sync + 'static) -> Self {
        Self {
            spec,
            state: Mutex::new(ChannelState {
                sbn_last: None,
                current: None,
            }),
            on_block: Box::new(on_block),
        }
    }

    /// Feed one symbol (a header already peeled off by [`parse_header`])
    /// into this channel. Returns the SBN ordering outcome so the caller
    /// can reset its framer on a forward jump.
    ///
    /// SBN ordering is a per-*block* decision, not a per-symbol one: every
    /// symbol of a `K`-symbol block carries the same SBN, so a symbol that
    /// belongs to the block currently being accumulated is just fed
    /// straight into the decoder without re-running the dup/ooo/jump
    /// classification (that classification only fires on the first symbol
    /// of a new block).
    pub fn feed(&self, header: &ParsedHeader, symbol: &[u8]) -> SbnOutcome {
        let mut state = self.state.lock();

        let same_block_in_progress = state
            .current
            .as_ref()
            .map(|b| b.sbn == header.sbn)
            .unwrap_or(false);

        if same_block_in_progress {
            self.accept_symbol(&mut state, header, symbol);
            return SbnOutcome::Delivered;
        }

        let outcome = match state.sbn_last {
            None => SbnOutcome::Delivered,
            Some(last) => {
                let diff = sbn_diff(last, header.sbn);
                if diff == 0 {
                    STATS.ch1.dup_block_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    SbnOutcome::Duplicate
                } else if diff < 0 {
                    STATS.ch1.ooo_block_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    SbnOutcome::OutOfOrder
                } else if diff > 1 {
                    STATS
                        .ch1
                        .ooo_block_count
                        .fetch_add((diff - 1) as u64, std::sync::atomic::Ordering::Relaxed);
                    SbnOutcome::ForwardJump
                } else {
                    SbnOutcome::Delivered
                }
            }
        };

        state.sbn_last = Some(header.sbn);

        if matches!(outcome, SbnOutcome::Delivered) {
            self.accept_symbol(&mut state, header, symbol);
        }

        outcome
    }

    fn accept_symbol(&self, state: &mut ChannelState, header: &ParsedHeader, symbol: &[u8]) {
        if state
            .current
            .as_ref()
            .map(|b| b.sbn != header.sbn)
            .unwrap_or(true)
        {
            state.current = Some(BlockBuffer::new(self.spec, header.sbn));
        }

        let Some(block) = state.current.as_mut() else {
            return;
        };

        let packet_id = PayloadId::new(header.sbn, header.esi as u32);
        let packet = EncodingPacket::new(packet_id, symbol.to_vec());
        block.decoder.add_new_packet(packet);
        block.symbols_received = block.symbols_received.saturating_add(1);

        if let Some(slab) = block.decoder.get_result() {
            let sbn = block.sbn;
            state.current = None;
            (self.on_block)(&slab, sbn);
        }
    }
}

/// Signed difference accounting for 8-bit modular wraparound, per the
/// ordering rule in the demux contract: a raw gap of more than half the
/// modulus is treated as having wrapped, in whichever direction brings it
/// back within `[-128, 128]`. This is symmetric — it wraps a jump forward
/// across 255→0 exactly the way it wraps a jump backward across 0→255 —
/// unlike a one-sided "is `last` ahead of `sbn`" check, which only catches
/// the forward case.
fn sbn_diff(last: u8, sbn: u8) -> i32 {
    let mut diff = sbn as i32 - last as i32;
    if diff > 128 {
        diff -= 256;
    } else if diff < -128 {
        diff += 256;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sbn_diff_handles_wraparound() {
        assert_eq!(sbn_diff(10, 11), 1);
        assert_eq!(sbn_diff(10, 10), 0);
        assert_eq!(sbn_diff(11, 10), -1);
        assert_eq!(sbn_diff(255, 0), 1);
        assert_eq!(sbn_diff(0, 255), -1);
    }

    #[test]
    fn forward_jump_is_reported_without_delivery() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered2 = Arc::clone(&delivered);
        let spec = ChannelSpec {
            source_symbols: 4,
            symbol_len: 16,
        };
        let channel = Channel::new(spec, move |_, _| {
            delivered2.fetch_add(1, Ordering::Relaxed);
        });

        let header0 = ParsedHeader { ch_id: 0, sbn: 0, esi: 0 };
        let outcome = channel.feed(&header0, &[0u8; 16]);
        assert!(matches!(outcome, SbnOutcome::Delivered));

        let header_jump = ParsedHeader { ch_id: 0, sbn: 5, esi: 0 };
        let outcome = channel.feed(&header_jump, &[0u8; 16]);
        assert!(matches!(outcome, SbnOutcome::ForwardJump));
    }

    #[test]
    fn resending_an_already_completed_block_is_reported_as_duplicate() {
        let spec = ChannelSpec {
            source_symbols: 4,
            symbol_len: 16,
        };
        let channel = Channel::new(spec, |_, _| {});

        for esi in 0..4u8 {
            let header = ParsedHeader { ch_id: 0, sbn: 3, esi };
            channel.feed(&header, &[0u8; 16]);
        }

        // The block already decoded and was cleared from `current`; a
        // symbol resent for the same SBN (e.g. via a second redundant
        // path) must now be recognised as a duplicate block, not fed into
        // a fresh decode.
        let header = ParsedHeader { ch_id: 0, sbn: 3, esi: 0 };
        let outcome = channel.feed(&header, &[0u8; 16]);
        assert!(matches!(outcome, SbnOutcome::Duplicate));
    }

    #[test]
    fn multi_symbol_block_is_not_misclassified_as_duplicate() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered2 = Arc::clone(&delivered);
        let spec = ChannelSpec {
            source_symbols: 4,
            symbol_len: 16,
        };
        let channel = Channel::new(spec, move |_, _| {
            delivered2.fetch_add(1, Ordering::Relaxed);
        });

        let dup_before = STATS.ch1.dup_block_count.load(Ordering::Relaxed);

        // All four symbols of one block share the same SBN; only the
        // first should ever hit the ordering classifier.
        for esi in 0..4u8 {
            let header = ParsedHeader { ch_id: 0, sbn: 7, esi };
            let outcome = channel.feed(&header, &[0u8; 16]);
            assert!(matches!(outcome, SbnOutcome::Delivered));
        }

        assert_eq!(delivered.load(Ordering::Relaxed), 1);
        assert_eq!(STATS.ch1.dup_block_count.load(Ordering::Relaxed), dup_before);
    }
}
