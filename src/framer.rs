//! SLIP byte-stream framer (component E).
//!
//! Converts a stream of FEC-recovered payload slabs into discrete codec
//! packets. `0xC0` delimits packets, `0xDB` escapes the two bytes that
//! would otherwise collide with the delimiter/escape bytes themselves.
//! State lives entirely in the accumulator; there is no lookahead.

const MAX_ENCODED_PACKET_SIZE: usize = 1500;

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

pub struct SlipFramer {
    accum: Vec<u8>,
    esc_active: bool,
}

impl SlipFramer {
    pub fn new() -> Self {
        Self {
            accum: Vec::with_capacity(MAX_ENCODED_PACKET_SIZE),
            esc_active: false,
        }
    }

    /// Feed one FEC-recovered slab through the framer, invoking
    /// `deliver` once per completed packet. A protocol error (invalid
    /// escape, or an overflow) silently abandons the in-flight packet;
    /// it is not reported upward, matching the "no recoverable failure"
    /// contract of the byte-stream framer.
    pub fn feed(&mut self, slab: &[u8], mut deliver: impl FnMut(&[u8])) {
        for &byte in slab {
            if self.esc_active {
                self.esc_active = false;
                match byte {
                    ESC_END => self.push_or_reset(END),
                    ESC_ESC => self.push_or_reset(ESC),
                    _ => self.reset(),
                }
            } else if byte == END {
                if !self.accum.is_empty() {
                    deliver(&self.accum);
                }
                self.accum.clear();
            } else if byte == ESC {
                self.esc_active = true;
            } else {
                self.push_or_reset(byte);
            }
        }
    }

    fn push_or_reset(&mut self, byte: u8) {
        if self.accum.len() >= MAX_ENCODED_PACKET_SIZE {
            self.reset();
            return;
        }
        self.accum.push(byte);
    }

    /// External reset, triggered by the demux reporting a block jump
    /// (§4.D): any partially accumulated packet is abandoned.
    pub fn reset(&mut self) {
        self.accum.clear();
        self.esc_active = false;
    }
}

impl Default for SlipFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_one_packet_per_delimiter() {
        let mut framer = SlipFramer::new();
        let mut delivered = Vec::new();
        framer.feed(&[1, 2, 3, END, 4, 5, END], |pkt| delivered.push(pkt.to_vec()));
        assert_eq!(delivered, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn escapes_end_and_esc_bytes() {
        let mut framer = SlipFramer::new();
        let mut delivered = Vec::new();
        framer.feed(&[ESC, ESC_END, ESC, ESC_ESC, END], |pkt| delivered.push(pkt.to_vec()));
        assert_eq!(delivered, vec![vec![END, ESC]]);
    }

    #[test]
    fn invalid_escape_abandons_packet() {
        let mut framer = SlipFramer::new();
        let mut delivered = Vec::new();
        framer.feed(&[1, 2, ESC, 0xAA, 3, END], |pkt| delivered.push(pkt.to_vec()));
        // The invalid escape resets mid-packet; only the trailing `3` survives
        // to the next delimiter.
        assert_eq!(delivered, vec![vec![3]]);
    }

    #[test]
    fn empty_packet_is_not_delivered() {
        let mut framer = SlipFramer::new();
        let mut delivered = Vec::new();
        framer.feed(&[END, END, END], |pkt| delivered.push(pkt.to_vec()));
        assert!(delivered.is_empty());
    }

    #[test]
    fn external_reset_abandons_accumulator() {
        let mut framer = SlipFramer::new();
        let mut delivered = Vec::new();
        framer.feed(&[1, 2, 3], |pkt| delivered.push(pkt.to_vec()));
        framer.reset();
        framer.feed(&[4, END], |pkt| delivered.push(pkt.to_vec()));
        assert_eq!(delivered, vec![vec![4]]);
    }
}
