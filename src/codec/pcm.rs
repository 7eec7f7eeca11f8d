//! Framed PCM decoder (component F, PCM variant).
//!
//! Wire format: 24-bit signed big-endian samples (network byte order,
//! matching the Z/IP-style PCM-24 layout this codebase already uses
//! elsewhere) followed by a trailing 4-byte big-endian CRC-32 over the
//! sample bytes. A length that doesn't divide evenly into 3-byte samples
//! plus the trailing CRC, or a CRC that doesn't validate, increments
//! `crcFailCount` and drops the packet — it is never propagated as an
//! `Err` past this stage (§10.2).

use crc::{Crc, CRC_32_ISO_HDLC};

use super::{AudioDecoder, CodecError};
use crate::stats::STATS;

const CRC_LEN: usize = 4;
const SAMPLE_BYTES: usize = 3;

const FRAME_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct PcmDecoder {
    channels: usize,
    frame_size: usize,
}

impl PcmDecoder {
    pub fn new(sample_rate: u32, channels: usize, frame_duration_ms: usize) -> Self {
        let frame_size = (sample_rate as usize / 1000) * frame_duration_ms;
        Self { channels, frame_size }
    }
}

impl AudioDecoder for PcmDecoder {
    fn decode(&mut self, data: &[u8], output: &mut [f32]) -> Result<usize, CodecError> {
        if data.len() < CRC_LEN || (data.len() - CRC_LEN) % SAMPLE_BYTES != 0 {
            STATS.ch1.crc_fail_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(CodecError::LengthMismatch);
        }

        let (samples, trailer) = data.split_at(data.len() - CRC_LEN);
        let expected_crc = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual_crc = FRAME_CRC.checksum(samples);
        if actual_crc != expected_crc {
            STATS.ch1.crc_fail_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(CodecError::CrcMismatch);
        }

        let sample_count = samples.len() / SAMPLE_BYTES;
        if output.len() < sample_count {
            return Err(CodecError::LengthMismatch);
        }

        const SCALE: f32 = 1.0 / 8_388_608.0;
        for i in 0..sample_count {
            let b0 = samples[i * 3] as i32;
            let b1 = samples[i * 3 + 1] as i32;
            let b2 = samples[i * 3 + 2] as i32;
            let mut raw = (b0 << 16) | (b1 << 8) | b2;
            if raw & 0x800000 != 0 {
                raw |= 0xFF00_0000u32 as i32;
            }
            output[i] = raw as f32 * SCALE;
        }

        Ok(sample_count)
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

/// Encode helper used only by tests to build fixtures matching the wire
/// format above.
#[cfg(test)]
fn encode_frame(samples: &[f32]) -> Vec<u8> {
    const SCALE: f32 = 8_388_607.0;
    let mut out = Vec::with_capacity(samples.len() * SAMPLE_BYTES + CRC_LEN);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let v = (clamped * SCALE) as i32;
        out.push(((v >> 16) & 0xFF) as u8);
        out.push(((v >> 8) & 0xFF) as u8);
        out.push((v & 0xFF) as u8);
    }
    let crc = FRAME_CRC.checksum(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_crc_validated_frame() {
        let input = vec![0.0f32, 0.5, -0.5, 1.0, -1.0, 0.25];
        let frame = encode_frame(&input);

        let mut decoder = PcmDecoder::new(8000, 1, 1);
        let mut decoded = vec![0.0f32; input.len()];
        let n = decoder.decode(&frame, &mut decoded).unwrap();
        assert_eq!(n, input.len());
        for (a, b) in input.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut frame = encode_frame(&[0.1, 0.2, 0.3]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let mut decoder = PcmDecoder::new(8000, 1, 1);
        let mut decoded = vec![0.0f32; 3];
        assert!(matches!(decoder.decode(&frame, &mut decoded), Err(CodecError::CrcMismatch)));
    }

    #[test]
    fn misaligned_length_is_rejected() {
        let mut decoder = PcmDecoder::new(8000, 1, 1);
        let mut decoded = vec![0.0f32; 3];
        assert!(matches!(
            decoder.decode(&[0u8; 2], &mut decoded),
            Err(CodecError::LengthMismatch)
        ));
    }
}
