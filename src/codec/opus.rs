//! Opus decoder (component F, Opus variant).
//!
//! A single-stream Opus decoder via `audiopus`. A decoded length that
//! doesn't match `audioFrameSize` increments `codecErrorCount` and drops
//! the packet (§4.F) rather than returning partial audio.

use audiopus::coder::Decoder as OpusCoder;
use audiopus::{Channels, SampleRate};

use super::{AudioDecoder, CodecError};
use crate::stats::STATS;

pub struct OpusDecoder {
    inner: OpusCoder,
    channels: usize,
    frame_size: usize,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: usize, frame_size: usize) -> Result<Self, CodecError> {
        let rate = SampleRate::try_from(sample_rate as i32).map_err(|_| CodecError::LibraryError(-1))?;
        let ch = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::LibraryError(-1)),
        };
        let inner = OpusCoder::new(rate, ch).map_err(|_| CodecError::LibraryError(-1))?;
        Ok(Self {
            inner,
            channels,
            frame_size,
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8], output: &mut [f32]) -> Result<usize, CodecError> {
        let expected = self.total_samples_per_frame();
        if output.len() < expected {
            return Err(CodecError::LengthMismatch);
        }

        let packet = audiopus::packet::Packet::try_from(data).map_err(|_| CodecError::LibraryError(-2))?;
        let written = self
            .inner
            .decode_float(Some(packet), &mut output[..expected], false)
            .map_err(|_| {
                STATS.ch1.codec_error_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                CodecError::LibraryError(-3)
            })?;

        if written != self.frame_size {
            STATS.ch1.codec_error_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(CodecError::LengthMismatch);
        }

        Ok(written * self.channels)
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn channels(&self) -> usize {
        self.channels
    }
}
