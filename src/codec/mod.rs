//! Audio decoder stage (component F).
//!
//! This core is receive-only: there is no encode path, so the codec
//! surface is a single `AudioDecoder` trait with two implementations,
//! selected at init by `config::Encoding`.

pub mod opus;
pub mod pcm;

/// Codec-local error, surfaced only as a stats counter / log line per
/// §10.2 — the pipeline never returns this past the decode stage.
#[derive(Debug)]
pub enum CodecError {
    /// Decoded/packet length didn't match what the frame size demands.
    LengthMismatch,
    /// The PCM frame's trailing CRC didn't validate.
    CrcMismatch,
    /// The underlying codec library reported a decode failure.
    LibraryError(i32),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::LengthMismatch => write!(f, "decoded length mismatch"),
            CodecError::CrcMismatch => write!(f, "CRC validation failed"),
            CodecError::LibraryError(code) => write!(f, "codec library error: {code}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Audio decoder trait: one encoded packet in, one block of interleaved
/// float samples out.
pub trait AudioDecoder: Send {
    /// Decode one packet into `output`. Returns the number of samples
    /// written (across all channels), or an error — which the caller
    /// turns into a stats counter, never a propagated `Result`.
    fn decode(&mut self, data: &[u8], output: &mut [f32]) -> Result<usize, CodecError>;

    /// Expected frame size in samples per channel.
    fn frame_size(&self) -> usize;

    fn channels(&self) -> usize;

    fn total_samples_per_frame(&self) -> usize {
        self.frame_size() * self.channels()
    }
}
