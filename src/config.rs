//! Configuration surface consumed from the (external) `globals` collaborator.
//!
//! This module only defines the validated shape; locating, watching, and
//! merging the actual TOML file on disk is the `globals` collaborator's job
//! and is out of scope for this crate. Callers hand us a `Settings` already
//! parsed, or a TOML string to parse with [`Settings::from_toml_str`].

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encoding {
    Opus,
    Pcm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSettings {
    pub encoding: Encoding,
    pub network_channel_count: u16,
    pub io_sample_rate: u32,
    pub device_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpusSettings {
    pub frame_size: usize,
    pub max_packet_size: usize,
    pub decode_ring_length: usize,
}

pub const AUDIO_OPUS_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Clone, Deserialize)]
pub struct PcmSettings {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub decode_ring_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FecSettings {
    pub source_symbols_per_block: u8,
    pub symbol_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSettings {
    pub interface: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootSettings {
    pub private_key: String,
    pub peer_public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub audio: AudioSettings,
    pub opus: Option<OpusSettings>,
    pub pcm: Option<PcmSettings>,
    pub fec: FecSettings,
    pub endpoints: Vec<EndpointSettings>,
    pub root: RootSettings,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Cross-field validation the schema alone can't express.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::Config("endpoints.endpointCount must be >= 1".into()));
        }
        match self.audio.encoding {
            Encoding::Opus if self.opus.is_none() => {
                return Err(Error::Config("audio.encoding=OPUS requires [opus]".into()))
            }
            Encoding::Pcm if self.pcm.is_none() => {
                return Err(Error::Config("audio.encoding=PCM requires [pcm]".into()))
            }
            _ => {}
        }
        if self.fec.source_symbols_per_block == 0 {
            return Err(Error::Config("fec.sourceSymbolsPerBlock must be >= 1".into()));
        }
        if self.audio.network_channel_count == 0 {
            return Err(Error::Config("audio.networkChannelCount must be >= 1".into()));
        }
        Ok(())
    }

    pub fn decode_local_private_key(&self) -> Result<[u8; 32]> {
        decode_x25519_key(&self.root.private_key)
    }

    pub fn decode_peer_public_key(&self) -> Result<[u8; 32]> {
        decode_x25519_key(&self.root.peer_public_key)
    }
}

fn decode_x25519_key(b64: &str) -> Result<[u8; 32]> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| Error::Config(format!("bad base64 key: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Config("X25519 key must decode to exactly 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [audio]
        encoding = "OPUS"
        network_channel_count = 2
        io_sample_rate = 48000
        device_name = "default"

        [opus]
        frame_size = 960
        max_packet_size = 1276
        decode_ring_length = 8192

        [fec]
        source_symbols_per_block = 4
        symbol_len = 256

        [[endpoints]]
        interface = "eth0"

        [[endpoints]]
        interface = "eth1"

        [root]
        private_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        peer_public_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
    "#;

    #[test]
    fn parses_and_validates() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.endpoints.len(), 2);
        assert_eq!(settings.audio.encoding, Encoding::Opus);
    }

    #[test]
    fn rejects_missing_opus_block() {
        let bad = SAMPLE.replace("[opus]", "[notopus]");
        let settings = Settings::from_toml_str(&bad).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_no_endpoints() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let mut settings = settings;
        settings.endpoints.clear();
        assert!(settings.validate().is_err());
    }
}
