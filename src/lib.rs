//! aural-relay: receive-side pipeline for a redundant-path, secure audio
//! transport.
//!
//! A sender fragments an encoded audio stream into FEC blocks and
//! replicates them across several encrypted UDP paths; this crate ingests
//! those paths, reconstructs the byte stream, decodes it, resamples it to
//! the local device clock, and feeds a continuously running output
//! device. See each module for its piece of that pipeline.

pub mod codec;
pub mod config;
pub mod demux;
pub mod error;
pub mod framer;
pub mod output;
pub mod ring;
pub mod stats;
pub mod syncer;
pub mod transport;

pub use error::{Error, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use config::{Encoding, Settings};
use demux::{Channel, ChannelSpec};
use framer::SlipFramer;
use output::AudioOutput;
use ring::{prefill_silence, sample_ring};
use syncer::Syncer;
use transport::{PacketSink, Transport};

/// How often the closed-loop clock-drift controller re-evaluates the
/// ring-fill gauge and retunes the syncer (§4.G's "a slow task").
const SYNCER_CONTROL_INTERVAL: Duration = Duration::from_millis(100);

/// Wires components A through H together into a running receiver. Owns
/// the transport, the demux channel, and the audio output stream; dropping
/// this tears the whole pipeline down.
pub struct Receiver {
    transport: Transport,
    audio_output: AudioOutput,
    controller_running: Arc<AtomicBool>,
    controller_thread: Option<JoinHandle<()>>,
}

impl Receiver {
    pub fn start(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let channels = settings.audio.network_channel_count as usize;
        let ring_length = match settings.audio.encoding {
            Encoding::Opus => settings.opus.as_ref().map(|o| o.decode_ring_length).unwrap_or(8192),
            Encoding::Pcm => settings.pcm.as_ref().map(|p| p.decode_ring_length).unwrap_or(8192),
        };
        let (mut producer, consumer) = sample_ring(ring_length);
        prefill_silence(&mut producer);

        let encoded_rate = match settings.audio.encoding {
            Encoding::Opus => config::AUDIO_OPUS_SAMPLE_RATE,
            Encoding::Pcm => settings
                .pcm
                .as_ref()
                .map(|p| p.sample_rate)
                .unwrap_or(settings.audio.io_sample_rate),
        };
        let frame_size = match settings.audio.encoding {
            Encoding::Opus => settings.opus.as_ref().map(|o| o.frame_size).unwrap_or(960),
            Encoding::Pcm => settings.pcm.as_ref().map(|p| p.frame_size).unwrap_or(960),
        };

        let decoder: Box<dyn codec::AudioDecoder> = match settings.audio.encoding {
            Encoding::Opus => Box::new(
                codec::opus::OpusDecoder::new(encoded_rate, channels, frame_size)
                    .map_err(|e| Error::Device(e.to_string()))?,
            ),
            Encoding::Pcm => {
                let frame_ms = (frame_size / (encoded_rate as usize / 1000).max(1)).max(1);
                Box::new(codec::pcm::PcmDecoder::new(encoded_rate, channels, frame_ms))
            }
        };

        let syncer = Syncer::init(encoded_rate, settings.audio.io_sample_rate, frame_size, channels);

        let pipeline = Arc::new(Mutex::new(Pipeline {
            decoder,
            syncer,
            producer,
            scratch: vec![0.0f32; frame_size * channels],
        }));

        let framer = Arc::new(Mutex::new(SlipFramer::new()));

        let fec_spec = ChannelSpec {
            source_symbols: settings.fec.source_symbols_per_block,
            symbol_len: settings.fec.symbol_len,
        };

        let channel = Channel::new(fec_spec, {
            let pipeline = Arc::clone(&pipeline);
            let framer = Arc::clone(&framer);
            move |slab, _sbn| {
                let mut framer = framer.lock().unwrap_or_else(|p| p.into_inner());
                let mut pipeline = pipeline.lock().unwrap_or_else(|p| p.into_inner());
                framer.feed(slab, |packet| pipeline.decode_and_enqueue(packet));
            }
        });

        let sink: Arc<dyn PacketSink> = Arc::new(DemuxSink {
            channel: Arc::new(channel),
            framer,
        });
        let transport = Transport::init(settings, sink)?;

        let audio_output = AudioOutput::start(
            &settings.audio.device_name,
            channels,
            settings.audio.io_sample_rate,
            consumer,
        )?;

        let controller_running = Arc::new(AtomicBool::new(true));
        let controller_thread = {
            let pipeline = Arc::clone(&pipeline);
            let running = Arc::clone(&controller_running);
            let target_fill = ring_length as f64 / 2.0;
            std::thread::Builder::new()
                .name("aural-relay-syncer-ctl".into())
                .spawn(move || {
                    while running.load(Ordering::Relaxed) {
                        std::thread::sleep(SYNCER_CONTROL_INTERVAL);
                        let mut pipeline = pipeline.lock().unwrap_or_else(|p| p.into_inner());
                        pipeline.syncer.control_tick(target_fill);
                    }
                })
                .expect("spawning syncer control thread")
        };

        Ok(Self {
            transport,
            audio_output,
            controller_running,
            controller_thread: Some(controller_thread),
        })
    }

    pub fn send(&self, buf: &[u8]) -> Result<()> {
        self.transport.send(buf)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.transport.deinit();
        self.controller_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.controller_thread.take() {
            if handle.join().is_err() {
                log::warn!("syncer control thread panicked during shutdown");
            }
        }
    }
}

struct Pipeline {
    decoder: Box<dyn codec::AudioDecoder>,
    syncer: Syncer,
    producer: ring::RingProducer,
    scratch: Vec<f32>,
}

impl Pipeline {
    fn decode_and_enqueue(&mut self, packet: &[u8]) {
        let n = match self.decoder.decode(packet, &mut self.scratch) {
            Ok(n) => n,
            Err(e) => {
                log::debug!("codec decode dropped packet: {e}");
                return;
            }
        };

        loop {
            let result = self.syncer.enqueue_buf(&self.scratch[..n], &mut self.producer);
            if result != syncer::OVERRUN {
                return;
            }
            // Stall until the ring drains back to the setpoint before
            // retrying, per the backpressure contract in 4.G.
            while self.producer.size() > self.producer.capacity() / 2 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

struct DemuxSink {
    channel: Arc<Channel>,
    framer: Arc<Mutex<SlipFramer>>,
}

impl PacketSink for DemuxSink {
    fn on_packet(&self, payload: &[u8]) {
        let Some((header, symbol)) = demux::parse_header(payload) else {
            return;
        };
        if header.ch_id != 0 {
            return;
        }
        if let demux::SbnOutcome::ForwardJump = self.channel.feed(&header, symbol) {
            self.framer.lock().unwrap_or_else(|p| p.into_inner()).reset();
        }
    }
}
