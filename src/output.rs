//! Audio output bridge (component H).
//!
//! Owns the realtime device callback: pulls samples out of the bridge
//! ring, writes zeros for any deficit, and folds ring-fill/xrun/timing
//! observations into the stats registry every callback. The callback
//! itself never blocks, allocates, or logs.

use std::sync::atomic::Ordering;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use crate::error::{Error, Result};
use crate::ring::RingConsumer;
use crate::stats::STATS;

/// EWMA smoothing factor for the filtered ring-fill gauge the syncer's
/// controller reads.
const FILL_EWMA_ALPHA: f64 = 0.05;

pub struct AudioOutput {
    stream: Stream,
}

impl AudioOutput {
    /// `audio_init` + `audio_start` collapsed into one call: the ring
    /// reference is recorded and the device stream is opened and started
    /// in the same step, since this implementation doesn't need the
    /// decode thread to start producing before the device is ready (the
    /// ring is pre-filled before this is called).
    pub fn start(device_name: &str, channels: usize, sample_rate: u32, consumer: RingConsumer) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .or_else(|| host.default_output_device())
            .ok_or_else(|| Error::Device(format!("no output device matching '{device_name}'")))?;

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let supported_format = device
            .default_output_config()
            .map_err(|e| Error::Device(e.to_string()))?
            .sample_format();

        let mut consumer = consumer;
        let mut last_callback = Instant::now();

        let err_fn = |e: cpal::StreamError| {
            log::warn!("audio output stream error: {e}");
            STATS.ch1_audio.audio_loop_xrun_count.fetch_add(1, Ordering::Relaxed);
        };

        let stream = match supported_format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        fill_callback(data, &mut consumer, &mut last_callback);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::Device(e.to_string()))?,
            other => return Err(Error::Device(format!("unsupported sample format: {other:?}"))),
        };

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self { stream })
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stream.pause();
    }
}

fn fill_callback(data: &mut [f32], consumer: &mut RingConsumer, last_callback: &mut Instant) {
    STATS
        .ch1_audio
        .stream_buffer_pos
        .store(consumer.size() as u32, Ordering::Relaxed);

    let filtered = STATS.ch1_audio.filtered_fill.load(Ordering::Relaxed);
    let updated = filtered + FILL_EWMA_ALPHA * (consumer.size() as f64 - filtered);
    STATS.ch1_audio.filtered_fill.store(updated, Ordering::Relaxed);

    let available = consumer.size().min(data.len());
    if available > 0 {
        consumer.dequeue_slice(&mut data[..available]);
    }
    if available < data.len() {
        for sample in &mut data[available..] {
            *sample = 0.0;
        }
        STATS.ch1_audio.buffer_underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    let now = Instant::now();
    let elapsed_micros = now.duration_since(*last_callback).as_micros() as u64;
    *last_callback = now;
    STATS.record_block_timing(elapsed_micros);
}
