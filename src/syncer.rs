//! Syncer: async sample-rate conversion plus clock-drift feedback
//! (component G).
//!
//! Resamples decoded audio from the sender's nominal rate to the local
//! device rate via an asynchronous polyphase resampler, then enqueues the
//! result into the bridge ring. A slow PI controller reads a filtered
//! ring-fill gauge (updated by the output bridge on every callback) and
//! nudges the resampler's ratio so the ring tends toward half-full.

use std::sync::atomic::Ordering;

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::ring::RingProducer;
use crate::stats::STATS;

/// Returned by [`Syncer::enqueue_buf`] when pushing resampled output would
/// overflow the ring; the caller is expected to stall until the ring
/// drains to <= R/2, per §4.G.
pub const OVERRUN: i32 = -2;

/// PI controller gains, chosen small enough that `u` stays well inside the
/// ±0.1% band the syncer's ratio is constrained to (§3 `SyncerState`).
const KP: f64 = 1e-6;
const KI: f64 = 1e-8;
const MAX_U: f64 = 1e-3;

pub struct Syncer {
    resampler: SincFixedIn<f32>,
    channels: usize,
    nominal_in_rate: f64,
    nominal_out_rate: f64,
    current_ratio: f64,
    integral: f64,
}

impl Syncer {
    pub fn init(fin: u32, fout: u32, frame_size: usize, channels: usize) -> Self {
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.925,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = fout as f64 / fin as f64;
        let resampler = SincFixedIn::<f32>::new(ratio, 1.1, params, frame_size, channels)
            .expect("constructing resampler with valid parameters");

        STATS.ch1_audio.current_ratio.store(ratio, Ordering::Relaxed);

        Self {
            resampler,
            channels,
            nominal_in_rate: fin as f64,
            nominal_out_rate: fout as f64,
            current_ratio: ratio,
            integral: 0.0,
        }
    }

    /// Push one decoded block of interleaved samples through the
    /// resampler and enqueue the result into `ring`. Returns `OVERRUN` if
    /// the ring cannot hold the resampled output.
    pub fn enqueue_buf(&mut self, samples: &[f32], ring: &mut RingProducer) -> i32 {
        let per_channel = samples.len() / self.channels;
        let mut deinterleaved = vec![Vec::with_capacity(per_channel); self.channels];
        for (i, &s) in samples.iter().enumerate() {
            deinterleaved[i % self.channels].push(s);
        }

        let output = match self.resampler.process(&deinterleaved, None) {
            Ok(out) => out,
            Err(_) => return OVERRUN,
        };

        let out_frames = output.first().map(|c| c.len()).unwrap_or(0);
        let mut interleaved = Vec::with_capacity(out_frames * self.channels);
        for frame in 0..out_frames {
            for channel in output.iter() {
                interleaved.push(channel[frame]);
            }
        }

        if ring.size() + interleaved.len() > ring.capacity() {
            return OVERRUN;
        }
        ring.enqueue_slice(&interleaved);
        0
    }

    /// Atomically retune the target input rate so the resampler smoothly
    /// follows a changing sender clock.
    pub fn change_rate(&mut self, new_fin: f64) {
        self.nominal_in_rate = new_fin;
        let ratio = self.nominal_out_rate / new_fin;
        if self.resampler.set_resample_ratio(ratio, true).is_ok() {
            self.current_ratio = ratio;
            STATS.ch1_audio.current_ratio.store(ratio, Ordering::Relaxed);
        }
    }

    /// One tick of the closed-loop clock estimator: read the filtered
    /// fill gauge, compute the PI-controlled adjustment, and retune.
    /// `target_fill` is `R/2` for the ring this syncer feeds.
    pub fn control_tick(&mut self, target_fill: f64) {
        let filtered_fill = STATS.ch1_audio.filtered_fill.load(Ordering::Relaxed);
        let error = filtered_fill - target_fill;

        self.integral += error;
        let mut u = KP * error + KI * self.integral;
        u = u.clamp(-MAX_U, MAX_U);

        let new_fin = self.nominal_in_rate * (1.0 + u);
        self.change_rate(new_fin);
    }

    pub fn current_ratio(&self) -> f64 {
        self.current_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::sample_ring;

    #[test]
    fn control_tick_nudges_ratio_toward_setpoint() {
        let mut syncer = Syncer::init(48_000, 48_000, 256, 2);
        STATS.ch1_audio.filtered_fill.store(600.0, Ordering::Relaxed);

        let before = syncer.current_ratio();
        syncer.control_tick(512.0);
        let after = syncer.current_ratio();

        assert!((after - before).abs() > 0.0);
        assert!((after - before).abs() < MAX_U * 2.0);
    }

    #[test]
    fn enqueue_reports_overrun_when_ring_is_full() {
        let mut syncer = Syncer::init(48_000, 48_000, 4, 1);
        let (mut prod, _cons) = sample_ring(4);
        prod.enqueue_slice(&[0.0, 0.0, 0.0, 0.0]);

        let samples = vec![0.1f32, 0.2, 0.3, 0.4];
        let result = syncer.enqueue_buf(&samples, &mut prod);
        assert_eq!(result, OVERRUN);
    }
}
