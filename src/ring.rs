//! Lock-free SPSC sample ring bridging the decode thread and the audio
//! callback (component A).
//!
//! Built atop `ringbuf`'s heap-allocated SPSC ring rather than hand-rolled
//! atomics — the crate already solved the acquire/release fencing. This
//! wrapper adds the `R` vs. `R' = next_pow2(R)` distinction the distilled
//! spec calls out: callers only ever see the logical capacity `R`; the
//! pow-2 rounding needed by the underlying ring is hidden here.
//!
//! Neither `enqueue` nor `dequeue` performs an internal bounds check —
//! callers must check [`SampleRing::size`] first, exactly as the contract
//! in 4.A demands. Misuse corrupts the stream silently; there is no
//! recoverable failure mode.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

fn next_pow2(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n.next_power_of_two()
}

/// The producer half, owned exclusively by the decode thread.
pub struct RingProducer {
    inner: HeapProd<f32>,
    logical_capacity: usize,
}

impl RingProducer {
    /// Number of occupied slots, capped conceptually at `logical_capacity`
    /// by caller discipline (the backing ring may have more physical room).
    pub fn size(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.logical_capacity
    }

    /// Enqueue one sample. Caller must have checked `size() < capacity()`.
    pub fn enqueue(&mut self, sample: f32) {
        let _ = self.inner.try_push(sample);
    }

    /// Enqueue a slice of samples in one shot, for the syncer's bulk push.
    /// Caller must have checked `size() + samples.len() <= capacity()`.
    pub fn enqueue_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

/// The consumer half, owned exclusively by the audio output callback.
pub struct RingConsumer {
    inner: HeapCons<f32>,
    logical_capacity: usize,
}

impl RingConsumer {
    pub fn size(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.logical_capacity
    }

    /// Dequeue one sample. Caller must have checked `size() > 0`.
    pub fn dequeue(&mut self) -> f32 {
        self.inner.try_pop().unwrap_or(0.0)
    }

    /// Dequeue up to `out.len()` samples, returning how many were written.
    pub fn dequeue_slice(&mut self, out: &mut [f32]) -> usize {
        self.inner.pop_slice(out)
    }
}

/// Split a ring of logical capacity `spec_capacity` (in samples) into its
/// producer/consumer halves. `spec_capacity` must be a multiple of the
/// channel count, per the `SampleRingSpec` invariant; that invariant is
/// the caller's responsibility (it's a property of the configuration, not
/// of this allocator).
pub fn sample_ring(spec_capacity: usize) -> (RingProducer, RingConsumer) {
    let physical_capacity = next_pow2(spec_capacity);
    let rb = HeapRb::<f32>::new(physical_capacity);
    let (prod, cons) = rb.split();
    (
        RingProducer {
            inner: prod,
            logical_capacity: spec_capacity,
        },
        RingConsumer {
            inner: cons,
            logical_capacity: spec_capacity,
        },
    )
}

/// Pre-fill a freshly split ring with `R/2` samples of silence, per the
/// syncer's startup behaviour (4.G): the ring must be non-empty before the
/// audio device starts so the first callbacks don't underrun.
pub fn prefill_silence(producer: &mut RingProducer) {
    let half = producer.capacity() / 2;
    for _ in 0..half {
        producer.enqueue(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_pow2_rounds_up() {
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(2), 2);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(1000), 1024);
    }

    #[test]
    fn fifo_order_preserved() {
        let (mut prod, mut cons) = sample_ring(16);
        for i in 0..10 {
            prod.enqueue(i as f32);
        }
        assert_eq!(cons.size(), 10);
        for i in 0..10 {
            assert_eq!(cons.dequeue(), i as f32);
        }
        assert_eq!(cons.size(), 0);
    }

    #[test]
    fn logical_capacity_differs_from_physical() {
        let (prod, _cons) = sample_ring(1000);
        // Logical capacity is exactly what was asked for...
        assert_eq!(prod.capacity(), 1000);
    }

    #[test]
    fn prefill_leaves_half_capacity_of_silence() {
        let (mut prod, mut cons) = sample_ring(200);
        prefill_silence(&mut prod);
        assert_eq!(cons.size(), 100);
        for _ in 0..100 {
            assert_eq!(cons.dequeue(), 0.0);
        }
    }

    #[test]
    fn bulk_enqueue_dequeue_round_trips() {
        let (mut prod, mut cons) = sample_ring(64);
        let input: Vec<f32> = (0..32).map(|i| i as f32 * 0.5).collect();
        let written = prod.enqueue_slice(&input);
        assert_eq!(written, 32);
        let mut out = vec![0.0f32; 32];
        let read = cons.dequeue_slice(&mut out);
        assert_eq!(read, 32);
        assert_eq!(out, input);
    }
}
