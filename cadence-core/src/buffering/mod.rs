//! Playback chunk queue and the capture-side SPSC ring.
//!
//! `ChunkQueue` is owned by the render engine and touched only from the audio
//! callback. The capture ring uses `ringbuf::HeapRb<f32>` whose `push_slice`
//! and `pop_slice` are wait-free, so the input-device callback can hand
//! microphone samples to the output callback without locking.

pub mod chunk;

use std::collections::VecDeque;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

use chunk::AudioChunk;

/// Producer half of the capture ring, held by the input-device callback.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the capture ring, held by the output-device callback.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^15 = 32 768 samples ≈ 0.68 s at 48 kHz.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 15;

/// Initial chunk slots reserved in the queue so steady-state enqueues
/// do not reallocate the deque.
const QUEUE_RESERVE: usize = 256;

/// Create a matched producer/consumer pair for capture samples.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Sample counts reported by [`ChunkQueue::occupancy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    /// Every sample still queued, net of the head cursor.
    pub total: usize,
    /// Samples that count toward the fill target.
    pub consumable: usize,
}

/// Ordered queue of arrived chunks with a cursor into the partially played head.
///
/// Invariant: `offset < head.len()` whenever the queue is non-empty. Zero-length
/// chunks are never stored, which keeps the invariant trivially satisfiable.
#[derive(Debug)]
pub struct ChunkQueue {
    chunks: VecDeque<AudioChunk>,
    offset: usize,
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::with_capacity(QUEUE_RESERVE),
            offset: 0,
        }
    }

    /// Append a chunk to the tail. Empty chunks contribute nothing and are dropped.
    pub fn enqueue(&mut self, chunk: AudioChunk) {
        if chunk.is_empty() {
            return;
        }
        self.chunks.push_back(chunk);
    }

    /// Number of chunks currently queued.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Samples of the head chunk already played.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Walk the queue and count total and consumable samples.
    ///
    /// Silent chunks are left out of `consumable` only while
    /// `skip_silence_when_idle && !in_playback`, so leading silence never
    /// satisfies the start threshold but mid-stream silence is played.
    pub fn occupancy(&self, skip_silence_when_idle: bool, in_playback: bool) -> Occupancy {
        let skip = skip_silence_when_idle && !in_playback;
        let mut occupancy = Occupancy::default();

        for (idx, chunk) in self.chunks.iter().enumerate() {
            let remaining = if idx == 0 {
                chunk.len() - self.offset
            } else {
                chunk.len()
            };
            occupancy.total += remaining;
            if skip && chunk.is_silence() {
                continue;
            }
            occupancy.consumable += remaining;
        }

        occupancy
    }

    /// Copy up to `dest.len()` samples starting at the cursor, retiring chunks
    /// as they are exhausted. Returns the number of samples written.
    ///
    /// With `skip_silence` set, silent chunks met along the way are discarded
    /// without contributing samples.
    pub fn drain_into(&mut self, dest: &mut [f32], skip_silence: bool) -> usize {
        let mut read = 0;

        while read < dest.len() {
            let Some(head) = self.chunks.front() else {
                break;
            };

            if skip_silence && head.is_silence() {
                self.chunks.pop_front();
                self.offset = 0;
                continue;
            }

            let available = &head.samples()[self.offset..];
            let take = available.len().min(dest.len() - read);
            dest[read..read + take].copy_from_slice(&available[..take]);
            read += take;

            if take == available.len() {
                self.chunks.pop_front();
                self.offset = 0;
            } else {
                self.offset += take;
            }
        }

        read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> AudioChunk {
        AudioChunk::new(vec![0.25; len])
    }

    fn silent(len: usize) -> AudioChunk {
        AudioChunk::new(vec![0.0; len])
    }

    #[test]
    fn idle_occupancy_excludes_silent_chunks() {
        let mut q = ChunkQueue::new();
        q.enqueue(tone(100));
        q.enqueue(silent(40));
        q.enqueue(tone(50));

        let occ = q.occupancy(true, false);
        assert_eq!(occ.total, 190);
        assert_eq!(occ.consumable, 150);
    }

    #[test]
    fn zero_length_silent_chunk_contributes_nothing() {
        let mut q = ChunkQueue::new();
        q.enqueue(tone(100));
        q.enqueue(silent(0));
        q.enqueue(tone(50));

        let occ = q.occupancy(true, false);
        assert_eq!(occ.total, 150);
        assert_eq!(occ.consumable, 150);
    }

    #[test]
    fn silence_counts_once_playing_or_when_skip_disabled() {
        let mut q = ChunkQueue::new();
        q.enqueue(tone(100));
        q.enqueue(silent(40));

        assert_eq!(q.occupancy(true, true).consumable, 140);
        assert_eq!(q.occupancy(false, false).consumable, 140);
    }

    #[test]
    fn occupancy_is_net_of_cursor() {
        let mut q = ChunkQueue::new();
        q.enqueue(tone(100));
        q.enqueue(tone(100));
        let mut dest = [0.0f32; 30];
        assert_eq!(q.drain_into(&mut dest, false), 30);

        assert_eq!(q.offset(), 30);
        let occ = q.occupancy(false, true);
        assert_eq!(occ.total, 170);
        assert_eq!(occ.consumable, 170);
        // Repeated calls before another drain agree.
        assert_eq!(q.occupancy(false, true), occ);
    }

    #[test]
    fn drain_spans_chunks_and_retires_them() {
        let mut q = ChunkQueue::new();
        q.enqueue(AudioChunk::new(vec![0.1, 0.2, 0.3]));
        q.enqueue(AudioChunk::new(vec![0.4, 0.5]));

        let mut dest = [0.0f32; 4];
        let read = q.drain_into(&mut dest, false);
        assert_eq!(read, 4);
        assert_eq!(dest, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.offset(), 1);
    }

    #[test]
    fn drain_stops_short_when_exhausted() {
        let mut q = ChunkQueue::new();
        q.enqueue(tone(10));
        let mut dest = [9.0f32; 16];
        assert_eq!(q.drain_into(&mut dest, false), 10);
        assert!(q.is_empty());
        assert_eq!(q.offset(), 0);
        assert_eq!(dest[10], 9.0, "drain must not touch the unfilled tail");
    }

    #[test]
    fn drain_skips_silence_only_when_asked() {
        let mut q = ChunkQueue::new();
        q.enqueue(silent(20));
        q.enqueue(AudioChunk::new(vec![0.5; 5]));

        let mut dest = [0.0f32; 5];
        assert_eq!(q.drain_into(&mut dest, true), 5);
        assert_eq!(dest, [0.5; 5]);
        assert!(q.is_empty());

        q.enqueue(silent(3));
        let mut dest = [1.0f32; 3];
        assert_eq!(q.drain_into(&mut dest, false), 3);
        assert_eq!(dest, [0.0; 3]);
    }

    #[test]
    fn capture_ring_round_trips_samples() {
        let (mut prod, mut cons) = create_capture_ring();
        assert_eq!(prod.push_slice(&[0.1, 0.2, 0.3]), 3);
        let mut out = [0.0f32; 8];
        assert_eq!(cons.pop_slice(&mut out), 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);
    }
}
