//! Lock-free block ring for the real-time boundary
//!
//! A ring is a fixed pool of preallocated blocks cycling between two
//! `ArrayQueue`s: `free` (ready to be written) and `filled` (published,
//! waiting to be read). Exactly one [`BlockWriter`] and one [`BlockReader`]
//! exist per ring. Neither side allocates, locks or blocks:
//!
//! - the writer publishes a block when it is full; if `filled` is at capacity
//!   the oldest unread block is evicted and counted as dropped
//! - the reader pads with silence when nothing is published and counts an
//!   underrun
//!
//! Either side may live on the device callback thread.

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{AudioError, AudioResult};

/// Counters shared by every ring an engine creates over its lifetime
#[derive(Debug, Default)]
pub struct RingStats {
    blocks_written: AtomicU64,
    blocks_read: AtomicU64,
    dropped_blocks: AtomicU64,
    underruns: AtomicU64,
}

impl RingStats {
    /// Create a fresh, shareable counter set
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> RingStatsSnapshot {
        RingStatsSnapshot {
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            dropped_blocks: self.dropped_blocks.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingStatsSnapshot {
    pub blocks_written: u64,
    pub blocks_read: u64,
    pub dropped_blocks: u64,
    pub underruns: u64,
}

#[derive(Debug)]
struct Shared {
    filled: ArrayQueue<Box<[f32]>>,
    free: ArrayQueue<Box<[f32]>>,
    block_len: usize,
    stats: Arc<RingStats>,
}

impl Shared {
    fn recycle(&self, block: Box<[f32]>) {
        // `free` is sized for every block in the pool, so this cannot fail
        let _ = self.free.push(block);
    }
}

/// Create a ring holding up to `capacity_blocks` published blocks of
/// `block_len` interleaved samples each.
///
/// All memory is allocated here, on the caller's (non real-time) thread.
pub fn block_ring(
    capacity_blocks: usize,
    block_len: usize,
    stats: Arc<RingStats>,
) -> AudioResult<(BlockWriter, BlockReader)> {
    if capacity_blocks == 0 {
        return Err(AudioError::configuration("ring capacity must be at least one block"));
    }
    if block_len == 0 {
        return Err(AudioError::configuration("ring block length must be non-zero"));
    }

    // One extra block is held by each side while it is being written/read
    let pool = capacity_blocks + 2;
    let free = ArrayQueue::new(pool);
    for _ in 0..pool {
        let _ = free.push(vec![0.0f32; block_len].into_boxed_slice());
    }

    let shared = Arc::new(Shared {
        filled: ArrayQueue::new(capacity_blocks),
        free,
        block_len,
        stats,
    });

    Ok((
        BlockWriter {
            shared: shared.clone(),
            current: None,
            pos: 0,
        },
        BlockReader {
            shared,
            current: None,
            pos: 0,
        },
    ))
}

/// Producer half of a block ring
#[derive(Debug)]
pub struct BlockWriter {
    shared: Arc<Shared>,
    current: Option<Box<[f32]>>,
    pos: usize,
}

impl BlockWriter {
    /// Samples per block
    pub fn block_len(&self) -> usize {
        self.shared.block_len
    }

    /// Append interleaved samples, publishing every completed block
    pub fn write(&mut self, samples: &[f32]) {
        let mut rest = samples;
        while !rest.is_empty() {
            if !self.acquire() {
                return;
            }
            let Some(block) = self.current.as_mut() else {
                return;
            };
            let n = (block.len() - self.pos).min(rest.len());
            block[self.pos..self.pos + n].copy_from_slice(&rest[..n]);
            self.pos += n;
            rest = &rest[n..];
            if self.pos == self.shared.block_len {
                self.publish();
            }
        }
    }

    /// Append samples produced by a conversion iterator (e.g. i16 device data)
    pub fn write_iter<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = f32>,
    {
        for sample in samples {
            if !self.acquire() {
                return;
            }
            if let Some(block) = self.current.as_mut() {
                block[self.pos] = sample;
                self.pos += 1;
            }
            if self.pos == self.shared.block_len {
                self.publish();
            }
        }
    }

    fn acquire(&mut self) -> bool {
        if self.current.is_some() {
            return true;
        }
        match self.shared.free.pop() {
            Some(block) => {
                self.current = Some(block);
                self.pos = 0;
                true
            }
            None => {
                // Pool exhausted; can only happen transiently while the reader
                // swaps blocks. Treat like an eviction.
                self.shared.stats.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn publish(&mut self) {
        if let Some(block) = self.current.take() {
            self.pos = 0;
            self.shared.stats.blocks_written.fetch_add(1, Ordering::Relaxed);
            if let Some(evicted) = self.shared.filled.force_push(block) {
                self.shared.stats.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                self.shared.recycle(evicted);
            }
        }
    }
}

/// Consumer half of a block ring
#[derive(Debug)]
pub struct BlockReader {
    shared: Arc<Shared>,
    current: Option<Box<[f32]>>,
    pos: usize,
}

impl BlockReader {
    /// Samples per block
    pub fn block_len(&self) -> usize {
        self.shared.block_len
    }

    /// Published blocks waiting to be read
    pub fn available_blocks(&self) -> usize {
        self.shared.filled.len()
    }

    /// Fill `out` completely, padding with silence on underrun.
    ///
    /// Returns how many samples came from the ring.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        self.fill_with(out, |sample| sample)
    }

    /// Like [`fill`](Self::fill), converting each sample on the way out
    pub fn fill_with<T, F>(&mut self, out: &mut [T], convert: F) -> usize
    where
        F: Fn(f32) -> T,
    {
        let mut written = 0;
        while written < out.len() {
            if !self.advance() {
                for slot in &mut out[written..] {
                    *slot = convert(0.0);
                }
                self.shared.stats.underruns.fetch_add(1, Ordering::Relaxed);
                return written;
            }
            let Some(block) = self.current.as_ref() else {
                break;
            };
            let n = (block.len() - self.pos).min(out.len() - written);
            for (slot, sample) in out[written..written + n]
                .iter_mut()
                .zip(&block[self.pos..self.pos + n])
            {
                *slot = convert(*sample);
            }
            self.pos += n;
            written += n;
            if self.pos == self.shared.block_len {
                self.shared.stats.blocks_read.fetch_add(1, Ordering::Relaxed);
            }
        }
        written
    }

    /// Copy the remainder of the next block into `out` (cleared first).
    ///
    /// Returns `false` when nothing is published. Intended for the
    /// non-real-time side, where `out` may grow.
    pub fn read_block(&mut self, out: &mut Vec<f32>) -> bool {
        out.clear();
        if !self.advance() {
            return false;
        }
        if let Some(block) = self.current.as_ref() {
            out.extend_from_slice(&block[self.pos..]);
            self.pos = block.len();
            self.shared.stats.blocks_read.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Make sure `current` has unread samples, recycling the spent block first
    fn advance(&mut self) -> bool {
        if let Some(block) = self.current.as_ref() {
            if self.pos < block.len() {
                return true;
            }
        }
        if let Some(spent) = self.current.take() {
            self.shared.recycle(spent);
        }
        match self.shared.filled.pop() {
            Some(block) => {
                self.current = Some(block);
                self.pos = 0;
                true
            }
            None => false,
        }
    }
}
