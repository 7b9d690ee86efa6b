// SPDX-License-Identifier: GPL-3.0-only

//! Multi-stream synchronizer
//!
//! All contexts stamp buffers from the same process-wide clock, so buffers
//! from different domains can be paired by timestamp. The [`Synchronizer`]
//! keeps at most the newest unmatched item of each stream and reports a
//! matched set as soon as every stream has an item and all of them lie
//! within one tolerance window. It never queues.

use crate::errors::{CaptureError, CaptureResult};
use crate::media::buffer::{Buffer, OwnedBuffer};
use crate::media::formats::Framerate;
use tracing::trace;

/// Anything carrying a capture timestamp
pub trait Timestamped {
    fn timestamp_us(&self) -> u64;
}

impl Timestamped for Buffer {
    fn timestamp_us(&self) -> u64 {
        Buffer::timestamp_us(self)
    }
}

impl Timestamped for OwnedBuffer {
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
}

impl Timestamped for u64 {
    fn timestamp_us(&self) -> u64 {
        *self
    }
}

/// Whether two timestamps are at most `tolerance_us` apart
pub fn is_matched(a_us: u64, b_us: u64, tolerance_us: u64) -> bool {
    a_us.abs_diff(b_us) <= tolerance_us
}

/// Half the frame period of `framerate`, rounded to the nearest microsecond
///
/// The usual tolerance for pairing audio with video frames.
pub fn half_frame_period_us(framerate: Framerate) -> u64 {
    if !framerate.is_valid() {
        return 0;
    }
    let num = 2 * framerate.num as u64;
    (1_000_000 * framerate.denom as u64 + num / 2) / num
}

/// Outcome of pushing one item
#[derive(Debug)]
pub struct SyncOutcome<T> {
    /// One item per stream, in stream order, when the push completed a set
    pub matched: Option<Vec<T>>,
    /// Older pending item of the same stream replaced by this push
    pub evicted: Option<T>,
}

/// Counters of a synchronizer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub matched_sets: u64,
    pub evicted: u64,
}

/// Pairs items across streams by timestamp
#[derive(Debug)]
pub struct Synchronizer<T> {
    pending: Vec<Option<T>>,
    tolerance_us: u64,
    stats: SyncStats,
}

impl<T: Timestamped> Synchronizer<T> {
    /// Create a synchronizer over `streams` streams
    pub fn new(streams: usize, tolerance_us: u64) -> CaptureResult<Self> {
        if streams == 0 {
            return Err(CaptureError::InvalidArg(
                "synchronizer needs at least one stream".to_string(),
            ));
        }
        Ok(Self {
            pending: (0..streams).map(|_| None).collect(),
            tolerance_us,
            stats: SyncStats::default(),
        })
    }

    pub fn streams(&self) -> usize {
        self.pending.len()
    }

    pub fn tolerance_us(&self) -> u64 {
        self.tolerance_us
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Pending item of `stream`, if any
    pub fn pending(&self, stream: usize) -> Option<&T> {
        self.pending.get(stream)?.as_ref()
    }

    /// Offer the newest item of `stream`
    ///
    /// If every other stream has a pending item and the earliest and latest
    /// of those items and `item` are at most the tolerance apart, they are
    /// returned as a matched set and nothing stays pending. Otherwise `item` becomes the stream's pending item, replacing
    /// (and returning) the previous one.
    pub fn push(&mut self, stream: usize, item: T) -> CaptureResult<SyncOutcome<T>> {
        if stream >= self.pending.len() {
            return Err(CaptureError::InvalidArg(format!(
                "stream {} out of range (synchronizer has {})",
                stream,
                self.pending.len()
            )));
        }

        let stamp = item.timestamp_us();
        let complete = self.window_with(stream, stamp).is_some_and(|(earliest, latest)| {
            is_matched(earliest, latest, self.tolerance_us)
        });

        if complete {
            let mut evicted = None;
            let mut item = Some(item);
            let set: Vec<T> = self
                .pending
                .iter_mut()
                .enumerate()
                .filter_map(|(index, pending)| {
                    if index == stream {
                        evicted = pending.take();
                        item.take()
                    } else {
                        pending.take()
                    }
                })
                .collect();
            self.stats.matched_sets += 1;
            if evicted.is_some() {
                self.stats.evicted += 1;
            }
            trace!(stream, timestamp_us = stamp, "Matched set");
            return Ok(SyncOutcome {
                matched: Some(set),
                evicted,
            });
        }

        let evicted = self.pending[stream].replace(item);
        if evicted.is_some() {
            self.stats.evicted += 1;
        }
        Ok(SyncOutcome {
            matched: None,
            evicted,
        })
    }

    /// Earliest and latest timestamp over the other streams' pending items
    /// and `stamp`, or `None` while another stream has nothing pending
    fn window_with(&self, stream: usize, stamp: u64) -> Option<(u64, u64)> {
        self.pending
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != stream)
            .try_fold((stamp, stamp), |(earliest, latest), (_, pending)| {
                let other = pending.as_ref()?.timestamp_us();
                Some((earliest.min(other), latest.max(other)))
            })
    }

    /// Drop all pending items, returning them in stream order
    pub fn clear(&mut self) -> Vec<T> {
        self.pending.iter_mut().filter_map(Option::take).collect()
    }
}
