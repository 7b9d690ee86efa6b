// SPDX-License-Identifier: GPL-3.0-only

//! Bounded channel adapter for async consumers
//!
//! [`copy_channel`] builds a capture callback that copies each buffer out,
//! releases it right away and forwards the copy into a bounded tokio channel.
//! The producer never waits on the receiver: a full channel drops the copy.
//! GPU buffers cannot be copied and are released without forwarding.

use crate::media::buffer::{Buffer, OwnedBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    dropped_full: AtomicU64,
    not_copyable: AtomicU64,
}

/// Counters of a copy channel, shared with its callback
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    inner: Arc<Counters>,
}

impl ChannelStats {
    /// Copies sent into the channel
    pub fn forwarded(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }

    /// Copies discarded because the channel was full
    pub fn dropped_full(&self) -> u64 {
        self.inner.dropped_full.load(Ordering::Relaxed)
    }

    /// GPU buffers that could not be copied
    pub fn not_copyable(&self) -> u64 {
        self.inner.not_copyable.load(Ordering::Relaxed)
    }
}

/// Build a callback forwarding buffer copies into a channel of `capacity`
pub fn copy_channel(
    capacity: usize,
) -> (
    impl Fn(Buffer) + Send + Sync + 'static,
    mpsc::Receiver<OwnedBuffer>,
    ChannelStats,
) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let stats = ChannelStats::default();
    let counters = Arc::clone(&stats.inner);

    let callback = move |buffer: Buffer| {
        let copy = buffer.copy_out();
        buffer.release();

        let owned = match copy {
            Ok(owned) => owned,
            Err(e) => {
                if counters.not_copyable.fetch_add(1, Ordering::Relaxed) == 0 {
                    warn!(error = %e, "Buffer cannot be forwarded to channel");
                }
                return;
            }
        };

        match sender.try_send(owned) {
            Ok(()) => {
                counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                counters.dropped_full.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Channel receiver dropped, discarding buffer");
            }
        }
    };

    (callback, receiver, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::synthetic::{SyntheticBackend, SyntheticConfig};
    use crate::backends::CaptureDomain;
    use crate::capture::{CaptureContext, ContextSettings};
    use crate::media::formats::{AudioFormat, Format, SampleFormat};
    use std::time::Duration;

    #[test]
    fn test_copies_reach_receiver() {
        let mut context = CaptureContext::new(
            Box::new(SyntheticBackend::new(
                CaptureDomain::AudioInput,
                SyntheticConfig {
                    stable_buffers: false,
                    ..Default::default()
                },
            )),
            ContextSettings::default(),
        );
        context
            .configure(
                "synthetic-mic-1",
                &Format::Audio(AudioFormat::new(SampleFormat::I16, 44_100, 1)),
            )
            .unwrap();

        let (callback, mut receiver, stats) = copy_channel(64);
        context.start_capture(callback).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        context.stop_capture().unwrap();

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.byte_size(), 441 * 2);
        assert!(stats.forwarded() > 0);
        // Every buffer was released before being forwarded
        assert_eq!(context.stats().released, context.stats().delivered);
    }

    #[test]
    fn test_full_channel_drops() {
        let (callback, _receiver, stats) = copy_channel(1);
        let mut context = CaptureContext::new(
            Box::new(SyntheticBackend::new(
                CaptureDomain::LoopbackAudio,
                SyntheticConfig::default(),
            )),
            ContextSettings::default(),
        );
        context
            .configure(
                "synthetic-monitor-0",
                &Format::Audio(AudioFormat::new(SampleFormat::F32, 48_000, 2)),
            )
            .unwrap();
        context.start_capture(callback).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        context.stop_capture().unwrap();

        assert_eq!(stats.forwarded(), 1);
        assert!(stats.dropped_full() > 0);
    }
}
