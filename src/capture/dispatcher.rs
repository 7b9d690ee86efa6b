// SPDX-License-Identifier: GPL-3.0-only

//! Capture dispatcher
//!
//! Sits between a backend's [`RawFrameSink`] and the consumer callback of one
//! capture session. Each raw frame is stamped, wrapped into a [`Buffer`] and
//! handed to the callback synchronously on the backend's thread. There is no
//! queue: a frame is either delivered on arrival or dropped.
//!
//! Stable pool leases and GPU handles are passed through without copying.
//! Transient backend memory is copied into the dispatcher's own bounded pool
//! first; when that pool is exhausted because the consumer still holds its
//! buffers, the frame is dropped.
//!
//! Stopping closes a gate and then waits until every callback that got past
//! the gate has returned. After [`Dispatcher::close_and_wait`] the consumer
//! callback is never invoked again for this session.

use crate::backends::{CaptureDomain, DeliveryStatus, RawFrame, RawFrameSink, RawPayload, RawStorage};
use crate::constants::timing;
use crate::media::buffer::{
    AudioPayload, Buffer, Payload, PlaneInfo, ReleaseCounters, Storage, VideoPayload,
    contiguous_planes,
};
use crate::media::clock;
use crate::media::formats::PixelFormat;
use crate::media::pool::BufferPool;
use crate::util::lock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Consumer callback invoked once per delivered buffer
pub type BufferCallback = Arc<dyn Fn(Buffer) + Send + Sync>;

/// Delivery counters of one capture session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Buffers handed to the consumer callback
    pub delivered: u64,
    /// Frames dropped because no copy slot was free
    pub dropped: u64,
    /// Frames copied out of transient backend memory
    pub copied: u64,
    /// Frames handed over without copying (pool leases and GPU handles)
    pub zero_copy: u64,
    /// Malformed frames refused at wrap time
    pub rejected: u64,
    /// Buffers the consumer released explicitly
    pub released: u64,
    /// Buffers dropped by the consumer without an explicit release
    pub dropped_unreleased: u64,
}

struct Gate {
    open: bool,
    in_flight: usize,
}

struct Shared {
    domain: CaptureDomain,
    callback: BufferCallback,
    gate: Mutex<Gate>,
    idle: Condvar,
    copy_pool: BufferPool,
    sequence: AtomicU64,
    last_timestamp: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    copied: AtomicU64,
    zero_copy: AtomicU64,
    rejected: AtomicU64,
    release: Arc<ReleaseCounters>,
    last_drop_warning: Mutex<Option<Instant>>,
}

/// Marks one callback in flight; wakes a waiting stop when it ends
struct InFlight<'a>(&'a Shared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut gate = lock(&self.0.gate);
        gate.in_flight -= 1;
        if gate.in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl Shared {
    fn deliver(&self, frame: RawFrame<'_>) -> DeliveryStatus {
        {
            let mut gate = lock(&self.gate);
            if !gate.open {
                return DeliveryStatus::Closed;
            }
            gate.in_flight += 1;
        }
        let _in_flight = InFlight(self);

        let buffer = match self.wrap(frame) {
            Ok(buffer) => buffer,
            Err(status) => return status,
        };

        let sequence = buffer.sequence();
        if catch_unwind(AssertUnwindSafe(|| (self.callback)(buffer))).is_err() {
            error!(domain = %self.domain, sequence, "Buffer callback panicked");
        }

        let delivered = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        if delivered % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                domain = %self.domain,
                delivered,
                dropped = self.dropped.load(Ordering::Relaxed),
                "Capture session progress"
            );
        }
        DeliveryStatus::Delivered
    }

    /// Turn a raw frame into a consumer buffer
    fn wrap(&self, frame: RawFrame<'_>) -> Result<Buffer, DeliveryStatus> {
        let stamped = frame.timestamp_us.unwrap_or_else(clock::now_us);
        // Never let a session's timestamps run backwards
        let timestamp_us = self.last_timestamp.fetch_max(stamped, Ordering::SeqCst).max(stamped);

        let (storage, zero_copy) = match frame.storage {
            RawStorage::Pooled(lease) => (Storage::Cpu(lease), true),
            RawStorage::Gpu { handles, slot } => (Storage::Gpu { handles, slot }, true),
            RawStorage::Transient(bytes) => {
                let Some(mut lease) = self.copy_pool.acquire(0) else {
                    self.record_drop();
                    return Err(DeliveryStatus::Dropped);
                };
                lease.copy_from(bytes);
                (Storage::Cpu(lease), false)
            }
        };

        let payload = match frame.payload {
            RawPayload::Video {
                width,
                height,
                pixel_format,
                planes,
            } => {
                let planes = match &storage {
                    Storage::Cpu(lease) => {
                        contiguous_planes(pixel_format, width, height, planes.as_deref(), lease.len())
                    }
                    Storage::Gpu { .. } => {
                        match gpu_planes(pixel_format, width, height, planes.as_deref()) {
                            Some(planes) => planes,
                            None => {
                                return Err(self.reject(format!(
                                    "{} frames cannot be delivered as GPU handles",
                                    pixel_format
                                )));
                            }
                        }
                    }
                };
                Payload::Video(VideoPayload {
                    width,
                    height,
                    pixel_format,
                    planes,
                })
            }
            RawPayload::Audio {
                frame_count,
                format,
            } => Payload::Audio(AudioPayload {
                frame_count,
                format,
            }),
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let buffer = Buffer::new(
            self.domain,
            sequence,
            timestamp_us,
            payload,
            storage,
            Some(Arc::clone(&self.release)),
        )
        .map_err(|reason| self.reject(reason))?;

        if zero_copy {
            self.zero_copy.fetch_add(1, Ordering::Relaxed);
        } else {
            self.copied.fetch_add(1, Ordering::Relaxed);
        }
        Ok(buffer)
    }

    fn reject(&self, reason: String) -> DeliveryStatus {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(domain = %self.domain, reason = %reason, "Malformed frame rejected");
        DeliveryStatus::Rejected
    }

    fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        let mut last = lock(&self.last_drop_warning);
        let due = last.is_none_or(|at| at.elapsed() >= timing::DROP_WARN_INTERVAL);
        if due {
            *last = Some(Instant::now());
            warn!(
                domain = %self.domain,
                dropped,
                "No free buffer slot, dropping frames (consumer is not releasing buffers)"
            );
        }
    }

    fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            copied: self.copied.load(Ordering::Relaxed),
            zero_copy: self.zero_copy.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            released: self.release.released(),
            dropped_unreleased: self.release.dropped_unreleased(),
        }
    }
}

/// Plane descriptors of a GPU frame (no CPU offsets)
fn gpu_planes(
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    layouts: Option<&[crate::media::formats::PlaneLayout]>,
) -> Option<Vec<PlaneInfo>> {
    let layouts = match layouts {
        Some(layouts) => layouts.to_vec(),
        None => pixel_format.plane_layouts(width, height)?,
    };
    Some(
        layouts
            .into_iter()
            .map(|layout| PlaneInfo {
                stride: layout.stride,
                rows: layout.rows,
                offset: 0,
            })
            .collect(),
    )
}

/// Per-session bridge from backend frames to the consumer callback
pub struct Dispatcher {
    shared: Arc<Shared>,
    stop_warn: Duration,
}

impl Dispatcher {
    /// Create a closed dispatcher for one session
    pub fn new(
        domain: CaptureDomain,
        callback: BufferCallback,
        copy_pool_size: usize,
        stop_warn: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                domain,
                callback,
                gate: Mutex::new(Gate {
                    open: false,
                    in_flight: 0,
                }),
                idle: Condvar::new(),
                copy_pool: BufferPool::new(format!("{}-copy", domain), copy_pool_size),
                sequence: AtomicU64::new(0),
                last_timestamp: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                copied: AtomicU64::new(0),
                zero_copy: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                release: Arc::new(ReleaseCounters::default()),
                last_drop_warning: Mutex::new(None),
            }),
            stop_warn,
        }
    }

    /// Sink to hand to the backend
    pub fn sink(&self) -> RawFrameSink {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |frame: RawFrame<'_>| shared.deliver(frame))
    }

    /// Start accepting frames
    pub fn open(&self) {
        lock(&self.shared.gate).open = true;
        debug!(domain = %self.shared.domain, "Dispatcher gate opened");
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared.gate).open
    }

    /// Refuse new frames and block until in-flight callbacks have returned
    ///
    /// Must not be called from inside the consumer callback: the call would
    /// wait for itself.
    pub fn close_and_wait(&self) {
        let started = Instant::now();
        let mut warned = false;
        let mut gate = lock(&self.shared.gate);
        gate.open = false;

        while gate.in_flight > 0 {
            let (next, _) = self
                .shared
                .idle
                .wait_timeout(gate, timing::QUIESCENCE_POLL)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            gate = next;

            if !warned && gate.in_flight > 0 && started.elapsed() >= self.stop_warn {
                warned = true;
                warn!(
                    domain = %self.shared.domain,
                    in_flight = gate.in_flight,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Stop is waiting for a buffer callback to return"
                );
            }
        }
        drop(gate);

        let stats = self.shared.stats();
        info!(
            domain = %self.shared.domain,
            delivered = stats.delivered,
            dropped = stats.dropped,
            copied = stats.copied,
            "Dispatcher quiesced"
        );
    }

    pub fn stats(&self) -> DispatchStats {
        self.shared.stats()
    }

    /// Copy pool of this session
    pub fn copy_pool(&self) -> &BufferPool {
        &self.shared.copy_pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::buffer::ContentLocation;
    use crate::media::formats::{AudioFormat, SampleFormat};
    use std::sync::atomic::AtomicBool;

    fn dispatcher(callback: BufferCallback, copy_slots: usize) -> Dispatcher {
        let dispatcher = Dispatcher::new(
            CaptureDomain::Camera,
            callback,
            copy_slots,
            Duration::from_secs(1),
        );
        dispatcher.open();
        dispatcher
    }

    fn rgba_frame(bytes: &[u8], timestamp_us: Option<u64>) -> RawFrame<'_> {
        RawFrame {
            timestamp_us,
            payload: RawPayload::Video {
                width: 2,
                height: 2,
                pixel_format: PixelFormat::Rgba,
                planes: None,
            },
            storage: RawStorage::Transient(bytes),
        }
    }

    #[test]
    fn test_closed_gate_refuses_frames() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = Arc::clone(&called);
        let dispatcher = Dispatcher::new(
            CaptureDomain::Camera,
            Arc::new(move |_| called_clone.store(true, Ordering::SeqCst)),
            2,
            Duration::from_secs(1),
        );
        let sink = dispatcher.sink();
        assert_eq!(sink(rgba_frame(&[0; 16], None)), DeliveryStatus::Closed);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_transient_frames_are_copied() {
        let kept = Arc::new(Mutex::new(Vec::new()));
        let kept_clone = Arc::clone(&kept);
        let dispatcher = dispatcher(
            Arc::new(move |buffer: Buffer| kept_clone.lock().unwrap().push(buffer)),
            2,
        );
        let sink = dispatcher.sink();

        let bytes = [7u8; 16];
        assert_eq!(sink(rgba_frame(&bytes, Some(10))), DeliveryStatus::Delivered);
        assert_eq!(sink(rgba_frame(&bytes, Some(20))), DeliveryStatus::Delivered);
        // Consumer holds both copies: the third frame has nowhere to go
        assert_eq!(sink(rgba_frame(&bytes, Some(30))), DeliveryStatus::Dropped);

        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.copied, 2);
        assert_eq!(stats.dropped, 1);

        let buffer = kept.lock().unwrap().remove(0);
        assert_eq!(buffer.location(), ContentLocation::Cpu);
        assert_eq!(buffer.plane_data(0).unwrap(), &bytes);
        buffer.release();
        assert_eq!(sink(rgba_frame(&bytes, Some(40))), DeliveryStatus::Delivered);
        assert_eq!(dispatcher.stats().released, 1);
    }

    #[test]
    fn test_pooled_frames_are_zero_copy() {
        let pool = BufferPool::new("backend", 1);
        let mut lease = pool.acquire(16).unwrap();
        lease.as_mut_slice()[0] = 42;
        let ptr = lease.as_slice().as_ptr() as usize;

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        let dispatcher = dispatcher(
            Arc::new(move |buffer: Buffer| {
                let data = buffer.plane_data(0).unwrap();
                seen_clone.store(data.as_ptr() as u64, Ordering::SeqCst);
            }),
            1,
        );
        let status = dispatcher.sink()(RawFrame {
            timestamp_us: None,
            payload: RawPayload::Video {
                width: 2,
                height: 2,
                pixel_format: PixelFormat::Rgba,
                planes: None,
            },
            storage: RawStorage::Pooled(lease),
        });

        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(seen.load(Ordering::SeqCst), ptr as u64);
        assert_eq!(dispatcher.stats().zero_copy, 1);
        // Dropped by the callback, so the backend slot is free again
        assert_eq!(pool.available(), 1);
        assert_eq!(dispatcher.stats().dropped_unreleased, 1);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let stamps_clone = Arc::clone(&stamps);
        let dispatcher = dispatcher(
            Arc::new(move |buffer: Buffer| stamps_clone.lock().unwrap().push(buffer.timestamp_us())),
            4,
        );
        let sink = dispatcher.sink();
        for stamp in [100, 50, 200] {
            sink(rgba_frame(&[0; 16], Some(stamp)));
        }
        assert_eq!(*stamps.lock().unwrap(), vec![100, 100, 200]);
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let dispatcher = dispatcher(Arc::new(|_| {}), 2);
        let status = dispatcher.sink()(RawFrame {
            timestamp_us: None,
            payload: RawPayload::Audio {
                frame_count: 10,
                format: AudioFormat::new(SampleFormat::F32, 48_000, 2),
            },
            storage: RawStorage::Transient(&[0; 80]),
        });
        // Audio on a camera session
        assert_eq!(status, DeliveryStatus::Rejected);
        assert_eq!(dispatcher.stats().rejected, 1);
        assert_eq!(dispatcher.copy_pool().outstanding(), 0);
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let dispatcher = dispatcher(Arc::new(|_| panic!("consumer bug")), 2);
        let status = dispatcher.sink()(rgba_frame(&[0; 16], None));
        assert_eq!(status, DeliveryStatus::Delivered);
        dispatcher.close_and_wait();
    }

    #[test]
    fn test_close_waits_for_in_flight_callback() {
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_clone, finished_clone) = (Arc::clone(&entered), Arc::clone(&finished));
        let dispatcher = dispatcher(
            Arc::new(move |_| {
                entered_clone.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                finished_clone.store(true, Ordering::SeqCst);
            }),
            2,
        );

        let sink = dispatcher.sink();
        let producer = std::thread::spawn(move || sink(rgba_frame(&[0; 16], None)));
        while !entered.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }

        dispatcher.close_and_wait();
        assert!(finished.load(Ordering::SeqCst));
        assert!(!dispatcher.is_open());
        assert_eq!(producer.join().unwrap(), DeliveryStatus::Delivered);
        assert_eq!(
            dispatcher.sink()(rgba_frame(&[0; 16], None)),
            DeliveryStatus::Closed
        );
    }
}
