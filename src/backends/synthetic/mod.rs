// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic capture backend
//!
//! Implements the backend contract for all four domains without touching any
//! platform API: cameras and displays render a scrolling colour bar pattern,
//! microphones and loopback monitors render a sine tone. Frames are produced
//! on a [`CaptureLoopController`] thread paced by the negotiated frame period.
//!
//! Storage behaviour is configurable so every delivery path of the capture
//! dispatcher can be exercised:
//! - `stable_buffers`: frames are rendered into pool slots and handed over
//!   without copying; otherwise a scratch buffer is lent for the call only
//! - `gpu_handles`: video streams opened with `GpuPreferred` output deliver
//!   opaque GPU handles instead of memory

pub mod catalog;
pub mod pattern;

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::negotiate::nearest_format;
use super::types::*;
use super::Backend;
use crate::constants::{audio, pool, timing};
use crate::media::buffer::{GpuHandle, GpuHandleKind};
use crate::media::clock;
use crate::media::formats::{AudioFormat, Format, OutputPreference, PixelFormat, VideoFormat};
use crate::media::pool::{BufferPool, PoolLease};
use pattern::ToneGenerator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const BACKEND_NAME: &str = "synthetic";

/// JPEG quality of synthetic MJPEG frames
const JPEG_QUALITY: u8 = 80;

/// Synthetic backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Hand frames over in stable pool slots (zero-copy) instead of
    /// transient scratch memory (copied by the dispatcher)
    pub stable_buffers: bool,
    /// Emit GPU handles for video streams that prefer GPU output
    pub gpu_handles: bool,
    /// Number of synthetic cameras
    pub camera_devices: u32,
    /// Number of synthetic microphones
    pub microphone_devices: u32,
    /// Slots in each stream's buffer pool
    pub pool_size: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            stable_buffers: true,
            gpu_handles: false,
            camera_devices: 2,
            microphone_devices: 2,
            pool_size: pool::DEFAULT_BACKEND_SLOTS,
        }
    }
}

#[derive(Debug, Default)]
struct ProbeInner {
    live_threads: AtomicUsize,
    open_streams: AtomicUsize,
    produced: AtomicU64,
    dropped: AtomicU64,
    drop_warnings: AtomicU64,
}

/// Shared statistics of synthetic backend instances
///
/// Clones observe the same counters, so a test can keep a probe while the
/// backends themselves are owned by capture contexts.
#[derive(Debug, Clone, Default)]
pub struct SyntheticProbe {
    inner: Arc<ProbeInner>,
}

impl SyntheticProbe {
    /// Producer threads currently running
    pub fn live_threads(&self) -> usize {
        self.inner.live_threads.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet closed
    pub fn open_streams(&self) -> usize {
        self.inner.open_streams.load(Ordering::SeqCst)
    }

    /// Frames the consumer side accepted
    pub fn frames_produced(&self) -> u64 {
        self.inner.produced.load(Ordering::Relaxed)
    }

    /// Frames discarded because no pool slot was free or the sink refused them
    pub fn frames_dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Pool exhaustion warnings logged so far
    pub fn drop_warnings(&self) -> u64 {
        self.inner.drop_warnings.load(Ordering::Relaxed)
    }
}

/// Counts one live producer thread for as long as it exists
struct LiveThread(SyntheticProbe);

impl LiveThread {
    fn enter(probe: &SyntheticProbe) -> Self {
        probe.inner.live_threads.fetch_add(1, Ordering::SeqCst);
        LiveThread(probe.clone())
    }
}

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.inner.live_threads.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What a stream renders
enum Source {
    Video(VideoFormat),
    Jpeg { width: u32, height: u32 },
    Audio { tone: ToneGenerator, format: AudioFormat, frame_count: u32 },
}

struct Stream {
    device_id: String,
    format: Format,
    pool: BufferPool,
    producer: Option<CaptureLoopController>,
}

/// Synthetic backend for one capture domain
pub struct SyntheticBackend {
    domain: CaptureDomain,
    config: SyntheticConfig,
    probe: SyntheticProbe,
    owner: Arc<str>,
    next_handle: u64,
    streams: HashMap<StreamHandle, Stream>,
}

impl SyntheticBackend {
    pub fn new(domain: CaptureDomain, config: SyntheticConfig) -> Self {
        Self::with_probe(domain, config, SyntheticProbe::default())
    }

    pub fn with_probe(domain: CaptureDomain, config: SyntheticConfig, probe: SyntheticProbe) -> Self {
        Self {
            domain,
            config,
            probe,
            owner: Arc::from(BACKEND_NAME),
            next_handle: 1,
            streams: HashMap::new(),
        }
    }

    pub fn probe(&self) -> &SyntheticProbe {
        &self.probe
    }

    fn check_device(&self, device_id: &str) -> BackendResult<()> {
        if catalog::devices(self.domain, &self.config)
            .iter()
            .any(|d| d.id == device_id)
        {
            Ok(())
        } else {
            Err(BackendError::DeviceNotFound(device_id.to_string()))
        }
    }

    fn stream_mut(&mut self, handle: StreamHandle) -> BackendResult<&mut Stream> {
        self.streams
            .get_mut(&handle)
            .ok_or(BackendError::InvalidHandle(handle))
    }
}

impl Backend for SyntheticBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn domain(&self) -> CaptureDomain {
        self.domain
    }

    fn enumerate(&self) -> BackendResult<Vec<DeviceInfo>> {
        Ok(catalog::devices(self.domain, &self.config))
    }

    fn probe_formats(&self, device_id: &str) -> BackendResult<Vec<Format>> {
        self.check_device(device_id)?;
        Ok(catalog::formats(self.domain))
    }

    fn open(&mut self, device_id: &str, format: &Format) -> BackendResult<OpenedStream> {
        let supported = self.probe_formats(device_id)?;
        let mut negotiated = nearest_format(format, &supported).ok_or_else(|| {
            BackendError::FormatNotSupported(format!("{} on {}", format, device_id))
        })?;

        if let Format::Audio(audio_format) = &mut negotiated {
            audio_format.frame_count = Some(audio_format.sample_rate * audio::PERIOD_MS / 1000);
        }

        let handle = StreamHandle(self.next_handle);
        self.next_handle += 1;

        let pool = BufferPool::new(
            format!("{}-{}", device_id, handle.0),
            self.config.pool_size,
        );
        self.streams.insert(
            handle,
            Stream {
                device_id: device_id.to_string(),
                format: negotiated.clone(),
                pool,
                producer: None,
            },
        );
        self.probe.inner.open_streams.fetch_add(1, Ordering::SeqCst);

        info!(device = %device_id, handle = %handle, format = %negotiated, "Synthetic stream opened");
        Ok(OpenedStream { handle, negotiated })
    }

    fn start(&mut self, handle: StreamHandle, sink: RawFrameSink) -> BackendResult<()> {
        let stable = self.config.stable_buffers;
        let gpu_enabled = self.config.gpu_handles;
        let probe = self.probe.clone();
        let owner = Arc::clone(&self.owner);
        let stream = self.stream_mut(handle)?;
        if stream.producer.is_some() {
            return Err(BackendError::Other(format!("stream {} already started", handle)));
        }

        let (source, period) = match &stream.format {
            Format::Video(video) if video.pixel_format == PixelFormat::Mjpeg => (
                Source::Jpeg {
                    width: video.width,
                    height: video.height,
                },
                video.framerate.frame_period_us(),
            ),
            Format::Video(video) => (
                Source::Video(video.clone()),
                video.framerate.frame_period_us(),
            ),
            Format::Audio(format) => {
                let frame_count = format
                    .frame_count
                    .unwrap_or(format.sample_rate * audio::PERIOD_MS / 1000);
                (
                    Source::Audio {
                        tone: ToneGenerator::new(
                            format.clone(),
                            audio::TONE_HZ,
                            audio::TONE_AMPLITUDE,
                        ),
                        format: format.clone(),
                        frame_count,
                    },
                    frame_count as u64 * 1_000_000 / format.sample_rate.max(1) as u64,
                )
            }
        };

        let gpu = match &stream.format {
            Format::Video(video)
                if gpu_enabled
                    && video.output == OutputPreference::GpuPreferred
                    && !video.pixel_format.is_compressed() =>
            {
                Some(owner)
            }
            _ => None,
        };

        let name = format!("{}-{}", stream.device_id, handle.0);
        let live = LiveThread::enter(&probe);
        let pool = stream.pool.clone();
        let period = Duration::from_micros(period.max(1));

        stream.producer = Some(CaptureLoopController::start_with_init(
            &name,
            move || {
                Ok(Producer {
                    sink,
                    pool,
                    source,
                    stable,
                    gpu,
                    period,
                    next_deadline: Instant::now(),
                    frame_index: 0,
                    next_gpu_value: 1,
                    scratch: Vec::new(),
                    pool_drops: 0,
                    last_drop_warning: None,
                    probe,
                    _live: live,
                })
            },
            Producer::produce,
        ));

        debug!(handle = %handle, period_us = period.as_micros() as u64, "Synthetic producer started");
        Ok(())
    }

    fn stop(&mut self, handle: StreamHandle) -> BackendResult<()> {
        let stream = self.stream_mut(handle)?;
        if let Some(mut producer) = stream.producer.take() {
            producer.stop();
            debug!(handle = %handle, "Synthetic producer stopped");
        }
        Ok(())
    }

    fn close(&mut self, handle: StreamHandle) -> BackendResult<()> {
        let mut stream = self
            .streams
            .remove(&handle)
            .ok_or(BackendError::InvalidHandle(handle))?;
        if let Some(mut producer) = stream.producer.take() {
            warn!(handle = %handle, "Closing a stream that was not stopped");
            producer.stop();
        }
        self.probe.inner.open_streams.fetch_sub(1, Ordering::SeqCst);

        let stats = stream.pool.stats();
        info!(
            handle = %handle,
            acquired = stats.acquired,
            exhausted = stats.exhausted,
            "Synthetic stream closed"
        );
        Ok(())
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        let handles: Vec<StreamHandle> = self.streams.keys().copied().collect();
        for handle in handles {
            if let Err(e) = self.close(handle) {
                warn!(handle = %handle, error = %e, "Failed to close synthetic stream");
            }
        }
    }
}

/// Per-thread state of a running synthetic stream
struct Producer {
    sink: RawFrameSink,
    pool: BufferPool,
    source: Source,
    stable: bool,
    /// GPU handle owner when emitting GPU frames
    gpu: Option<Arc<str>>,
    period: Duration,
    next_deadline: Instant,
    frame_index: u64,
    next_gpu_value: u64,
    scratch: Vec<u8>,
    pool_drops: u64,
    last_drop_warning: Option<Instant>,
    probe: SyntheticProbe,
    _live: LiveThread,
}

impl Producer {
    fn produce(&mut self) -> LoopAction {
        self.pace();
        let timestamp_us = clock::now_us();

        let status = match self.emit(timestamp_us) {
            Some(status) => status,
            None => {
                self.record_pool_exhausted();
                self.frame_index += 1;
                return LoopAction::Continue;
            }
        };
        self.frame_index += 1;

        match status {
            DeliveryStatus::Delivered => {
                self.probe.inner.produced.fetch_add(1, Ordering::Relaxed);
                LoopAction::Continue
            }
            DeliveryStatus::Dropped | DeliveryStatus::Rejected => {
                self.probe.inner.dropped.fetch_add(1, Ordering::Relaxed);
                LoopAction::Continue
            }
            DeliveryStatus::Closed => LoopAction::Stop,
        }
    }

    fn record_pool_exhausted(&mut self) {
        self.probe.inner.dropped.fetch_add(1, Ordering::Relaxed);
        self.pool_drops += 1;
        let due = self
            .last_drop_warning
            .is_none_or(|at| at.elapsed() >= timing::DROP_WARN_INTERVAL);
        if due {
            self.last_drop_warning = Some(Instant::now());
            self.probe.inner.drop_warnings.fetch_add(1, Ordering::Relaxed);
            warn!(
                pool = %self.pool.name(),
                dropped = self.pool_drops,
                "No free pool slot, dropping frames (buffers are not being released)"
            );
        } else {
            trace!(pool = %self.pool.name(), "No free slot, frame dropped");
        }
    }

    /// Sleep until the next frame is due
    fn pace(&mut self) {
        let now = Instant::now();
        if self.next_deadline > now {
            std::thread::sleep(self.next_deadline - now);
            self.next_deadline += self.period;
        } else if now - self.next_deadline > self.period {
            // Fell more than a frame behind: resynchronise instead of bursting
            self.next_deadline = now + self.period;
        } else {
            self.next_deadline += self.period;
        }
    }

    /// Render and push one frame; `None` when no slot was available
    fn emit(&mut self, timestamp_us: u64) -> Option<DeliveryStatus> {
        let timestamp_us = Some(timestamp_us);

        match &mut self.source {
            Source::Video(format) => {
                let payload = RawPayload::Video {
                    width: format.width,
                    height: format.height,
                    pixel_format: format.pixel_format,
                    planes: None,
                };

                if let Some(owner) = &self.gpu {
                    let slot = self.pool.acquire_slot()?;
                    let handles = (0..format.pixel_format.plane_count())
                        .map(|_| {
                            let value = self.next_gpu_value;
                            self.next_gpu_value += 1;
                            GpuHandle {
                                kind: GpuHandleKind::native(),
                                value,
                                owner: Arc::clone(owner),
                            }
                        })
                        .collect();
                    return Some((self.sink)(RawFrame {
                        timestamp_us,
                        payload,
                        storage: RawStorage::Gpu { handles, slot },
                    }));
                }

                let size = format.pixel_format.frame_size(format.width, format.height)?;
                if self.stable {
                    let mut lease = self.pool.acquire(size)?;
                    pattern::render_video(format, self.frame_index, lease.as_mut_slice());
                    Some(self.push_pooled(timestamp_us, payload, lease))
                } else {
                    self.scratch.resize(size, 0);
                    pattern::render_video(format, self.frame_index, &mut self.scratch);
                    Some((self.sink)(RawFrame {
                        timestamp_us,
                        payload,
                        storage: RawStorage::Transient(&self.scratch),
                    }))
                }
            }
            Source::Jpeg { width, height } => {
                let (width, height) = (*width, *height);
                let jpeg = match pattern::render_jpeg(width, height, self.frame_index, JPEG_QUALITY) {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        warn!(error = %e, "Failed to render MJPEG frame");
                        return Some(DeliveryStatus::Rejected);
                    }
                };
                let payload = RawPayload::Video {
                    width,
                    height,
                    pixel_format: PixelFormat::Mjpeg,
                    planes: None,
                };

                if self.stable {
                    let mut lease = self.pool.acquire(0)?;
                    lease.copy_from(&jpeg);
                    Some(self.push_pooled(timestamp_us, payload, lease))
                } else {
                    self.scratch = jpeg;
                    Some((self.sink)(RawFrame {
                        timestamp_us,
                        payload,
                        storage: RawStorage::Transient(&self.scratch),
                    }))
                }
            }
            Source::Audio {
                tone,
                format,
                frame_count,
            } => {
                let size = *frame_count as usize * format.bytes_per_frame();
                let payload = RawPayload::Audio {
                    frame_count: *frame_count,
                    format: format.clone(),
                };

                if self.stable {
                    let mut lease = self.pool.acquire(size)?;
                    tone.render(*frame_count, lease.as_mut_slice());
                    Some(self.push_pooled(timestamp_us, payload, lease))
                } else {
                    self.scratch.resize(size, 0);
                    tone.render(*frame_count, &mut self.scratch);
                    Some((self.sink)(RawFrame {
                        timestamp_us,
                        payload,
                        storage: RawStorage::Transient(&self.scratch),
                    }))
                }
            }
        }
    }

    fn push_pooled(&self, timestamp_us: Option<u64>, payload: RawPayload, lease: PoolLease) -> DeliveryStatus {
        (self.sink)(RawFrame {
            timestamp_us,
            payload,
            storage: RawStorage::Pooled(lease),
        })
    }
}
