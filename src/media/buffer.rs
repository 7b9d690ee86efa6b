// SPDX-License-Identifier: GPL-3.0-only

//! Buffers delivered to capture consumers
//!
//! A [`Buffer`] is a zero-copy view of one captured frame. Its storage is a
//! leased pool slot: either CPU memory holding every plane back to back, or a
//! set of platform GPU handles. The slot stays reserved until the consumer
//! calls [`Buffer::release`] (dropping the buffer releases it as well), so a
//! consumer that holds on to buffers makes the producer drop frames.
//!
//! To keep data beyond the buffer's life, copy it out with
//! [`Buffer::copy_out`], which returns a pool-independent [`OwnedBuffer`].

use super::formats::{AudioFormat, MediaKind, PixelFormat, PlaneLayout};
use super::pool::PoolLease;
use crate::backends::CaptureDomain;
use crate::errors::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of platform GPU handle carried by a GPU-resident buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuHandleKind {
    /// `ID3D11Texture2D*` (Windows)
    D3D11Texture,
    /// `id<MTLTexture>` (macOS / iOS)
    MetalTexture,
    /// DMA-BUF file descriptor (Linux)
    DmaBuf,
}

impl GpuHandleKind {
    /// The handle kind native to the platform this crate was built for
    pub fn native() -> Self {
        if cfg!(target_os = "windows") {
            GpuHandleKind::D3D11Texture
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            GpuHandleKind::MetalTexture
        } else {
            GpuHandleKind::DmaBuf
        }
    }
}

impl fmt::Display for GpuHandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuHandleKind::D3D11Texture => write!(f, "d3d11"),
            GpuHandleKind::MetalTexture => write!(f, "metal"),
            GpuHandleKind::DmaBuf => write!(f, "dmabuf"),
        }
    }
}

/// Opaque platform GPU handle
///
/// The value is never dereferenced by this crate. The resource belongs to
/// `owner` (the backend that produced it) and is reclaimed by that backend
/// when the buffer's pool slot is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuHandle {
    pub kind: GpuHandleKind,
    pub value: u64,
    pub owner: Arc<str>,
}

/// Where a buffer's content lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentLocation {
    Cpu,
    Gpu(GpuHandleKind),
}

impl ContentLocation {
    pub fn is_cpu(&self) -> bool {
        matches!(self, ContentLocation::Cpu)
    }
}

impl fmt::Display for ContentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentLocation::Cpu => write!(f, "cpu"),
            ContentLocation::Gpu(kind) => write!(f, "gpu:{}", kind),
        }
    }
}

/// Description of one video plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneInfo {
    pub stride: u32,
    pub rows: u32,
    /// Byte offset into CPU storage (always 0 for GPU planes)
    pub offset: usize,
}

impl PlaneInfo {
    pub fn size(&self) -> usize {
        self.stride as usize * self.rows as usize
    }
}

/// Video-specific attributes of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPayload {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub planes: Vec<PlaneInfo>,
}

/// Audio-specific attributes of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub frame_count: u32,
    pub format: AudioFormat,
}

impl AudioPayload {
    pub fn byte_size(&self) -> usize {
        self.frame_count as usize * self.format.bytes_per_frame()
    }
}

/// Payload description: exactly one of video or audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Video(VideoPayload),
    Audio(AudioPayload),
}

impl Payload {
    pub fn kind(&self) -> MediaKind {
        match self {
            Payload::Video(_) => MediaKind::Video,
            Payload::Audio(_) => MediaKind::Audio,
        }
    }

    /// Nominal size: sum of `stride * rows` for video, frames × frame size for audio
    pub fn byte_size(&self) -> usize {
        match self {
            Payload::Video(video) => video.planes.iter().map(PlaneInfo::size).sum(),
            Payload::Audio(audio) => audio.byte_size(),
        }
    }
}

/// Compute plane descriptors for contiguous CPU storage
///
/// Uses the given layouts when the backend reported its own strides, the
/// tight layout of the pixel format otherwise. Compressed formats are a single
/// plane spanning the whole payload.
pub fn contiguous_planes(
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    layouts: Option<&[PlaneLayout]>,
    payload_len: usize,
) -> Vec<PlaneInfo> {
    let layouts: Vec<PlaneLayout> = match layouts {
        Some(layouts) => layouts.to_vec(),
        None => match pixel_format.plane_layouts(width, height) {
            Some(layouts) => layouts,
            None => {
                return vec![PlaneInfo {
                    stride: u32::try_from(payload_len).unwrap_or(u32::MAX),
                    rows: 1,
                    offset: 0,
                }];
            }
        },
    };

    let mut offset = 0;
    layouts
        .into_iter()
        .map(|layout| {
            let plane = PlaneInfo {
                stride: layout.stride,
                rows: layout.rows,
                offset,
            };
            offset += layout.size();
            plane
        })
        .collect()
}

/// Counters shared between a capture session and its buffers
#[derive(Debug, Default)]
pub struct ReleaseCounters {
    pub(crate) released: AtomicU64,
    pub(crate) dropped_unreleased: AtomicU64,
}

impl ReleaseCounters {
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn dropped_unreleased(&self) -> u64 {
        self.dropped_unreleased.load(Ordering::Relaxed)
    }
}

pub(crate) enum Storage {
    Cpu(PoolLease),
    Gpu {
        handles: Vec<GpuHandle>,
        slot: PoolLease,
    },
}

/// Borrowed content of one plane
#[derive(Debug, Clone, Copy)]
pub enum PlaneRef<'a> {
    Cpu(&'a [u8]),
    Gpu(&'a GpuHandle),
}

/// One captured frame, lent to the consumer until released
pub struct Buffer {
    domain: CaptureDomain,
    sequence: u64,
    timestamp_us: u64,
    payload: Payload,
    storage: Storage,
    counters: Option<Arc<ReleaseCounters>>,
    released: bool,
}

impl Buffer {
    /// Assemble a buffer, checking that location, payload and storage agree
    pub(crate) fn new(
        domain: CaptureDomain,
        sequence: u64,
        timestamp_us: u64,
        payload: Payload,
        storage: Storage,
        counters: Option<Arc<ReleaseCounters>>,
    ) -> Result<Self, String> {
        if payload.kind() != domain.media_kind() {
            return Err(format!(
                "{} payload delivered on {} domain",
                payload.kind(),
                domain
            ));
        }

        match (&payload, &storage) {
            (Payload::Video(video), Storage::Cpu(lease)) => {
                let end = video
                    .planes
                    .iter()
                    .map(|p| p.offset + p.size())
                    .max()
                    .unwrap_or(0);
                if end > lease.len() {
                    return Err(format!(
                        "planes need {} bytes but storage holds {}",
                        end,
                        lease.len()
                    ));
                }
            }
            (Payload::Video(video), Storage::Gpu { handles, .. }) => {
                if handles.len() != video.planes.len() {
                    return Err(format!(
                        "{} planes but {} GPU handles",
                        video.planes.len(),
                        handles.len()
                    ));
                }
                if handles.windows(2).any(|w| w[0].kind != w[1].kind) {
                    return Err("mixed GPU handle kinds in one buffer".to_string());
                }
            }
            (Payload::Audio(audio), Storage::Cpu(lease)) => {
                if audio.byte_size() > lease.len() {
                    return Err(format!(
                        "{} audio frames need {} bytes but storage holds {}",
                        audio.frame_count,
                        audio.byte_size(),
                        lease.len()
                    ));
                }
            }
            (Payload::Audio(_), Storage::Gpu { .. }) => {
                return Err("audio buffers cannot carry GPU handles".to_string());
            }
        }

        Ok(Self {
            domain,
            sequence,
            timestamp_us,
            payload,
            storage,
            counters,
            released: false,
        })
    }

    pub fn domain(&self) -> CaptureDomain {
        self.domain
    }

    pub fn kind(&self) -> MediaKind {
        self.payload.kind()
    }

    /// Position of this buffer in its capture session, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Capture time on the process-wide clock (see [`crate::media::clock`])
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn location(&self) -> ContentLocation {
        match &self.storage {
            Storage::Cpu(_) => ContentLocation::Cpu,
            Storage::Gpu { handles, .. } => ContentLocation::Gpu(
                handles
                    .first()
                    .map(|h| h.kind)
                    .unwrap_or_else(GpuHandleKind::native),
            ),
        }
    }

    /// Total size of the content in bytes
    ///
    /// For CPU buffers this is the sum of the plane sizes (video) or
    /// frames × bytes per sample × channels (audio). For GPU buffers it is the
    /// nominal size of the textures.
    pub fn byte_size(&self) -> usize {
        self.payload.byte_size()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn video(&self) -> Option<&VideoPayload> {
        match &self.payload {
            Payload::Video(video) => Some(video),
            Payload::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioPayload> {
        match &self.payload {
            Payload::Audio(audio) => Some(audio),
            Payload::Video(_) => None,
        }
    }

    pub fn plane_count(&self) -> usize {
        match &self.payload {
            Payload::Video(video) => video.planes.len(),
            Payload::Audio(_) => 1,
        }
    }

    /// Content of plane `index`: memory for CPU buffers, a handle for GPU buffers
    pub fn plane(&self, index: usize) -> Option<PlaneRef<'_>> {
        match (&self.payload, &self.storage) {
            (Payload::Video(video), Storage::Cpu(lease)) => {
                let plane = video.planes.get(index)?;
                lease
                    .as_slice()
                    .get(plane.offset..plane.offset + plane.size())
                    .map(PlaneRef::Cpu)
            }
            (Payload::Video(_), Storage::Gpu { handles, .. }) => {
                handles.get(index).map(PlaneRef::Gpu)
            }
            (Payload::Audio(audio), Storage::Cpu(lease)) if index == 0 => lease
                .as_slice()
                .get(..audio.byte_size())
                .map(PlaneRef::Cpu),
            _ => None,
        }
    }

    /// CPU bytes of plane `index`, `None` for GPU buffers
    pub fn plane_data(&self, index: usize) -> Option<&[u8]> {
        match self.plane(index)? {
            PlaneRef::Cpu(data) => Some(data),
            PlaneRef::Gpu(_) => None,
        }
    }

    /// GPU handle of plane `index`, `None` for CPU buffers
    pub fn gpu_handle(&self, index: usize) -> Option<&GpuHandle> {
        match self.plane(index)? {
            PlaneRef::Gpu(handle) => Some(handle),
            PlaneRef::Cpu(_) => None,
        }
    }

    /// Interleaved sample bytes of an audio buffer
    pub fn audio_data(&self) -> Option<&[u8]> {
        self.audio()?;
        self.plane_data(0)
    }

    /// Interleaved samples of an F32 audio buffer
    ///
    /// Returns `None` for other sample formats or if the storage is not
    /// aligned for `f32` access.
    pub fn samples_f32(&self) -> Option<&[f32]> {
        let audio = self.audio()?;
        if audio.format.sample_format != super::formats::SampleFormat::F32 {
            return None;
        }
        bytemuck::try_cast_slice(self.audio_data()?).ok()
    }

    /// Copy the content into memory owned by the caller
    ///
    /// Fails with `NotSupported` for GPU buffers: their content is not
    /// addressable from the CPU.
    pub fn copy_out(&self) -> CaptureResult<OwnedBuffer> {
        let lease = match &self.storage {
            Storage::Cpu(lease) => lease,
            Storage::Gpu { .. } => {
                return Err(CaptureError::NotSupported(
                    "cannot copy out a GPU-resident buffer".to_string(),
                ));
            }
        };

        Ok(OwnedBuffer {
            domain: self.domain,
            sequence: self.sequence,
            timestamp_us: self.timestamp_us,
            data: lease.as_slice()[..self.byte_size().min(lease.len())].to_vec(),
            payload: self.payload.clone(),
        })
    }

    /// Give the buffer's pool slot back to the producer
    pub fn release(mut self) {
        self.released = true;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(counters) = &self.counters {
            if self.released {
                counters.released.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.dropped_unreleased.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("domain", &self.domain)
            .field("sequence", &self.sequence)
            .field("timestamp_us", &self.timestamp_us)
            .field("location", &self.location())
            .field("byte_size", &self.byte_size())
            .field("payload", &self.payload)
            .finish()
    }
}

/// Give a delivered buffer back to its pool
pub fn release_buffer(buffer: Buffer) {
    buffer.release();
}

/// A CPU copy of a buffer, detached from any pool
#[derive(Debug, Clone)]
pub struct OwnedBuffer {
    pub domain: CaptureDomain,
    pub sequence: u64,
    pub timestamp_us: u64,
    pub payload: Payload,
    pub data: Vec<u8>,
}

impl OwnedBuffer {
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn plane_data(&self, index: usize) -> Option<&[u8]> {
        match &self.payload {
            Payload::Video(video) => {
                let plane = video.planes.get(index)?;
                self.data.get(plane.offset..plane.offset + plane.size())
            }
            Payload::Audio(_) if index == 0 => Some(&self.data),
            Payload::Audio(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::formats::SampleFormat;
    use crate::media::pool::BufferPool;

    fn video_buffer(pool: &BufferPool, pixel_format: PixelFormat, width: u32, height: u32) -> Buffer {
        let size = pixel_format.frame_size(width, height).unwrap();
        let lease = pool.acquire(size).unwrap();
        let planes = contiguous_planes(pixel_format, width, height, None, size);
        Buffer::new(
            CaptureDomain::Camera,
            0,
            1_000,
            Payload::Video(VideoPayload {
                width,
                height,
                pixel_format,
                planes,
            }),
            Storage::Cpu(lease),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_cpu_video_byte_size_is_plane_sum() {
        let pool = BufferPool::new("test", 2);
        let buffer = video_buffer(&pool, PixelFormat::I420, 640, 480);
        let sum: usize = (0..buffer.plane_count())
            .map(|i| buffer.plane_data(i).unwrap().len())
            .sum();
        assert_eq!(buffer.byte_size(), sum);
        assert_eq!(buffer.byte_size(), 640 * 480 * 3 / 2);
        assert_eq!(buffer.location(), ContentLocation::Cpu);
        assert!(buffer.gpu_handle(0).is_none());
    }

    #[test]
    fn test_cpu_audio_byte_size() {
        let pool = BufferPool::new("audio", 1);
        let format = AudioFormat::new(SampleFormat::I16, 48_000, 2);
        let lease = pool.acquire(480 * 4).unwrap();
        let buffer = Buffer::new(
            CaptureDomain::AudioInput,
            0,
            0,
            Payload::Audio(AudioPayload {
                frame_count: 480,
                format,
            }),
            Storage::Cpu(lease),
            None,
        )
        .unwrap();
        assert_eq!(buffer.byte_size(), 480 * 2 * 2);
        assert_eq!(buffer.audio_data().unwrap().len(), buffer.byte_size());
        assert!(buffer.samples_f32().is_none());
    }

    #[test]
    fn test_gpu_buffer_carries_handles_only() {
        let pool = BufferPool::new("gpu", 1);
        let owner: Arc<str> = Arc::from("test-backend");
        let handles = (0..2)
            .map(|i| GpuHandle {
                kind: GpuHandleKind::DmaBuf,
                value: 40 + i,
                owner: Arc::clone(&owner),
            })
            .collect();
        let buffer = Buffer::new(
            CaptureDomain::Screen,
            0,
            0,
            Payload::Video(VideoPayload {
                width: 64,
                height: 64,
                pixel_format: PixelFormat::Nv12,
                planes: contiguous_planes(PixelFormat::Nv12, 64, 64, None, 0)
                    .into_iter()
                    .map(|p| PlaneInfo { offset: 0, ..p })
                    .collect(),
            }),
            Storage::Gpu {
                handles,
                slot: pool.acquire_slot().unwrap(),
            },
            None,
        )
        .unwrap();

        assert_eq!(buffer.location(), ContentLocation::Gpu(GpuHandleKind::DmaBuf));
        assert!(buffer.plane_data(0).is_none());
        assert_eq!(buffer.gpu_handle(1).unwrap().value, 41);
        assert!(matches!(buffer.copy_out(), Err(CaptureError::NotSupported(_))));
    }

    #[test]
    fn test_rejects_mismatched_parts() {
        let pool = BufferPool::new("bad", 2);
        let audio = Payload::Audio(AudioPayload {
            frame_count: 10,
            format: AudioFormat::new(SampleFormat::F32, 48_000, 2),
        });
        // Audio payload on a video domain
        assert!(
            Buffer::new(
                CaptureDomain::Camera,
                0,
                0,
                audio.clone(),
                Storage::Cpu(pool.acquire(80).unwrap()),
                None
            )
            .is_err()
        );
        // Storage too small for the payload
        assert!(
            Buffer::new(
                CaptureDomain::LoopbackAudio,
                0,
                0,
                audio,
                Storage::Cpu(pool.acquire(8).unwrap()),
                None
            )
            .is_err()
        );
        // Rejected buffers return their slots
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_release_returns_slot_and_counts() {
        let pool = BufferPool::new("release", 1);
        let counters = Arc::new(ReleaseCounters::default());
        let size = PixelFormat::Rgba.frame_size(4, 4).unwrap();
        let make = |counters: &Arc<ReleaseCounters>| {
            Buffer::new(
                CaptureDomain::Camera,
                0,
                0,
                Payload::Video(VideoPayload {
                    width: 4,
                    height: 4,
                    pixel_format: PixelFormat::Rgba,
                    planes: contiguous_planes(PixelFormat::Rgba, 4, 4, None, size),
                }),
                Storage::Cpu(pool.acquire(size).unwrap()),
                Some(Arc::clone(counters)),
            )
            .unwrap()
        };

        let buffer = make(&counters);
        assert_eq!(pool.available(), 0);
        release_buffer(buffer);
        assert_eq!(pool.available(), 1);

        drop(make(&counters));
        assert_eq!(counters.released(), 1);
        assert_eq!(counters.dropped_unreleased(), 1);
    }

    #[test]
    fn test_copy_out_detaches_from_pool() {
        let pool = BufferPool::new("copy", 1);
        let buffer = video_buffer(&pool, PixelFormat::Nv12, 8, 8);
        let owned = buffer.copy_out().unwrap();
        buffer.release();
        assert_eq!(pool.available(), 1);
        assert_eq!(owned.byte_size(), 8 * 8 * 3 / 2);
        assert_eq!(owned.plane_data(1).unwrap().len(), 8 * 4);
    }

    #[test]
    fn test_compressed_plane_spans_payload() {
        let planes = contiguous_planes(PixelFormat::Mjpeg, 640, 480, None, 12_345);
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].size(), 12_345);
    }
}
