// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for capture backends

use crate::media::buffer::GpuHandle;
use crate::media::formats::{AudioFormat, Format, MediaKind, PixelFormat, PlaneLayout};
use crate::media::pool::PoolLease;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Independent source category with its own backend and context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureDomain {
    Camera,
    Screen,
    AudioInput,
    LoopbackAudio,
}

impl CaptureDomain {
    pub const ALL: [CaptureDomain; 4] = [
        CaptureDomain::Camera,
        CaptureDomain::Screen,
        CaptureDomain::AudioInput,
        CaptureDomain::LoopbackAudio,
    ];

    /// Camera and screen deliver video, the others deliver audio
    pub fn media_kind(&self) -> MediaKind {
        match self {
            CaptureDomain::Camera | CaptureDomain::Screen => MediaKind::Video,
            CaptureDomain::AudioInput | CaptureDomain::LoopbackAudio => MediaKind::Audio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureDomain::Camera => "camera",
            CaptureDomain::Screen => "screen",
            CaptureDomain::AudioInput => "audio-input",
            CaptureDomain::LoopbackAudio => "loopback-audio",
        }
    }
}

impl fmt::Display for CaptureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" | "cam" => Ok(CaptureDomain::Camera),
            "screen" | "display" => Ok(CaptureDomain::Screen),
            "audio-input" | "audio" | "mic" | "microphone" => Ok(CaptureDomain::AudioInput),
            "loopback-audio" | "loopback" => Ok(CaptureDomain::LoopbackAudio),
            other => Err(format!(
                "unknown capture domain '{}' (expected camera, screen, audio-input or loopback-audio)",
                other
            )),
        }
    }
}

/// A capturable device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable backend identifier, passed back to `configure`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Whether the platform marks this as the default device
    pub is_default: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)?;
        if self.is_default {
            write!(f, " [default]")?;
        }
        Ok(())
    }
}

/// Backend-issued handle for one opened stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a successful `open`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedStream {
    pub handle: StreamHandle,
    /// Format the backend will actually deliver (may differ from the request)
    pub negotiated: Format,
}

/// Result type alias using BackendError
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Device id unknown to this backend
    DeviceNotFound(String),
    /// The platform device query failed
    EnumerationFailed(String),
    /// Format or content type not supported
    FormatNotSupported(String),
    /// Platform error with its native code (HRESULT, OSStatus, errno)
    Platform { code: i32, message: String },
    /// The platform did not answer in time
    Timeout(String),
    /// Stream handle unknown or already closed
    InvalidHandle(StreamHandle),
    /// Other errors
    Other(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::DeviceNotFound(id) => write!(f, "Device not found: {}", id),
            BackendError::EnumerationFailed(msg) => write!(f, "Enumeration failed: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::Platform { code, message } => {
                write!(f, "Platform error {}: {}", code, message)
            }
            BackendError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            BackendError::InvalidHandle(handle) => write!(f, "Invalid stream handle {}", handle),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Payload description of a raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    Video {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        /// Per-plane layout when it differs from the tight layout
        /// (row padding). `None` means tightly packed.
        planes: Option<Vec<PlaneLayout>>,
    },
    Audio {
        frame_count: u32,
        format: AudioFormat,
    },
}

/// Where a raw frame's content lives when it reaches the sink
pub enum RawStorage<'a> {
    /// Stable storage in a pool slot: handed to the consumer without copying
    Pooled(PoolLease),
    /// Storage valid only for the duration of the sink call: copied on wrap
    Transient(&'a [u8]),
    /// GPU textures, one handle per plane, holding a slot of the backend's pool
    Gpu {
        handles: Vec<GpuHandle>,
        slot: PoolLease,
    },
}

impl fmt::Debug for RawStorage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawStorage::Pooled(lease) => write!(f, "Pooled({:?})", lease),
            RawStorage::Transient(data) => write!(f, "Transient({} bytes)", data.len()),
            RawStorage::Gpu { handles, .. } => write!(f, "Gpu({} handles)", handles.len()),
        }
    }
}

/// One frame as produced by a backend, before it becomes a [`Buffer`](crate::media::Buffer)
#[derive(Debug)]
pub struct RawFrame<'a> {
    /// Capture time on the shared clock; stamped on arrival when `None`
    pub timestamp_us: Option<u64>,
    pub payload: RawPayload,
    pub storage: RawStorage<'a>,
}

/// What happened to a frame pushed into the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// Handed to the consumer callback
    Delivered,
    /// No buffer slot free for the copy; frame discarded
    Dropped,
    /// Capture is stopping; the producer should wind down
    Closed,
    /// Frame was malformed (payload and storage disagree)
    Rejected,
}

/// Entry point a backend pushes frames into
///
/// Called from the backend's producer thread. The callee never retains the
/// borrowed storage past the call.
pub type RawFrameSink = Arc<dyn Fn(RawFrame<'_>) -> DeliveryStatus + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_media_kind() {
        assert_eq!(CaptureDomain::Camera.media_kind(), MediaKind::Video);
        assert_eq!(CaptureDomain::Screen.media_kind(), MediaKind::Video);
        assert_eq!(CaptureDomain::AudioInput.media_kind(), MediaKind::Audio);
        assert_eq!(CaptureDomain::LoopbackAudio.media_kind(), MediaKind::Audio);
    }

    #[test]
    fn test_domain_parse_round_trip() {
        for domain in CaptureDomain::ALL {
            assert_eq!(domain.to_string().parse::<CaptureDomain>(), Ok(domain));
        }
        assert_eq!("Mic".parse::<CaptureDomain>(), Ok(CaptureDomain::AudioInput));
        assert!("printer".parse::<CaptureDomain>().is_err());
    }

    #[test]
    fn test_domain_serde_is_kebab_case() {
        let json = serde_json::to_string(&CaptureDomain::LoopbackAudio).unwrap();
        assert_eq!(json, "\"loopback-audio\"");
    }
}
