// SPDX-License-Identifier: MPL-2.0

//! Media descriptors and buffer plumbing
//!
//! # Modules
//!
//! - [`formats`]: Pixel, video, audio and tagged format descriptors
//! - [`buffer`]: Buffers lent to consumers, and their owned copies
//! - [`pool`]: Bounded pools backing buffer storage
//! - [`clock`]: Process-wide capture clock
//! - [`convert`]: CPU conversion of raw frames to RGB images

pub mod buffer;
pub mod clock;
pub mod convert;
pub mod formats;
pub mod pool;

// Re-export commonly used types
pub use buffer::{
    Buffer, ContentLocation, GpuHandle, GpuHandleKind, OwnedBuffer, Payload, PlaneRef,
    release_buffer,
};
pub use formats::{
    AudioFormat, Format, Framerate, MediaKind, OutputPreference, PixelFormat, SampleFormat,
    VideoFormat,
};
pub use pool::{BufferPool, PoolStats};
