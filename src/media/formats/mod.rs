// SPDX-License-Identifier: MPL-2.0

//! Format descriptors
//!
//! Value types describing what a device can produce and what was actually
//! negotiated. Video and audio formats share the tagged [`Format`] type so
//! every capture domain goes through the same context and negotiation code.

pub mod pixel;

pub use pixel::{PixelFormat, PlaneLayout};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad media kind of a format, buffer or capture domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Framerate as a fraction (numerator/denominator)
/// Stores exact framerate to handle NTSC rates like 59.94fps (60000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub const fn new(num: u32, denom: u32) -> Self {
        Self { num, denom }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub const fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    /// Both terms must be non-zero
    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.denom != 0
    }

    /// Get the framerate as a floating point value (display only)
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Duration of one frame in microseconds, rounded down
    pub fn frame_period_us(&self) -> u64 {
        if self.num == 0 {
            return 0;
        }
        1_000_000u64 * self.denom as u64 / self.num as u64
    }

    /// Distance to another framerate in micro-frames per second
    ///
    /// Computed on the exact fractions so 60000/1001 and 60/1 stay distinct.
    pub fn distance(&self, other: &Framerate) -> u64 {
        if !self.is_valid() || !other.is_valid() {
            return u64::MAX;
        }
        let lhs = self.num as u128 * other.denom as u128;
        let rhs = other.num as u128 * self.denom as u128;
        let denom = self.denom as u128 * other.denom as u128;
        (lhs.abs_diff(rhs) * 1_000_000 / denom) as u64
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show decimal for non-integer framerates (NTSC)
        if self.denom == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{:.2}", self.as_f64())
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::from_int(30)
    }
}

/// Where the consumer would like video buffers to live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputPreference {
    /// CPU-resident memory
    #[default]
    Cpu,
    /// GPU handles when the backend can provide them, CPU otherwise
    GpuPreferred,
}

/// Video format specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub framerate: Framerate,
    #[serde(default)]
    pub output: OutputPreference,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, framerate: Framerate) -> Self {
        Self {
            width,
            height,
            pixel_format,
            framerate,
            output: OutputPreference::Cpu,
        }
    }

    /// Same format with a different output preference
    pub fn with_output(mut self, output: OutputPreference) -> Self {
        self.output = output;
        self
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} @ {}fps",
            self.width, self.height, self.pixel_format, self.framerate
        )?;
        if self.output == OutputPreference::GpuPreferred {
            write!(f, " (gpu)")?;
        }
        Ok(())
    }
}

/// PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::U8 => "u8",
            SampleFormat::I16 => "s16",
            SampleFormat::I32 => "s32",
            SampleFormat::F32 => "f32",
        };
        write!(f, "{}", name)
    }
}

/// Audio format specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per delivered buffer. Filled in by the backend when the stream
    /// is opened; never a configuration input.
    #[serde(default)]
    pub frame_count: Option<u32>,
}

impl AudioFormat {
    pub fn new(sample_format: SampleFormat, sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_format,
            sample_rate,
            channels,
            frame_count: None,
        }
    }

    /// Bytes of one interleaved frame (one sample per channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}Hz {}ch",
            self.sample_format, self.sample_rate, self.channels
        )?;
        if let Some(frames) = self.frame_count {
            write!(f, " ({} frames)", frames)?;
        }
        Ok(())
    }
}

/// A format for any capture domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Format {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl Format {
    pub fn kind(&self) -> MediaKind {
        match self {
            Format::Video(_) => MediaKind::Video,
            Format::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn as_video(&self) -> Option<&VideoFormat> {
        match self {
            Format::Video(v) => Some(v),
            Format::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioFormat> {
        match self {
            Format::Audio(a) => Some(a),
            Format::Video(_) => None,
        }
    }

    /// Check structural validity, returning a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Format::Video(v) => {
                if v.width == 0 || v.height == 0 {
                    return Err(format!("zero-sized video format {}x{}", v.width, v.height));
                }
                if !v.framerate.is_valid() {
                    return Err(format!(
                        "invalid framerate {}/{}",
                        v.framerate.num, v.framerate.denom
                    ));
                }
                Ok(())
            }
            Format::Audio(a) => {
                if a.sample_rate == 0 {
                    return Err("zero sample rate".to_string());
                }
                if a.channels == 0 {
                    return Err("zero channel count".to_string());
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Video(v) => fmt::Display::fmt(v, f),
            Format::Audio(a) => fmt::Display::fmt(a, f),
        }
    }
}

impl From<VideoFormat> for Format {
    fn from(format: VideoFormat) -> Self {
        Format::Video(format)
    }
}

impl From<AudioFormat> for Format {
    fn from(format: AudioFormat) -> Self {
        Format::Audio(format)
    }
}
