// SPDX-License-Identifier: GPL-3.0-only

//! Pixel formats and their memory layout

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel formats a video domain can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    // ===== Packed RGB =====
    /// RGB 24-bit (R G B byte order)
    Rgb24,
    /// BGR 24-bit (B G R byte order)
    Bgr24,
    /// RGBA 32-bit
    Rgba,
    /// BGRA 32-bit, native output of most screen capture APIs
    Bgra,
    /// ARGB 32-bit
    Argb,
    /// ABGR 32-bit
    Abgr,
    /// 8-bit grayscale
    Gray8,

    // ===== Packed YUV 4:2:2 =====
    /// YUYV 4:2:2 (Y0 U Y1 V)
    Yuyv,
    /// UYVY 4:2:2 (U Y0 V Y1)
    Uyvy,

    // ===== Planar / semi-planar YUV 4:2:0 =====
    /// I420 - Y, U and V planes
    I420,
    /// NV12 - Y plane + interleaved UV plane
    Nv12,
    /// NV21 - Y plane + interleaved VU plane
    Nv21,
    /// P010 - 10-bit NV12 (16-bit little endian containers)
    P010,
    /// I010 - 10-bit I420 (16-bit little endian containers)
    I010,

    // ===== Raw sensor =====
    BayerRggb,
    BayerBggr,
    BayerGrbg,
    BayerGbrg,

    // ===== Compressed =====
    /// Motion JPEG, one JPEG image per frame
    Mjpeg,
}

/// Stride and row count of one plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Bytes per row
    pub stride: u32,
    /// Number of rows
    pub rows: u32,
}

impl PlaneLayout {
    pub fn size(&self) -> usize {
        self.stride as usize * self.rows as usize
    }
}

/// Width of a chroma plane for 2x horizontal subsampling
fn half(value: u32) -> u32 {
    value.div_ceil(2)
}

impl PixelFormat {
    /// All pixel formats, in preference order for automatic selection
    pub const ALL: [PixelFormat; 19] = [
        PixelFormat::Nv12,
        PixelFormat::I420,
        PixelFormat::Nv21,
        PixelFormat::Yuyv,
        PixelFormat::Uyvy,
        PixelFormat::P010,
        PixelFormat::I010,
        PixelFormat::Bgra,
        PixelFormat::Rgba,
        PixelFormat::Argb,
        PixelFormat::Abgr,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Gray8,
        PixelFormat::BayerRggb,
        PixelFormat::BayerBggr,
        PixelFormat::BayerGrbg,
        PixelFormat::BayerGbrg,
        PixelFormat::Mjpeg,
    ];

    /// Parse a pixel format from a FourCC or GStreamer-style name
    pub fn from_fourcc(fourcc: &str) -> Option<Self> {
        match fourcc.trim().to_uppercase().as_str() {
            "RGB" | "RGB3" | "RGB24" => Some(Self::Rgb24),
            "BGR" | "BGR3" | "BGR24" => Some(Self::Bgr24),
            "RGBA" | "RGBX" | "AB24" => Some(Self::Rgba),
            "BGRA" | "BGRX" | "AR24" => Some(Self::Bgra),
            "ARGB" | "XRGB" => Some(Self::Argb),
            "ABGR" | "XBGR" => Some(Self::Abgr),
            "GREY" | "GRAY8" | "Y8" | "Y800" => Some(Self::Gray8),
            "YUYV" | "YUY2" => Some(Self::Yuyv),
            "UYVY" => Some(Self::Uyvy),
            "I420" | "IYUV" | "YU12" => Some(Self::I420),
            "NV12" => Some(Self::Nv12),
            "NV21" => Some(Self::Nv21),
            "P010" => Some(Self::P010),
            "I010" | "I420_10LE" => Some(Self::I010),
            "RGGB" | "SRGGB8" => Some(Self::BayerRggb),
            "BGGR" | "BA82" | "SBGGR8" => Some(Self::BayerBggr),
            "GRBG" | "BA81" | "SGRBG8" => Some(Self::BayerGrbg),
            "GBRG" | "SGBRG8" => Some(Self::BayerGbrg),
            "MJPG" | "JPEG" | "MJPEG" => Some(Self::Mjpeg),
            _ => None,
        }
    }

    /// Canonical FourCC code
    pub fn fourcc(&self) -> &'static str {
        match self {
            Self::Rgb24 => "RGB3",
            Self::Bgr24 => "BGR3",
            Self::Rgba => "RGBA",
            Self::Bgra => "BGRA",
            Self::Argb => "ARGB",
            Self::Abgr => "ABGR",
            Self::Gray8 => "GREY",
            Self::Yuyv => "YUYV",
            Self::Uyvy => "UYVY",
            Self::I420 => "I420",
            Self::Nv12 => "NV12",
            Self::Nv21 => "NV21",
            Self::P010 => "P010",
            Self::I010 => "I010",
            Self::BayerRggb => "RGGB",
            Self::BayerBggr => "BGGR",
            Self::BayerGrbg => "GRBG",
            Self::BayerGbrg => "GBRG",
            Self::Mjpeg => "MJPG",
        }
    }

    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            Self::Yuyv | Self::Uyvy | Self::I420 | Self::Nv12 | Self::Nv21 | Self::P010 | Self::I010
        )
    }

    pub fn is_bayer(&self) -> bool {
        matches!(
            self,
            Self::BayerRggb | Self::BayerBggr | Self::BayerGrbg | Self::BayerGbrg
        )
    }

    /// Check if samples are stored in 16-bit containers
    pub fn is_ten_bit(&self) -> bool {
        matches!(self, Self::P010 | Self::I010)
    }

    /// Compressed formats have no fixed plane layout
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Mjpeg)
    }

    /// Number of planes in a CPU buffer of this format
    pub fn plane_count(&self) -> usize {
        match self {
            Self::I420 | Self::I010 => 3,
            Self::Nv12 | Self::Nv21 | Self::P010 => 2,
            _ => 1,
        }
    }

    /// Tightly packed plane layout for a frame of the given size
    ///
    /// Returns `None` for compressed formats, whose size depends on content.
    pub fn plane_layouts(&self, width: u32, height: u32) -> Option<Vec<PlaneLayout>> {
        let full = |stride: u32| PlaneLayout {
            stride,
            rows: height,
        };
        let chroma = |stride: u32| PlaneLayout {
            stride,
            rows: half(height),
        };

        let layouts = match self {
            Self::Rgb24 | Self::Bgr24 => vec![full(width * 3)],
            Self::Rgba | Self::Bgra | Self::Argb | Self::Abgr => vec![full(width * 4)],
            Self::Gray8 => vec![full(width)],
            Self::BayerRggb | Self::BayerBggr | Self::BayerGrbg | Self::BayerGbrg => {
                vec![full(width)]
            }
            // Two pixels share one U and one V sample
            Self::Yuyv | Self::Uyvy => vec![full(half(width) * 4)],
            Self::I420 => vec![full(width), chroma(half(width)), chroma(half(width))],
            Self::Nv12 | Self::Nv21 => vec![full(width), chroma(half(width) * 2)],
            Self::P010 => vec![full(width * 2), chroma(half(width) * 4)],
            Self::I010 => vec![
                full(width * 2),
                chroma(half(width) * 2),
                chroma(half(width) * 2),
            ],
            Self::Mjpeg => return None,
        };
        Some(layouts)
    }

    /// Total bytes of a tightly packed frame, `None` for compressed formats
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        self.plane_layouts(width, height)
            .map(|planes| planes.iter().map(PlaneLayout::size).sum())
    }

    /// Estimated bits per pixel for bandwidth calculation
    pub fn bits_per_pixel(&self) -> f64 {
        match self {
            Self::Rgb24 | Self::Bgr24 => 24.0,
            Self::Rgba | Self::Bgra | Self::Argb | Self::Abgr => 32.0,
            Self::Gray8 => 8.0,
            Self::BayerRggb | Self::BayerBggr | Self::BayerGrbg | Self::BayerGbrg => 8.0,
            Self::Yuyv | Self::Uyvy => 16.0,
            Self::I420 | Self::Nv12 | Self::Nv21 => 12.0,
            Self::P010 | Self::I010 => 24.0,
            // MJPEG typically 2-8 bpp
            Self::Mjpeg => 4.0,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fourcc())
    }
}
