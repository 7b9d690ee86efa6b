// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion to RGB
//!
//! Used for snapshots of captured frames. Works on any CPU-resident frame
//! copy; every raw pixel format is converted with BT.601 coefficients and
//! MJPEG frames are decoded with the `image` crate.

use super::buffer::{OwnedBuffer, Payload, VideoPayload};
use super::formats::PixelFormat;
use image::RgbImage;

/// YUV to RGB conversion (BT.601, full range)
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        (y + 1.402 * v).clamp(0.0, 255.0) as u8,
        (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
        (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ]
}

/// 10-bit sample stored in a little-endian word, reduced to 8 bits
#[inline]
fn ten_bit_at(plane: &[u8], offset: usize, shift: u32) -> u8 {
    let word = u16::from_le_bytes([plane[offset], plane[offset + 1]]);
    ((word >> shift) >> 2) as u8
}

/// Convert a copied video frame to an RGB image
pub fn to_rgb_image(frame: &OwnedBuffer) -> Result<RgbImage, String> {
    let video = match &frame.payload {
        Payload::Video(video) => video,
        Payload::Audio(_) => return Err("audio buffers have no image".to_string()),
    };

    if video.pixel_format == PixelFormat::Mjpeg {
        let data = frame.plane_data(0).ok_or("missing MJPEG payload")?;
        return image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map(|image| image.to_rgb8())
            .map_err(|e| format!("MJPEG decode failed: {}", e));
    }

    let planes: Vec<(&[u8], usize)> = (0..video.planes.len())
        .map(|index| {
            frame
                .plane_data(index)
                .map(|data| (data, video.planes[index].stride as usize))
                .ok_or_else(|| format!("plane {} is missing", index))
        })
        .collect::<Result<_, _>>()?;

    let expected = video.pixel_format.plane_count();
    if planes.len() != expected {
        return Err(format!(
            "{} needs {} planes, frame has {}",
            video.pixel_format,
            expected,
            planes.len()
        ));
    }

    let mut rgb = Vec::with_capacity(video.width as usize * video.height as usize * 3);
    for y in 0..video.height as usize {
        for x in 0..video.width as usize {
            rgb.extend_from_slice(&pixel(video, &planes, x, y));
        }
    }

    RgbImage::from_raw(video.width, video.height, rgb)
        .ok_or_else(|| "failed to create RGB image".to_string())
}

fn pixel(video: &VideoPayload, planes: &[(&[u8], usize)], x: usize, y: usize) -> [u8; 3] {
    let (p0, s0) = planes[0];
    match video.pixel_format {
        PixelFormat::Rgb24 => {
            let i = y * s0 + x * 3;
            [p0[i], p0[i + 1], p0[i + 2]]
        }
        PixelFormat::Bgr24 => {
            let i = y * s0 + x * 3;
            [p0[i + 2], p0[i + 1], p0[i]]
        }
        PixelFormat::Rgba => {
            let i = y * s0 + x * 4;
            [p0[i], p0[i + 1], p0[i + 2]]
        }
        PixelFormat::Bgra => {
            let i = y * s0 + x * 4;
            [p0[i + 2], p0[i + 1], p0[i]]
        }
        PixelFormat::Argb => {
            let i = y * s0 + x * 4;
            [p0[i + 1], p0[i + 2], p0[i + 3]]
        }
        PixelFormat::Abgr => {
            let i = y * s0 + x * 4;
            [p0[i + 3], p0[i + 2], p0[i + 1]]
        }
        PixelFormat::Gray8 => {
            let v = p0[y * s0 + x];
            [v, v, v]
        }
        // YUYV: Y0 U Y1 V, UYVY: U Y0 V Y1 - each 4-byte group encodes 2 pixels
        PixelFormat::Yuyv => {
            let i = y * s0 + (x / 2) * 4;
            let luma = if x % 2 == 0 { p0[i] } else { p0[i + 2] };
            yuv_to_rgb(luma, p0[i + 1], p0[i + 3])
        }
        PixelFormat::Uyvy => {
            let i = y * s0 + (x / 2) * 4;
            let luma = if x % 2 == 0 { p0[i + 1] } else { p0[i + 3] };
            yuv_to_rgb(luma, p0[i], p0[i + 2])
        }
        PixelFormat::I420 => {
            let (pu, su) = planes[1];
            let (pv, sv) = planes[2];
            yuv_to_rgb(
                p0[y * s0 + x],
                pu[(y / 2) * su + x / 2],
                pv[(y / 2) * sv + x / 2],
            )
        }
        PixelFormat::Nv12 | PixelFormat::Nv21 => {
            let (puv, suv) = planes[1];
            let i = (y / 2) * suv + (x / 2) * 2;
            let (u, v) = if video.pixel_format == PixelFormat::Nv12 {
                (puv[i], puv[i + 1])
            } else {
                (puv[i + 1], puv[i])
            };
            yuv_to_rgb(p0[y * s0 + x], u, v)
        }
        PixelFormat::P010 => {
            let (puv, suv) = planes[1];
            let i = (y / 2) * suv + (x / 2) * 4;
            yuv_to_rgb(
                ten_bit_at(p0, y * s0 + x * 2, 6),
                ten_bit_at(puv, i, 6),
                ten_bit_at(puv, i + 2, 6),
            )
        }
        PixelFormat::I010 => {
            let (pu, su) = planes[1];
            let (pv, sv) = planes[2];
            yuv_to_rgb(
                ten_bit_at(p0, y * s0 + x * 2, 0),
                ten_bit_at(pu, (y / 2) * su + (x / 2) * 2, 0),
                ten_bit_at(pv, (y / 2) * sv + (x / 2) * 2, 0),
            )
        }
        // Nearest-neighbor demosaic: every pixel of a 2x2 cell gets the
        // cell's colour
        PixelFormat::BayerRggb | PixelFormat::BayerBggr | PixelFormat::BayerGrbg
        | PixelFormat::BayerGbrg => {
            let cx = (x & !1).min((video.width as usize).saturating_sub(2));
            let cy = (y & !1).min((video.height as usize).saturating_sub(2));
            let at = |dx: usize, dy: usize| p0[(cy + dy) * s0 + cx + dx] as u16;
            let (r, g0, g1, b) = match video.pixel_format {
                PixelFormat::BayerRggb => (at(0, 0), at(1, 0), at(0, 1), at(1, 1)),
                PixelFormat::BayerBggr => (at(1, 1), at(1, 0), at(0, 1), at(0, 0)),
                PixelFormat::BayerGrbg => (at(1, 0), at(0, 0), at(1, 1), at(0, 1)),
                _ => (at(0, 1), at(0, 0), at(1, 1), at(1, 0)),
            };
            [r as u8, ((g0 + g1) / 2) as u8, b as u8]
        }
        PixelFormat::Mjpeg => [0, 0, 0],
    }
}
