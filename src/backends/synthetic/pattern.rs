// SPDX-License-Identifier: GPL-3.0-only

//! Test pattern and tone generators
//!
//! Video frames show eight colour bars scrolling to the left by a few pixels
//! per frame, so consecutive frames are distinguishable. Every row of a frame
//! is identical (apart from Bayer parity), which keeps rendering cheap at
//! 1080p: one row is built per plane and copied down.

use crate::media::formats::{AudioFormat, PixelFormat, PlaneLayout, SampleFormat, VideoFormat};
use std::f32::consts::TAU;

/// White, yellow, cyan, green, magenta, red, blue, black
const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Horizontal scroll per frame in pixels
const SCROLL_PX: u64 = 4;

/// RGB to YUV conversion (BT.601, full range)
#[inline]
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.169 * r - 0.331 * g + 0.500 * b + 128.0;
    let v = 0.500 * r - 0.419 * g - 0.081 * b + 128.0;
    (
        y.clamp(0.0, 255.0) as u8,
        u.clamp(0.0, 255.0) as u8,
        v.clamp(0.0, 255.0) as u8,
    )
}

/// 8-bit value widened to 10 bits
#[inline]
fn ten_bit(value: u8) -> u16 {
    ((value as u16) << 2) | ((value as u16) >> 6)
}

/// Colour of every column for `frame_index`
pub fn bar_row(width: u32, frame_index: u64) -> Vec<[u8; 3]> {
    let width = width.max(1) as u64;
    let offset = frame_index.wrapping_mul(SCROLL_PX) % width;
    (0..width)
        .map(|x| BARS[(((x + offset) % width) * BARS.len() as u64 / width) as usize])
        .collect()
}

/// Copy `row` into every row of a plane
fn fill_plane(plane: &mut [u8], layout: &PlaneLayout, row: &[u8]) {
    let stride = layout.stride as usize;
    let len = row.len().min(stride);
    for line in plane.chunks_exact_mut(stride).take(layout.rows as usize) {
        line[..len].copy_from_slice(&row[..len]);
    }
}

/// Split a tightly packed frame into its planes
fn split_planes<'a>(mut data: &'a mut [u8], layouts: &[PlaneLayout]) -> Vec<&'a mut [u8]> {
    let mut planes = Vec::with_capacity(layouts.len());
    for layout in layouts {
        let len = layout.size().min(data.len());
        let (plane, rest) = std::mem::take(&mut data).split_at_mut(len);
        planes.push(plane);
        data = rest;
    }
    planes
}

/// Render one frame of the bar pattern into `out`
///
/// `out` must hold a tightly packed frame of `format`. Returns `false` for
/// compressed formats (see [`render_jpeg`]) or a short buffer.
pub fn render_video(format: &VideoFormat, frame_index: u64, out: &mut [u8]) -> bool {
    let (width, height) = (format.width, format.height);
    let Some(layouts) = format.pixel_format.plane_layouts(width, height) else {
        return false;
    };
    if out.len() < layouts.iter().map(PlaneLayout::size).sum::<usize>() {
        return false;
    }

    let colours = bar_row(width, frame_index);
    let mut planes = split_planes(out, &layouts);

    match format.pixel_format {
        PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Rgba | PixelFormat::Bgra
        | PixelFormat::Argb | PixelFormat::Abgr => {
            let row: Vec<u8> = colours
                .iter()
                .flat_map(|&[r, g, b]| -> Vec<u8> {
                    match format.pixel_format {
                        PixelFormat::Rgb24 => vec![r, g, b],
                        PixelFormat::Bgr24 => vec![b, g, r],
                        PixelFormat::Rgba => vec![r, g, b, 255],
                        PixelFormat::Bgra => vec![b, g, r, 255],
                        PixelFormat::Argb => vec![255, r, g, b],
                        _ => vec![255, b, g, r],
                    }
                })
                .collect();
            fill_plane(planes[0], &layouts[0], &row);
        }
        PixelFormat::Gray8 => {
            let row: Vec<u8> = colours.iter().map(|&c| rgb_to_yuv(c).0).collect();
            fill_plane(planes[0], &layouts[0], &row);
        }
        PixelFormat::Yuyv | PixelFormat::Uyvy => {
            let mut row = Vec::with_capacity(layouts[0].stride as usize);
            for pair in colours.chunks(2) {
                let (y0, u, v) = rgb_to_yuv(pair[0]);
                let y1 = pair.get(1).map(|&c| rgb_to_yuv(c).0).unwrap_or(y0);
                if format.pixel_format == PixelFormat::Yuyv {
                    row.extend_from_slice(&[y0, u, y1, v]);
                } else {
                    row.extend_from_slice(&[u, y0, v, y1]);
                }
            }
            fill_plane(planes[0], &layouts[0], &row);
        }
        PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
            let luma: Vec<u8> = colours.iter().map(|&c| rgb_to_yuv(c).0).collect();
            let chroma: Vec<(u8, u8)> = colours
                .iter()
                .step_by(2)
                .map(|&c| {
                    let (_, u, v) = rgb_to_yuv(c);
                    (u, v)
                })
                .collect();
            fill_plane(planes[0], &layouts[0], &luma);

            match format.pixel_format {
                PixelFormat::I420 => {
                    let u: Vec<u8> = chroma.iter().map(|c| c.0).collect();
                    let v: Vec<u8> = chroma.iter().map(|c| c.1).collect();
                    fill_plane(planes[1], &layouts[1], &u);
                    fill_plane(planes[2], &layouts[2], &v);
                }
                PixelFormat::Nv12 => {
                    let uv: Vec<u8> = chroma.iter().flat_map(|&(u, v)| [u, v]).collect();
                    fill_plane(planes[1], &layouts[1], &uv);
                }
                _ => {
                    let vu: Vec<u8> = chroma.iter().flat_map(|&(u, v)| [v, u]).collect();
                    fill_plane(planes[1], &layouts[1], &vu);
                }
            }
        }
        PixelFormat::P010 | PixelFormat::I010 => {
            // P010 keeps the 10 significant bits at the top of each
            // little-endian word, I010 at the bottom
            let shift = if format.pixel_format == PixelFormat::P010 { 6 } else { 0 };
            let word = |value: u8| (ten_bit(value) << shift).to_le_bytes();

            let luma: Vec<u8> = colours.iter().flat_map(|&c| word(rgb_to_yuv(c).0)).collect();
            fill_plane(planes[0], &layouts[0], &luma);

            let chroma: Vec<(u8, u8)> = colours
                .iter()
                .step_by(2)
                .map(|&c| {
                    let (_, u, v) = rgb_to_yuv(c);
                    (u, v)
                })
                .collect();
            if format.pixel_format == PixelFormat::P010 {
                let uv: Vec<u8> = chroma
                    .iter()
                    .flat_map(|&(u, v)| {
                        let (u, v) = (word(u), word(v));
                        [u[0], u[1], v[0], v[1]]
                    })
                    .collect();
                fill_plane(planes[1], &layouts[1], &uv);
            } else {
                let u: Vec<u8> = chroma.iter().flat_map(|c| word(c.0)).collect();
                let v: Vec<u8> = chroma.iter().flat_map(|c| word(c.1)).collect();
                fill_plane(planes[1], &layouts[1], &u);
                fill_plane(planes[2], &layouts[2], &v);
            }
        }
        PixelFormat::BayerRggb | PixelFormat::BayerBggr | PixelFormat::BayerGrbg
        | PixelFormat::BayerGbrg => {
            // Channel index (0 = R, 1 = G, 2 = B) of the 2x2 cell positions
            let cell: [[usize; 2]; 2] = match format.pixel_format {
                PixelFormat::BayerRggb => [[0, 1], [1, 2]],
                PixelFormat::BayerBggr => [[2, 1], [1, 0]],
                PixelFormat::BayerGrbg => [[1, 0], [2, 1]],
                _ => [[1, 2], [0, 1]],
            };
            let rows: Vec<Vec<u8>> = cell
                .iter()
                .map(|pattern| {
                    colours
                        .iter()
                        .enumerate()
                        .map(|(x, c)| c[pattern[x % 2]])
                        .collect()
                })
                .collect();
            let stride = layouts[0].stride as usize;
            for (y, line) in planes[0].chunks_exact_mut(stride).enumerate() {
                let row = &rows[y % 2];
                let len = row.len().min(stride);
                line[..len].copy_from_slice(&row[..len]);
            }
        }
        PixelFormat::Mjpeg => return false,
    }

    true
}

/// Render the bar pattern as a JPEG image
pub fn render_jpeg(width: u32, height: u32, frame_index: u64, quality: u8) -> Result<Vec<u8>, String> {
    let format = VideoFormat::new(width, height, PixelFormat::Rgb24, Default::default());
    let mut rgb = vec![0u8; width as usize * height as usize * 3];
    if !render_video(&format, frame_index, &mut rgb) {
        return Err("failed to render RGB pattern".to_string());
    }

    let mut buffer = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode(&rgb, width, height, image::ExtendedColorType::Rgb8)
        .map_err(|e| format!("JPEG encoding failed: {}", e))?;
    Ok(buffer)
}

/// Sine tone generator producing interleaved frames
pub struct ToneGenerator {
    format: AudioFormat,
    frequency: f32,
    amplitude: f32,
    phase: f32,
}

impl ToneGenerator {
    pub fn new(format: AudioFormat, frequency: f32, amplitude: f32) -> Self {
        Self {
            format,
            frequency,
            amplitude,
            phase: 0.0,
        }
    }

    /// Fill `out` with `frame_count` interleaved frames
    ///
    /// `out` must hold at least `frame_count * bytes_per_frame` bytes.
    pub fn render(&mut self, frame_count: u32, out: &mut [u8]) {
        let channels = self.format.channels as usize;
        let step = TAU * self.frequency / self.format.sample_rate.max(1) as f32;
        let mut samples = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            samples.push(self.phase.sin() * self.amplitude);
            self.phase = (self.phase + step) % TAU;
        }

        let bytes = self.format.sample_format.bytes_per_sample();
        let frames = out.chunks_exact_mut(bytes * channels);
        for (frame, &sample) in frames.zip(&samples) {
            for slot in frame.chunks_exact_mut(bytes) {
                match self.format.sample_format {
                    SampleFormat::U8 => slot[0] = ((sample * 127.0) + 128.0) as u8,
                    SampleFormat::I16 => {
                        slot.copy_from_slice(&((sample * i16::MAX as f32) as i16).to_ne_bytes())
                    }
                    SampleFormat::I32 => {
                        slot.copy_from_slice(&((sample as f64 * i32::MAX as f64) as i32).to_ne_bytes())
                    }
                    SampleFormat::F32 => slot.copy_from_slice(bytemuck::bytes_of(&sample)),
                }
            }
        }
    }
}
