// SPDX-License-Identifier: GPL-3.0-only

//! Format negotiation
//!
//! Picks the supported format closest to a request. Exact matches win; after
//! that, video prefers the closest resolution, then the closest framerate,
//! then the same pixel format. Audio prefers the closest sample rate, then
//! channel count, then sample format. Ties keep the backend's preference
//! order (earlier entries win).
//!
//! The video output preference is a delivery hint, not a device capability:
//! the chosen entry keeps the requester's preference.

use crate::media::formats::{AudioFormat, Format, VideoFormat};
use tracing::debug;

/// Compare two formats ignoring delivery hints
///
/// Video formats differ only in output preference and audio formats only in
/// the output-only `frame_count` are considered the same capability.
pub fn same_capability(a: &Format, b: &Format) -> bool {
    match (a, b) {
        (Format::Video(a), Format::Video(b)) => {
            a.width == b.width
                && a.height == b.height
                && a.pixel_format == b.pixel_format
                && a.framerate.distance(&b.framerate) == 0
        }
        (Format::Audio(a), Format::Audio(b)) => {
            a.sample_format == b.sample_format
                && a.sample_rate == b.sample_rate
                && a.channels == b.channels
        }
        _ => false,
    }
}

/// Select the supported format nearest to `requested`
///
/// Returns `None` when `supported` holds no format of the requested kind.
pub fn nearest_format(requested: &Format, supported: &[Format]) -> Option<Format> {
    let chosen = match requested {
        Format::Video(req) => supported
            .iter()
            .filter_map(Format::as_video)
            .min_by_key(|candidate| video_distance(req, candidate))
            .map(|candidate| Format::Video(candidate.clone().with_output(req.output))),
        Format::Audio(req) => supported
            .iter()
            .filter_map(Format::as_audio)
            .min_by_key(|candidate| audio_distance(req, candidate))
            .map(|candidate| {
                Format::Audio(AudioFormat {
                    frame_count: None,
                    ..candidate.clone()
                })
            }),
    }?;

    if !same_capability(requested, &chosen) {
        debug!(requested = %requested, chosen = %chosen, "Snapped to nearest supported format");
    }
    Some(chosen)
}

fn video_distance(req: &VideoFormat, candidate: &VideoFormat) -> (u64, u64, bool) {
    let resolution = req.width.abs_diff(candidate.width) as u64
        + req.height.abs_diff(candidate.height) as u64;
    let framerate = req.framerate.distance(&candidate.framerate);
    (resolution, framerate, req.pixel_format != candidate.pixel_format)
}

fn audio_distance(req: &AudioFormat, candidate: &AudioFormat) -> (u32, u16, bool) {
    (
        req.sample_rate.abs_diff(candidate.sample_rate),
        req.channels.abs_diff(candidate.channels),
        req.sample_format != candidate.sample_format,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::formats::{Framerate, OutputPreference, PixelFormat, SampleFormat};

    fn video(width: u32, height: u32, pixel_format: PixelFormat, fps: u32) -> Format {
        Format::Video(VideoFormat::new(
            width,
            height,
            pixel_format,
            Framerate::from_int(fps),
        ))
    }

    fn camera_formats() -> Vec<Format> {
        vec![
            video(1280, 720, PixelFormat::Nv12, 30),
            video(1920, 1080, PixelFormat::Yuyv, 30),
            video(640, 480, PixelFormat::Rgba, 60),
            video(640, 480, PixelFormat::Mjpeg, 30),
        ]
    }

    #[test]
    fn test_exact_match() {
        let supported = camera_formats();
        let chosen = nearest_format(&supported[1], &supported).unwrap();
        assert_eq!(chosen, supported[1]);
    }

    #[test]
    fn test_snaps_resolution_first() {
        let supported = camera_formats();
        let chosen = nearest_format(&video(1900, 1000, PixelFormat::Nv12, 60), &supported).unwrap();
        assert!(same_capability(&chosen, &supported[1]));
    }

    #[test]
    fn test_framerate_breaks_resolution_tie() {
        let supported = camera_formats();
        let chosen = nearest_format(&video(640, 480, PixelFormat::Nv12, 25), &supported).unwrap();
        assert!(same_capability(&chosen, &supported[3]));
    }

    #[test]
    fn test_keeps_output_preference() {
        let supported = camera_formats();
        let request = Format::Video(
            VideoFormat::new(1280, 720, PixelFormat::Nv12, Framerate::from_int(30))
                .with_output(OutputPreference::GpuPreferred),
        );
        let chosen = nearest_format(&request, &supported).unwrap();
        assert_eq!(chosen.as_video().unwrap().output, OutputPreference::GpuPreferred);
        assert!(supported.iter().any(|f| same_capability(f, &chosen)));
    }

    #[test]
    fn test_audio_prefers_sample_rate() {
        let supported = vec![
            Format::Audio(AudioFormat::new(SampleFormat::F32, 48_000, 2)),
            Format::Audio(AudioFormat::new(SampleFormat::I16, 44_100, 1)),
        ];
        let mut request = AudioFormat::new(SampleFormat::F32, 44_100, 2);
        request.frame_count = Some(512);
        let chosen = nearest_format(&Format::Audio(request), &supported).unwrap();
        assert_eq!(chosen, supported[1]);
    }

    #[test]
    fn test_kind_mismatch_has_no_match() {
        let supported = camera_formats();
        let request = Format::Audio(AudioFormat::new(SampleFormat::F32, 48_000, 2));
        assert!(nearest_format(&request, &supported).is_none());
    }
}
