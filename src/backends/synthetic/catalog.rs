// SPDX-License-Identifier: GPL-3.0-only

//! Devices and formats offered by the synthetic backend

use super::SyntheticConfig;
use crate::backends::types::{CaptureDomain, DeviceInfo};
use crate::media::formats::{AudioFormat, Format, Framerate, PixelFormat, SampleFormat, VideoFormat};

fn video(width: u32, height: u32, pixel_format: PixelFormat, fps: u32) -> Format {
    Format::Video(VideoFormat::new(
        width,
        height,
        pixel_format,
        Framerate::from_int(fps),
    ))
}

fn audio(sample_format: SampleFormat, sample_rate: u32, channels: u16) -> Format {
    Format::Audio(AudioFormat::new(sample_format, sample_rate, channels))
}

/// Device id prefix for a domain
fn id_prefix(domain: CaptureDomain) -> &'static str {
    match domain {
        CaptureDomain::Camera => "synthetic-camera",
        CaptureDomain::Screen => "synthetic-display",
        CaptureDomain::AudioInput => "synthetic-mic",
        CaptureDomain::LoopbackAudio => "synthetic-monitor",
    }
}

/// Devices for `domain`; the first one is the default
pub fn devices(domain: CaptureDomain, config: &SyntheticConfig) -> Vec<DeviceInfo> {
    let (count, label) = match domain {
        CaptureDomain::Camera => (config.camera_devices, "Synthetic Camera"),
        CaptureDomain::Screen => (1, "Synthetic Display"),
        CaptureDomain::AudioInput => (config.microphone_devices, "Synthetic Microphone"),
        CaptureDomain::LoopbackAudio => (1, "Synthetic Output Monitor"),
    };

    (0..count)
        .map(|index| DeviceInfo {
            id: format!("{}-{}", id_prefix(domain), index),
            name: format!("{} {}", label, index + 1),
            is_default: index == 0,
        })
        .collect()
}

/// Formats for `domain`, most preferred first
pub fn formats(domain: CaptureDomain) -> Vec<Format> {
    match domain {
        CaptureDomain::Camera => vec![
            video(1280, 720, PixelFormat::Nv12, 30),
            video(1920, 1080, PixelFormat::Yuyv, 30),
            video(640, 480, PixelFormat::Rgba, 60),
            video(640, 480, PixelFormat::Mjpeg, 30),
        ],
        CaptureDomain::Screen => vec![
            video(1920, 1080, PixelFormat::Bgra, 60),
            video(1280, 720, PixelFormat::Bgra, 60),
        ],
        CaptureDomain::AudioInput => vec![
            audio(SampleFormat::F32, 48_000, 2),
            audio(SampleFormat::I16, 44_100, 1),
        ],
        CaptureDomain::LoopbackAudio => vec![audio(SampleFormat::F32, 48_000, 2)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_device_is_default() {
        let config = SyntheticConfig::default();
        for domain in CaptureDomain::ALL {
            let devices = devices(domain, &config);
            assert!(!devices.is_empty());
            assert!(devices[0].is_default);
            assert!(devices[1..].iter().all(|d| !d.is_default));
        }
    }

    #[test]
    fn test_formats_match_domain_kind() {
        for domain in CaptureDomain::ALL {
            assert!(formats(domain).iter().all(|f| f.kind() == domain.media_kind()));
            assert!(formats(domain).iter().all(|f| f.validate().is_ok()));
        }
    }

    #[test]
    fn test_device_count_follows_config() {
        let config = SyntheticConfig {
            camera_devices: 3,
            ..Default::default()
        };
        assert_eq!(devices(CaptureDomain::Camera, &config).len(), 3);
        assert_eq!(devices(CaptureDomain::Screen, &config).len(), 1);
    }
}
