// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing devices and their formats
//! - Running a capture session, optionally saving a snapshot
//! - Pairing camera and microphone buffers by timestamp

use chrono::Local;
use media_capture::capture::{copy_channel, half_frame_period_us};
use media_capture::media::convert;
use media_capture::{
    CaptureDomain, CaptureEngine, DeviceInfo, EngineConfig, Format, OwnedBuffer, Synchronizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;

/// Capacity of the copy channel between capture callback and CLI
const CHANNEL_CAPACITY: usize = 16;

fn engine(config: &EngineConfig) -> CaptureEngine {
    CaptureEngine::with_settings(config.backend_registry(), config.context_settings())
}

/// List devices of one domain, or of all domains
pub fn list_devices(
    config: &EngineConfig,
    domain: Option<CaptureDomain>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = engine(config);
    let domains = match domain {
        Some(domain) => vec![domain],
        None => CaptureDomain::ALL.to_vec(),
    };

    for domain in domains {
        println!("{}:", domain);
        let devices = engine.enumerate_devices(domain)?;
        if devices.is_empty() {
            println!("  (no devices)");
        }
        for device in &devices {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("  {}  {}{}", device.id, device.name, marker);
        }
        println!();
    }

    Ok(())
}

/// Print the formats a device supports
pub fn list_formats(
    config: &EngineConfig,
    domain: CaptureDomain,
    device: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = engine(config);
    let formats = engine.get_supported_formats(domain, device)?;
    let default = engine.get_default_format(domain, device)?;

    println!("Formats of {}:", device);
    for format in &formats {
        let marker = if *format == default { "  *" } else { "" };
        println!("  {}{}", format, marker);
    }

    Ok(())
}

fn pick_device(
    engine: &CaptureEngine,
    domain: CaptureDomain,
    requested: Option<String>,
) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
    let devices = engine.enumerate_devices(domain)?;
    let device = match requested {
        Some(id) => devices.into_iter().find(|device| device.id == id),
        None => {
            let default = devices.iter().position(|device| device.is_default);
            devices.into_iter().nth(default.unwrap_or(0))
        }
    };
    device.ok_or_else(|| format!("No {} device available", domain).into())
}

fn ctrlc_flag() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;
    Ok(stop_flag)
}

/// Drain everything currently queued in `receiver`
fn drain(receiver: &mut Receiver<OwnedBuffer>) -> Vec<OwnedBuffer> {
    let mut buffers = Vec::new();
    while let Ok(buffer) = receiver.try_recv() {
        buffers.push(buffer);
    }
    buffers
}

/// Capture from one device for `duration` seconds
pub fn capture(
    config: &EngineConfig,
    domain: CaptureDomain,
    device: Option<String>,
    duration: u64,
    snapshot: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = engine(config);
    let device = pick_device(&engine, domain, device)?;
    let format = engine.get_default_format(domain, &device.id)?;
    println!("Using device: {}", device);

    let mut context = engine.create_context(domain)?;
    context.configure(&device.id, &format)?;
    println!("Format: {}", context.get_configured_format()?);

    let (callback, mut receiver, channel_stats) = copy_channel(CHANNEL_CAPACITY);
    let stop_flag = ctrlc_flag()?;

    println!();
    println!("Capturing... (press Ctrl+C to stop early)");
    context.start_capture(callback)?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);
    let mut received = 0u64;
    let mut bytes = 0usize;
    let mut last: Option<OwnedBuffer> = None;

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        for buffer in drain(&mut receiver) {
            received += 1;
            bytes += buffer.byte_size();
            last = Some(buffer);
        }

        let elapsed = start.elapsed().as_secs();
        print!(
            "\rCapturing: {:02}:{:02}  buffers: {}",
            elapsed / 60,
            elapsed % 60,
            received
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    context.stop_capture()?;
    for buffer in drain(&mut receiver) {
        received += 1;
        bytes += buffer.byte_size();
        last = Some(buffer);
    }

    let stats = context.stats();
    println!("Buffers received: {} ({} bytes)", received, bytes);
    println!(
        "Delivered: {}  dropped: {}  zero-copy: {}  copied: {}",
        stats.delivered, stats.dropped, stats.zero_copy, stats.copied
    );
    if channel_stats.dropped_full() > 0 {
        println!("Dropped by slow reader: {}", channel_stats.dropped_full());
    }

    if let Some(path) = snapshot {
        let frame = last.ok_or("No frame captured for snapshot")?;
        let output = save_snapshot(&frame, &path)?;
        println!("Snapshot saved: {}", output.display());
    }

    context.destroy()?;
    Ok(())
}

/// Write `frame` as an image; a directory gets a timestamped file name
fn save_snapshot(frame: &OwnedBuffer, path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let output = if path.is_dir() {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        path.join(format!("snapshot_{}.png", timestamp))
    } else {
        path.to_path_buf()
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let image = convert::to_rgb_image(frame)?;
    image.save(&output)?;
    Ok(output)
}

/// Capture camera and microphone together and pair their buffers
pub fn sync(config: &EngineConfig, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    let engine = engine(config);
    let camera = pick_device(&engine, CaptureDomain::Camera, None)?;
    let microphone = pick_device(&engine, CaptureDomain::AudioInput, None)?;

    let video_format = engine.get_default_format(CaptureDomain::Camera, &camera.id)?;
    let audio_format = engine.get_default_format(CaptureDomain::AudioInput, &microphone.id)?;

    let tolerance_us = match &video_format {
        Format::Video(video) => half_frame_period_us(video.framerate),
        Format::Audio(_) => config.sync_tolerance_us,
    };
    println!("Camera: {} ({})", camera, video_format);
    println!("Microphone: {} ({})", microphone, audio_format);
    println!("Tolerance: {}us", tolerance_us);

    let mut video = engine.create_context(CaptureDomain::Camera)?;
    let mut audio = engine.create_context(CaptureDomain::AudioInput)?;
    video.configure(&camera.id, &video_format)?;
    audio.configure(&microphone.id, &audio_format)?;

    let (video_callback, mut video_rx, _) = copy_channel(CHANNEL_CAPACITY);
    let (audio_callback, mut audio_rx, _) = copy_channel(CHANNEL_CAPACITY * 4);
    let stop_flag = ctrlc_flag()?;

    let mut synchronizer = Synchronizer::new(2, tolerance_us)?;
    video.start_capture(video_callback)?;
    audio.start_capture(audio_callback)?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);
    let mut max_skew_us = 0u64;

    while start.elapsed() < target_duration && !stop_flag.load(Ordering::SeqCst) {
        let mut arrivals: Vec<(usize, OwnedBuffer)> = drain(&mut video_rx)
            .into_iter()
            .map(|buffer| (0, buffer))
            .chain(drain(&mut audio_rx).into_iter().map(|buffer| (1, buffer)))
            .collect();
        arrivals.sort_by_key(|(_, buffer)| buffer.timestamp_us);

        for (stream, buffer) in arrivals {
            let outcome = synchronizer.push(stream, buffer)?;
            if let Some(set) = outcome.matched {
                let skew = set[0].timestamp_us.abs_diff(set[1].timestamp_us);
                max_skew_us = max_skew_us.max(skew);
            }
        }

        std::thread::sleep(Duration::from_millis(20));
    }

    video.stop_capture()?;
    audio.stop_capture()?;

    let stats = synchronizer.stats();
    println!();
    println!("Matched pairs: {}", stats.matched_sets);
    println!("Unmatched (evicted): {}", stats.evicted);
    println!("Max skew: {}us", max_skew_us);

    Ok(())
}
