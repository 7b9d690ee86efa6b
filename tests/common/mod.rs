// SPDX-License-Identifier: MPL-2.0

//! Scripted backend shared by the integration tests
//!
//! Each instance reports one device (`mock-0`) and a short fixed format list.
//! Failures and delays are injected through [`Script`]; every call is counted
//! in [`Calls`].

#![allow(dead_code)]

use media_capture::backends::{
    Backend, BackendError, BackendRegistry, BackendResult, CaptureDomain, CaptureLoopController,
    DeliveryStatus, DeviceInfo, LoopAction, OpenedStream, RawFrame, RawFrameSink, RawPayload,
    RawStorage, StreamHandle,
};
use media_capture::media::{AudioFormat, Format, Framerate, PixelFormat, SampleFormat, VideoFormat};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const DEVICE_ID: &str = "mock-0";

/// Failure and delay injection
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_enumerate: Option<BackendError>,
    pub fail_open: Option<BackendError>,
    pub fail_start: Option<BackendError>,
    pub fail_stop: Option<BackendError>,
    pub open_delay: Duration,
    pub start_delay: Duration,
    /// Producer sleep between frames (1ms when zero)
    pub frame_interval: Duration,
}

/// Call counters shared between a test and the backends it creates
#[derive(Debug, Default)]
pub struct Calls {
    pub opens: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub closes: AtomicUsize,
    /// Producer threads currently running
    pub live_threads: AtomicUsize,
    /// Frames the producer pushed into the sink
    pub frames: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct LiveThread(Arc<Calls>);

impl LiveThread {
    fn enter(calls: Arc<Calls>) -> Self {
        calls.live_threads.fetch_add(1, Ordering::SeqCst);
        Self(calls)
    }
}

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.live_threads.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Stream {
    handle: StreamHandle,
    format: Format,
    producer: Option<CaptureLoopController>,
}

pub struct ScriptedBackend {
    domain: CaptureDomain,
    script: Script,
    calls: Arc<Calls>,
    next_handle: u64,
    streams: Vec<Stream>,
}

impl ScriptedBackend {
    pub fn new(domain: CaptureDomain, script: Script, calls: Arc<Calls>) -> Self {
        Self {
            domain,
            script,
            calls,
            next_handle: 1,
            streams: Vec::new(),
        }
    }

    fn stream_mut(&mut self, handle: StreamHandle) -> BackendResult<&mut Stream> {
        self.streams
            .iter_mut()
            .find(|s| s.handle == handle)
            .ok_or(BackendError::InvalidHandle(handle))
    }
}

/// Formats reported for `domain`, most preferred first
pub fn formats(domain: CaptureDomain) -> Vec<Format> {
    match domain {
        CaptureDomain::Camera | CaptureDomain::Screen => vec![
            Format::Video(VideoFormat::new(
                64,
                48,
                PixelFormat::Rgba,
                Framerate::from_int(30),
            )),
            Format::Video(VideoFormat::new(
                32,
                24,
                PixelFormat::Rgba,
                Framerate::from_int(60),
            )),
        ],
        CaptureDomain::AudioInput | CaptureDomain::LoopbackAudio => vec![Format::Audio(
            AudioFormat::new(SampleFormat::F32, 48_000, 2),
        )],
    }
}

fn raw_payload(format: &Format) -> (RawPayload, usize) {
    match format {
        Format::Video(video) => (
            RawPayload::Video {
                width: video.width,
                height: video.height,
                pixel_format: video.pixel_format,
                planes: None,
            },
            video.width as usize * video.height as usize * 4,
        ),
        Format::Audio(audio) => {
            let frame_count = audio.frame_count.unwrap_or(480);
            (
                RawPayload::Audio {
                    frame_count,
                    format: audio.clone(),
                },
                frame_count as usize * audio.bytes_per_frame(),
            )
        }
    }
}

impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn domain(&self) -> CaptureDomain {
        self.domain
    }

    fn enumerate(&self) -> BackendResult<Vec<DeviceInfo>> {
        if let Some(e) = &self.script.fail_enumerate {
            return Err(e.clone());
        }
        Ok(vec![DeviceInfo {
            id: DEVICE_ID.to_string(),
            name: "Scripted device".to_string(),
            is_default: true,
        }])
    }

    fn probe_formats(&self, device_id: &str) -> BackendResult<Vec<Format>> {
        if device_id != DEVICE_ID {
            return Err(BackendError::DeviceNotFound(device_id.to_string()));
        }
        Ok(formats(self.domain))
    }

    fn open(&mut self, device_id: &str, format: &Format) -> BackendResult<OpenedStream> {
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.script.open_delay);
        if let Some(e) = &self.script.fail_open {
            return Err(e.clone());
        }
        if device_id != DEVICE_ID {
            return Err(BackendError::DeviceNotFound(device_id.to_string()));
        }

        let mut negotiated = format.clone();
        if let Format::Audio(audio) = &mut negotiated {
            audio.frame_count = Some(audio.sample_rate / 100);
        }

        let handle = StreamHandle(self.next_handle);
        self.next_handle += 1;
        self.streams.push(Stream {
            handle,
            format: negotiated.clone(),
            producer: None,
        });
        Ok(OpenedStream { handle, negotiated })
    }

    fn start(&mut self, handle: StreamHandle, sink: RawFrameSink) -> BackendResult<()> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.script.start_delay);
        if let Some(e) = &self.script.fail_start {
            return Err(e.clone());
        }

        let interval = self.script.frame_interval.max(Duration::from_millis(1));
        let calls = Arc::clone(&self.calls);
        let stream = self.stream_mut(handle)?;
        if stream.producer.is_some() {
            return Err(BackendError::Other(format!("stream {} already started", handle)));
        }

        let (payload, len) = raw_payload(&stream.format);
        let name = format!("scripted-{}", handle);
        stream.producer = Some(CaptureLoopController::start_with_init(
            &name,
            move || Ok((LiveThread::enter(Arc::clone(&calls)), vec![0x80u8; len])),
            move |(live, data): &mut (LiveThread, Vec<u8>)| {
                std::thread::sleep(interval);
                let status = sink(RawFrame {
                    timestamp_us: None,
                    payload: payload.clone(),
                    storage: RawStorage::Transient(data.as_slice()),
                });
                live.0.frames.fetch_add(1, Ordering::SeqCst);
                match status {
                    DeliveryStatus::Closed => LoopAction::Stop,
                    _ => LoopAction::Continue,
                }
            },
        ));
        Ok(())
    }

    fn stop(&mut self, handle: StreamHandle) -> BackendResult<()> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        let stream = self.stream_mut(handle)?;
        if let Some(mut producer) = stream.producer.take() {
            producer.stop();
        }
        match &self.script.fail_stop {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn close(&mut self, handle: StreamHandle) -> BackendResult<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        let index = self
            .streams
            .iter()
            .position(|s| s.handle == handle)
            .ok_or(BackendError::InvalidHandle(handle))?;
        let mut stream = self.streams.remove(index);
        if let Some(mut producer) = stream.producer.take() {
            producer.stop();
        }
        Ok(())
    }
}

/// A registry with the scripted backend for every domain
pub fn registry(script: Script) -> (BackendRegistry, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let mut registry = BackendRegistry::new();
    for domain in CaptureDomain::ALL {
        let script = script.clone();
        let calls = Arc::clone(&calls);
        registry.register(domain, move || {
            Box::new(ScriptedBackend::new(domain, script.clone(), Arc::clone(&calls)))
        });
    }
    (registry, calls)
}
