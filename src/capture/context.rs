// SPDX-License-Identifier: GPL-3.0-only

//! Capture context
//!
//! One context captures from one device of one domain. It owns its backend
//! instance exclusively and walks it through the lifecycle described by
//! [`ContextState`]. Control calls take `&mut self`, so a context is driven
//! from one thread at a time; buffers arrive on the backend's own thread.

use super::dispatcher::{BufferCallback, DispatchStats, Dispatcher};
use super::state::ContextState;
use crate::backends::{Backend, CaptureDomain, StreamHandle, nearest_format};
use crate::constants::{pool, timing};
use crate::errors::{CaptureError, CaptureResult};
use crate::media::buffer::Buffer;
use crate::media::formats::Format;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables applied to every context an engine creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSettings {
    /// Slots of the dispatcher's copy-on-wrap pool
    pub copy_pool_size: usize,
    /// Deadline for backend open + start
    ///
    /// Checked after each call returns: a backend call that blocks is not
    /// interrupted, so `start_capture` waits for it and then fails with
    /// `Timeout` once the deadline has passed.
    pub open_timeout: Duration,
    /// How long stop waits for a callback before warning
    pub stop_warn: Duration,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            copy_pool_size: pool::DEFAULT_COPY_SLOTS,
            open_timeout: Duration::from_millis(timing::DEFAULT_OPEN_TIMEOUT_MS),
            stop_warn: Duration::from_millis(timing::DEFAULT_STOP_WARN_MS),
        }
    }
}

/// A running capture session
struct Session {
    handle: StreamHandle,
    dispatcher: Dispatcher,
}

/// Capture state machine for one domain
pub struct CaptureContext {
    id: Uuid,
    domain: CaptureDomain,
    backend: Option<Box<dyn Backend>>,
    state: ContextState,
    settings: ContextSettings,
    device_id: Option<String>,
    format: Option<Format>,
    session: Option<Session>,
    last_stats: DispatchStats,
}

impl CaptureContext {
    /// Wrap a backend instance in a new context
    ///
    /// Usually called through [`CaptureEngine::create_context`](super::CaptureEngine::create_context).
    pub fn new(backend: Box<dyn Backend>, settings: ContextSettings) -> Self {
        let id = Uuid::new_v4();
        let domain = backend.domain();
        info!(context = %id, domain = %domain, backend = backend.name(), "Capture context created");
        Self {
            id,
            domain,
            backend: Some(backend),
            state: ContextState::Created,
            settings,
            device_id: None,
            format: None,
            session: None,
            last_stats: DispatchStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn domain(&self) -> CaptureDomain {
        self.domain
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Device chosen by the last successful `configure`
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Delivery counters of the running session, or of the last one
    pub fn stats(&self) -> DispatchStats {
        self.session
            .as_ref()
            .map(|s| s.dispatcher.stats())
            .unwrap_or(self.last_stats)
    }

    fn backend_mut(&mut self, operation: &'static str) -> CaptureResult<&mut Box<dyn Backend>> {
        let state = self.state;
        self.backend
            .as_mut()
            .ok_or(CaptureError::invalid_state(operation, state))
    }

    /// Select a device and negotiate a format
    ///
    /// The backend snaps the request to its nearest supported format; read the
    /// result back with [`get_configured_format`](Self::get_configured_format).
    /// On failure the context keeps its previous state and configuration.
    pub fn configure(&mut self, device_id: &str, format: &Format) -> CaptureResult<()> {
        if !self.state.can_configure() {
            return Err(CaptureError::invalid_state("configure", self.state));
        }

        if device_id.is_empty() {
            return Err(CaptureError::InvalidArg("empty device id".to_string()));
        }
        format.validate().map_err(CaptureError::InvalidArg)?;
        if format.kind() != self.domain.media_kind() {
            return Err(CaptureError::InvalidArg(format!(
                "{} format requested for {} domain",
                format.kind(),
                self.domain
            )));
        }

        let previous = self.state;
        self.state = ContextState::Configuring;
        let result = self.negotiate(device_id, format);
        match result {
            Ok(negotiated) => {
                info!(
                    context = %self.id,
                    device = %device_id,
                    requested = %format,
                    negotiated = %negotiated,
                    "Context configured"
                );
                self.device_id = Some(device_id.to_string());
                self.format = Some(negotiated);
                self.state = ContextState::Configured;
                Ok(())
            }
            Err(e) => {
                debug!(context = %self.id, error = %e, "Configure failed");
                self.state = previous;
                Err(e)
            }
        }
    }

    fn negotiate(&mut self, device_id: &str, format: &Format) -> CaptureResult<Format> {
        let backend = self.backend_mut("configure")?;

        let devices = backend.enumerate()?;
        if !devices.iter().any(|d| d.id == device_id) {
            return Err(CaptureError::DeviceNotFound(device_id.to_string()));
        }

        let supported = backend.probe_formats(device_id)?;
        if supported.is_empty() {
            return Err(CaptureError::NotSupported(format!(
                "device {} reports no formats",
                device_id
            )));
        }

        // Output-only field, never an input
        let mut request = format.clone();
        if let Format::Audio(audio) = &mut request {
            audio.frame_count = None;
        }

        nearest_format(&request, &supported).ok_or_else(|| {
            CaptureError::NotSupported(format!("no {} format on device {}", request.kind(), device_id))
        })
    }

    /// Format negotiated by the last successful `configure`
    ///
    /// Once capture has started this is the format the backend actually
    /// delivers (audio formats then carry the frame count).
    pub fn get_configured_format(&self) -> CaptureResult<Format> {
        if self.state.is_destroyed() {
            return Err(CaptureError::invalid_state(
                "get configured format",
                self.state,
            ));
        }
        self.format.clone().ok_or(CaptureError::NotConfigured)
    }

    /// Start delivering buffers to `callback`
    ///
    /// The callback runs on the backend's thread, once per buffer, never
    /// concurrently with `stop_capture` returning. It must not call back into
    /// this context.
    pub fn start_capture<F>(&mut self, callback: F) -> CaptureResult<()>
    where
        F: Fn(Buffer) + Send + Sync + 'static,
    {
        self.start_with_callback(Arc::new(callback))
    }

    /// Like [`start_capture`](Self::start_capture), passing `user_data` to every call
    pub fn start_capture_with<T, F>(&mut self, user_data: T, callback: F) -> CaptureResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&T, Buffer) + Send + Sync + 'static,
    {
        self.start_with_callback(Arc::new(move |buffer| callback(&user_data, buffer)))
    }

    fn start_with_callback(&mut self, callback: BufferCallback) -> CaptureResult<()> {
        match self.state {
            ContextState::Capturing => return Err(CaptureError::AlreadyCapturing),
            ContextState::Created => return Err(CaptureError::NotConfigured),
            state if state.can_start() => {}
            state => return Err(CaptureError::invalid_state("start capture", state)),
        }

        let (Some(device_id), Some(format)) = (self.device_id.clone(), self.format.clone()) else {
            return Err(CaptureError::NotConfigured);
        };
        let id = self.id;
        let domain = self.domain;
        let settings = self.settings.clone();
        let backend = self.backend_mut("start capture")?;

        let started = Instant::now();
        let opened = backend.open(&device_id, &format)?;
        let handle = opened.handle;

        if opened.negotiated.kind() != domain.media_kind() {
            close_quietly(backend.as_mut(), handle);
            return Err(CaptureError::BackendFailure {
                code: -1,
                message: format!("backend opened a {} stream", opened.negotiated.kind()),
            });
        }
        if started.elapsed() > settings.open_timeout {
            close_quietly(backend.as_mut(), handle);
            return Err(timeout_error("open", settings.open_timeout));
        }

        let dispatcher = Dispatcher::new(domain, callback, settings.copy_pool_size, settings.stop_warn);
        dispatcher.open();

        if let Err(e) = backend.start(handle, dispatcher.sink()) {
            dispatcher.close_and_wait();
            close_quietly(backend.as_mut(), handle);
            return Err(e.into());
        }
        if started.elapsed() > settings.open_timeout {
            dispatcher.close_and_wait();
            stop_quietly(backend.as_mut(), handle);
            close_quietly(backend.as_mut(), handle);
            return Err(timeout_error("start", settings.open_timeout));
        }

        info!(
            context = %id,
            device = %device_id,
            handle = %handle,
            format = %opened.negotiated,
            "Capture started"
        );
        self.format = Some(opened.negotiated);
        self.session = Some(Session { handle, dispatcher });
        self.state = ContextState::Capturing;
        Ok(())
    }

    /// Stop delivering buffers
    ///
    /// Blocks until no callback is running and the backend has stopped. The
    /// context is `Stopped` afterwards even when the backend reports an error;
    /// the first such error is returned.
    pub fn stop_capture(&mut self) -> CaptureResult<()> {
        if self.state != ContextState::Capturing {
            return Err(CaptureError::invalid_state("stop capture", self.state));
        }
        let result = self.teardown_session();
        self.state = ContextState::Stopped;
        result
    }

    fn teardown_session(&mut self) -> CaptureResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        session.dispatcher.close_and_wait();
        self.last_stats = session.dispatcher.stats();

        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };

        let mut first_error = None;
        if let Err(e) = backend.stop(session.handle) {
            warn!(context = %self.id, error = %e, "Backend stop failed");
            first_error = Some(e);
        }
        if let Err(e) = backend.close(session.handle) {
            warn!(context = %self.id, error = %e, "Backend close failed");
            first_error.get_or_insert(e);
        }

        info!(
            context = %self.id,
            delivered = self.last_stats.delivered,
            dropped = self.last_stats.dropped,
            "Capture stopped"
        );
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Tear the context down
    ///
    /// Stops a running capture, releases the backend and enters `Destroyed`.
    /// Always succeeds; further calls are no-ops.
    pub fn destroy(&mut self) -> CaptureResult<()> {
        if self.state.is_destroyed() {
            return Ok(());
        }

        if self.state == ContextState::Capturing
            && let Err(e) = self.teardown_session()
        {
            warn!(context = %self.id, error = %e, "Error while stopping capture during destroy");
        }
        self.backend = None;
        self.state = ContextState::Destroyed;
        info!(context = %self.id, domain = %self.domain, "Capture context destroyed");
        Ok(())
    }
}

impl Drop for CaptureContext {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}

impl fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureContext")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("state", &self.state)
            .field("device_id", &self.device_id)
            .field("format", &self.format)
            .finish()
    }
}

fn timeout_error(phase: &str, limit: Duration) -> CaptureError {
    CaptureError::Timeout(format!("backend {} took longer than {}ms", phase, limit.as_millis()))
}

fn stop_quietly(backend: &mut dyn Backend, handle: StreamHandle) {
    if let Err(e) = backend.stop(handle) {
        warn!(handle = %handle, error = %e, "Backend stop failed during rollback");
    }
}

fn close_quietly(backend: &mut dyn Backend, handle: StreamHandle) {
    if let Err(e) = backend.close(handle) {
        warn!(handle = %handle, error = %e, "Backend close failed during rollback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::synthetic::{SyntheticBackend, SyntheticConfig, SyntheticProbe};
    use crate::media::formats::{AudioFormat, Framerate, PixelFormat, SampleFormat, VideoFormat};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn camera_context(probe: &SyntheticProbe) -> CaptureContext {
        CaptureContext::new(
            Box::new(SyntheticBackend::with_probe(
                CaptureDomain::Camera,
                SyntheticConfig::default(),
                probe.clone(),
            )),
            ContextSettings::default(),
        )
    }

    fn hd() -> Format {
        Format::Video(VideoFormat::new(1280, 720, PixelFormat::Nv12, Framerate::from_int(30)))
    }

    #[test]
    fn test_start_before_configure() {
        let mut context = camera_context(&SyntheticProbe::default());
        assert_eq!(context.start_capture(|_| {}), Err(CaptureError::NotConfigured));
        assert_eq!(context.get_configured_format(), Err(CaptureError::NotConfigured));
        assert_eq!(context.state(), ContextState::Created);
    }

    #[test]
    fn test_configure_rejects_wrong_kind() {
        let mut context = camera_context(&SyntheticProbe::default());
        let audio = Format::Audio(AudioFormat::new(SampleFormat::F32, 48_000, 2));
        assert!(matches!(
            context.configure("synthetic-camera-0", &audio),
            Err(CaptureError::InvalidArg(_))
        ));
        assert_eq!(context.state(), ContextState::Created);
    }

    #[test]
    fn test_failed_reconfigure_keeps_previous_format() {
        let mut context = camera_context(&SyntheticProbe::default());
        context.configure("synthetic-camera-0", &hd()).unwrap();
        assert_eq!(
            context.configure("missing", &hd()),
            Err(CaptureError::DeviceNotFound("missing".to_string()))
        );
        assert_eq!(context.state(), ContextState::Configured);
        assert_eq!(context.get_configured_format(), Ok(hd()));
        assert_eq!(context.device_id(), Some("synthetic-camera-0"));
    }

    #[test]
    fn test_full_lifecycle() {
        let probe = SyntheticProbe::default();
        let mut context = camera_context(&probe);
        context.configure("synthetic-camera-1", &hd()).unwrap();

        let frames = Arc::new(AtomicU64::new(0));
        let frames_clone = Arc::clone(&frames);
        context
            .start_capture(move |buffer: Buffer| {
                frames_clone.fetch_add(1, Ordering::SeqCst);
                buffer.release();
            })
            .unwrap();
        assert_eq!(context.state(), ContextState::Capturing);
        assert_eq!(
            context.configure("synthetic-camera-1", &hd()),
            Err(CaptureError::invalid_state("configure", ContextState::Capturing))
        );

        std::thread::sleep(Duration::from_millis(150));
        context.stop_capture().unwrap();
        assert_eq!(context.state(), ContextState::Stopped);
        assert_eq!(probe.live_threads(), 0);

        let delivered = frames.load(Ordering::SeqCst);
        assert!(delivered > 0);
        assert_eq!(context.stats().delivered, delivered);
        assert_eq!(context.stats().released, delivered);

        // Restart from Stopped
        context.start_capture(|_| {}).unwrap();
        context.destroy().unwrap();
        assert_eq!(context.state(), ContextState::Destroyed);
        assert_eq!(probe.live_threads(), 0);
        assert_eq!(probe.open_streams(), 0);
    }

    #[test]
    fn test_user_data_reaches_callback() {
        let probe = SyntheticProbe::default();
        let mut context = CaptureContext::new(
            Box::new(SyntheticBackend::with_probe(
                CaptureDomain::AudioInput,
                SyntheticConfig::default(),
                probe,
            )),
            ContextSettings::default(),
        );
        context
            .configure(
                "synthetic-mic-0",
                &Format::Audio(AudioFormat::new(SampleFormat::F32, 48_000, 2)),
            )
            .unwrap();

        let total = Arc::new(AtomicU64::new(0));
        context
            .start_capture_with(Arc::clone(&total), |total: &Arc<AtomicU64>, buffer: Buffer| {
                total.fetch_add(buffer.audio().unwrap().frame_count as u64, Ordering::SeqCst);
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        context.stop_capture().unwrap();

        assert!(total.load(Ordering::SeqCst) >= 480);
        assert_eq!(
            context.get_configured_format().unwrap().as_audio().unwrap().frame_count,
            Some(480)
        );
    }

    #[test]
    fn test_destroyed_context_refuses_everything() {
        let mut context = camera_context(&SyntheticProbe::default());
        context.destroy().unwrap();
        context.destroy().unwrap();
        assert!(matches!(
            context.configure("synthetic-camera-0", &hd()),
            Err(CaptureError::InvalidState { .. })
        ));
        assert!(matches!(
            context.start_capture(|_| {}),
            Err(CaptureError::InvalidState { .. })
        ));
        assert!(matches!(
            context.stop_capture(),
            Err(CaptureError::InvalidState { .. })
        ));
        assert!(matches!(
            context.get_configured_format(),
            Err(CaptureError::InvalidState { .. })
        ));
    }
}
