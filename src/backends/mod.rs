// SPDX-License-Identifier: MPL-2.0

//! Backend Capability Interface
//!
//! Everything platform-specific sits behind the [`Backend`] trait. A capture
//! context owns exactly one backend instance and drives it through
//! enumerate → probe → open → start → stop → close.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   CaptureContext     │  ← State machine, one per domain instance
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │    Backend Trait     │  ← Common interface
//! └──────────┬───────────┘
//!            │
//!      ┌─────┴──────┬───────────────┐
//!      ▼            ▼               ▼
//! ┌─────────┐ ┌──────────┐ ┌────────────────┐
//! │Synthetic│ │ Platform │ │ Test doubles   │
//! └─────────┘ └──────────┘ └────────────────┘
//! ```
//!
//! Backends push frames into a [`RawFrameSink`] from their own producer
//! thread. They never see the public buffer type: the capture dispatcher
//! wraps each [`RawFrame`] before the consumer gets it.
//!
//! # Modules
//!
//! - [`frame_loop`]: Producer thread lifecycle and live-thread gauge
//! - [`negotiate`]: Nearest-format selection
//! - [`synthetic`]: Test-pattern / tone backend for every domain
//! - [`types`]: Shared descriptor, handle, frame and error types

pub mod frame_loop;
pub mod negotiate;
pub mod synthetic;
pub mod types;

pub use frame_loop::{CaptureLoopController, LoopAction, live_producer_threads};
pub use negotiate::{nearest_format, same_capability};
pub use types::*;

use crate::media::formats::Format;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Capability contract every capture backend implements
///
/// Calls arrive from the owning context's thread. The only thing a backend
/// may do from another thread is invoke the sink it was given in `start`.
pub trait Backend: Send {
    /// Short identifier used in logs and as GPU handle owner
    fn name(&self) -> &str;

    /// Domain this instance captures
    fn domain(&self) -> CaptureDomain;

    // ===== Enumeration =====

    /// List the devices currently available
    fn enumerate(&self) -> BackendResult<Vec<DeviceInfo>>;

    /// Formats a device can deliver, most preferred first
    fn probe_formats(&self, device_id: &str) -> BackendResult<Vec<Format>>;

    /// Format used when the caller has no preference
    ///
    /// Defaults to the first probed format.
    fn default_format(&self, device_id: &str) -> BackendResult<Format> {
        self.probe_formats(device_id)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                BackendError::FormatNotSupported(format!("device {} reports no formats", device_id))
            })
    }

    // ===== Streaming =====

    /// Open a stream on `device_id`
    ///
    /// The returned negotiated format is what buffers will carry; it may
    /// refine the request (for example by filling the audio frame count).
    fn open(&mut self, device_id: &str, format: &Format) -> BackendResult<OpenedStream>;

    /// Begin producing frames into `sink`
    fn start(&mut self, handle: StreamHandle, sink: RawFrameSink) -> BackendResult<()>;

    /// Stop producing frames
    ///
    /// Must not return before the backend's producer thread has stopped
    /// calling the sink.
    fn stop(&mut self, handle: StreamHandle) -> BackendResult<()>;

    /// Release the stream and everything allocated for it
    fn close(&mut self, handle: StreamHandle) -> BackendResult<()>;
}

/// Constructor for fresh backend instances
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// Per-domain backend factories
///
/// Each context gets its own backend instance from the factory registered for
/// its domain.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<CaptureDomain, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the synthetic backend registered for every domain
    pub fn synthetic(config: synthetic::SyntheticConfig) -> Self {
        let probe = synthetic::SyntheticProbe::default();
        Self::synthetic_with_probe(config, probe)
    }

    /// Like [`synthetic`](Self::synthetic), reporting into a shared probe
    pub fn synthetic_with_probe(
        config: synthetic::SyntheticConfig,
        probe: synthetic::SyntheticProbe,
    ) -> Self {
        let mut registry = Self::new();
        for domain in CaptureDomain::ALL {
            let config = config.clone();
            let probe = probe.clone();
            registry.register(domain, move || {
                Box::new(synthetic::SyntheticBackend::with_probe(
                    domain,
                    config.clone(),
                    probe.clone(),
                ))
            });
        }
        registry
    }

    /// Register (or replace) the factory for `domain`
    pub fn register<F>(&mut self, domain: CaptureDomain, factory: F)
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        debug!(domain = %domain, "Registering backend factory");
        self.factories.insert(domain, Arc::new(factory));
    }

    pub fn contains(&self, domain: CaptureDomain) -> bool {
        self.factories.contains_key(&domain)
    }

    /// Domains with a registered backend
    pub fn domains(&self) -> Vec<CaptureDomain> {
        self.factories.keys().copied().collect()
    }

    /// Create a new backend instance for `domain`
    pub fn create(&self, domain: CaptureDomain) -> Option<Box<dyn Backend>> {
        self.factories.get(&domain).map(|factory| factory())
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}
