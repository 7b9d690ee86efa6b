// SPDX-License-Identifier: MPL-2.0

//! Media capture engine
//!
//! Capture contexts for camera, screen, microphone and loopback audio with an
//! explicit buffer lifecycle: every buffer handed to a consumer is released
//! exactly once, either by [`Buffer::release`] or when it is dropped.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`media`]: Format descriptors, buffers and pools
//! - [`backends`]: Backend capability interface and the synthetic backend
//! - [`capture`]: Engine, context state machine, dispatcher and synchronizer
//! - [`logging`]: Process-wide log level and log callback
//! - [`config`]: Engine configuration
//!
//! # Example
//!
//! ```no_run
//! use media_capture::{CaptureDomain, CaptureEngine, EngineConfig};
//!
//! let config = EngineConfig::default();
//! let engine = CaptureEngine::with_settings(config.backend_registry(), config.context_settings());
//! let devices = engine.enumerate_devices(CaptureDomain::Camera)?;
//! let device = &devices[0];
//! let format = engine.get_default_format(CaptureDomain::Camera, &device.id)?;
//!
//! let mut context = engine.create_context(CaptureDomain::Camera)?;
//! context.configure(&device.id, &format)?;
//! context.start_capture(|buffer| {
//!     println!("frame {} at {}us", buffer.sequence(), buffer.timestamp_us());
//!     buffer.release();
//! })?;
//! context.stop_capture()?;
//! # Ok::<(), media_capture::CaptureError>(())
//! ```

pub mod backends;
pub mod capture;
pub mod config;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod media;

mod util;

// Re-export commonly used types
pub use backends::{Backend, BackendRegistry, CaptureDomain, DeviceInfo};
pub use capture::{CaptureContext, CaptureEngine, ContextSettings, ContextState, Synchronizer};
pub use config::EngineConfig;
pub use errors::{CaptureError, CaptureResult};
pub use media::{Buffer, Format, OwnedBuffer, release_buffer};
