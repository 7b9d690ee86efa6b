// SPDX-License-Identifier: GPL-3.0-only

//! Capture engine facade
//!
//! Entry point for device discovery and context creation. Every query creates
//! a short-lived backend instance and asks it directly; nothing is cached, so
//! hot-plugged devices show up on the next call.

use super::context::{CaptureContext, ContextSettings};
use crate::backends::{Backend, BackendRegistry, CaptureDomain, DeviceInfo};
use crate::errors::{CaptureError, CaptureResult};
use crate::media::formats::Format;
use tracing::debug;

/// Device enumeration and context factory
#[derive(Debug, Clone)]
pub struct CaptureEngine {
    registry: BackendRegistry,
    settings: ContextSettings,
}

impl CaptureEngine {
    pub fn new(registry: BackendRegistry) -> Self {
        Self::with_settings(registry, ContextSettings::default())
    }

    pub fn with_settings(registry: BackendRegistry, settings: ContextSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    fn backend(&self, domain: CaptureDomain) -> CaptureResult<Box<dyn Backend>> {
        self.registry
            .create(domain)
            .ok_or_else(|| CaptureError::NotSupported(format!("no backend for {} capture", domain)))
    }

    fn backend_for_device(
        &self,
        domain: CaptureDomain,
        device_id: &str,
    ) -> CaptureResult<Box<dyn Backend>> {
        if device_id.is_empty() {
            return Err(CaptureError::InvalidArg("empty device id".to_string()));
        }
        let backend = self.backend(domain)?;
        if !backend.enumerate()?.iter().any(|d| d.id == device_id) {
            return Err(CaptureError::DeviceNotFound(device_id.to_string()));
        }
        Ok(backend)
    }

    /// Devices currently available in `domain`
    pub fn enumerate_devices(&self, domain: CaptureDomain) -> CaptureResult<Vec<DeviceInfo>> {
        let devices = self.backend(domain)?.enumerate()?;
        debug!(domain = %domain, count = devices.len(), "Enumerated devices");
        Ok(devices)
    }

    /// Formats `device_id` supports, most preferred first
    pub fn get_supported_formats(
        &self,
        domain: CaptureDomain,
        device_id: &str,
    ) -> CaptureResult<Vec<Format>> {
        let formats = self
            .backend_for_device(domain, device_id)?
            .probe_formats(device_id)?;
        debug!(domain = %domain, device = %device_id, count = formats.len(), "Probed formats");
        Ok(formats)
    }

    /// Format the backend would pick for `device_id` without a preference
    pub fn get_default_format(&self, domain: CaptureDomain, device_id: &str) -> CaptureResult<Format> {
        Ok(self
            .backend_for_device(domain, device_id)?
            .default_format(device_id)?)
    }

    /// Create a context in the `Created` state with its own backend instance
    pub fn create_context(&self, domain: CaptureDomain) -> CaptureResult<CaptureContext> {
        let backend = self.backend(domain)?;
        Ok(CaptureContext::new(backend, self.settings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::synthetic::SyntheticConfig;
    use crate::capture::ContextState;

    fn engine() -> CaptureEngine {
        CaptureEngine::new(BackendRegistry::synthetic(SyntheticConfig::default()))
    }

    #[test]
    fn test_unregistered_domain() {
        let engine = CaptureEngine::new(BackendRegistry::new());
        assert!(matches!(
            engine.enumerate_devices(CaptureDomain::Screen),
            Err(CaptureError::NotSupported(_))
        ));
        assert!(matches!(
            engine.create_context(CaptureDomain::Screen),
            Err(CaptureError::NotSupported(_))
        ));
    }

    #[test]
    fn test_default_format_is_first_supported() {
        let engine = engine();
        for domain in CaptureDomain::ALL {
            let device = engine.enumerate_devices(domain).unwrap().remove(0);
            let formats = engine.get_supported_formats(domain, &device.id).unwrap();
            let default = engine.get_default_format(domain, &device.id).unwrap();
            assert_eq!(default, formats[0]);
        }
    }

    #[test]
    fn test_unknown_device() {
        let engine = engine();
        assert_eq!(
            engine.get_supported_formats(CaptureDomain::Camera, "nope"),
            Err(CaptureError::DeviceNotFound("nope".to_string()))
        );
        assert!(matches!(
            engine.get_default_format(CaptureDomain::Camera, ""),
            Err(CaptureError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_lists_are_fresh_copies() {
        let engine = engine();
        let mut first = engine.enumerate_devices(CaptureDomain::Camera).unwrap();
        first.clear();
        assert!(!engine.enumerate_devices(CaptureDomain::Camera).unwrap().is_empty());
    }

    #[test]
    fn test_contexts_are_independent() {
        let engine = engine();
        let mut camera = engine.create_context(CaptureDomain::Camera).unwrap();
        let mut screen = engine.create_context(CaptureDomain::Screen).unwrap();
        assert_ne!(camera.id(), screen.id());

        let format = engine
            .get_default_format(CaptureDomain::Camera, "synthetic-camera-0")
            .unwrap();
        camera.configure("synthetic-camera-0", &format).unwrap();
        assert_eq!(camera.state(), ContextState::Configured);
        assert_eq!(screen.state(), ContextState::Created);
        screen.destroy().unwrap();
        assert_eq!(camera.state(), ContextState::Configured);
    }
}
