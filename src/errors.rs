// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture engine
//!
//! Every public operation returns a [`CaptureResult`]. Backend failures are
//! described by [`BackendError`](crate::backends::BackendError) and mapped to
//! a [`CaptureError`] at the context and engine boundary, so nothing below the
//! public surface ever escapes as a panic.

use crate::backends::BackendError;
use crate::capture::ContextState;
use std::fmt;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Public error taxonomy of the capture engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Malformed input (zero-sized format, wrong format kind for the domain, ...)
    InvalidArg(String),
    /// The requested device id is not known to the backend
    DeviceNotFound(String),
    /// No backend for this domain, or the content type is unsupported
    NotSupported(String),
    /// The call is illegal for the current context state
    InvalidState {
        operation: &'static str,
        state: ContextState,
    },
    /// `start_capture` was called while already capturing
    AlreadyCapturing,
    /// `start_capture` was called before a successful `configure`
    NotConfigured,
    /// The platform device query failed
    DeviceEnumeration(String),
    /// Opaque lower-layer failure with the platform error code attached
    BackendFailure { code: i32, message: String },
    /// Backend open/start exceeded the internal deadline
    Timeout(String),
}

impl CaptureError {
    /// Stable numeric code for binding layers (0 is reserved for success)
    pub fn code(&self) -> i32 {
        match self {
            CaptureError::InvalidArg(_) => -1,
            CaptureError::DeviceNotFound(_) => -2,
            CaptureError::NotSupported(_) => -3,
            CaptureError::InvalidState { .. } => -4,
            CaptureError::AlreadyCapturing => -5,
            CaptureError::NotConfigured => -6,
            CaptureError::DeviceEnumeration(_) => -7,
            CaptureError::BackendFailure { .. } => -8,
            CaptureError::Timeout(_) => -9,
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: ContextState) -> Self {
        CaptureError::InvalidState { operation, state }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InvalidArg(msg) => write!(f, "Invalid argument: {}", msg),
            CaptureError::DeviceNotFound(id) => write!(f, "Device not found: {}", id),
            CaptureError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            CaptureError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while context is {}", operation, state)
            }
            CaptureError::AlreadyCapturing => write!(f, "Capture already in progress"),
            CaptureError::NotConfigured => write!(f, "Context is not configured"),
            CaptureError::DeviceEnumeration(msg) => {
                write!(f, "Device enumeration failed: {}", msg)
            }
            CaptureError::BackendFailure { code, message } => {
                write!(f, "Backend failure (code {}): {}", code, message)
            }
            CaptureError::Timeout(msg) => write!(f, "Timed out: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

// Boundary mapping from backend errors
impl From<BackendError> for CaptureError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DeviceNotFound(id) => CaptureError::DeviceNotFound(id),
            BackendError::EnumerationFailed(msg) => CaptureError::DeviceEnumeration(msg),
            BackendError::FormatNotSupported(msg) => CaptureError::NotSupported(msg),
            BackendError::Platform { code, message } => {
                CaptureError::BackendFailure { code, message }
            }
            BackendError::Timeout(msg) => CaptureError::Timeout(msg),
            BackendError::InvalidHandle(handle) => CaptureError::BackendFailure {
                code: -1,
                message: format!("Invalid stream handle {}", handle),
            },
            BackendError::Other(message) => CaptureError::BackendFailure { code: -1, message },
        }
    }
}
