// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use media_capture::constants::{app_info, pool, sync, timing};

#[test]
fn test_pool_defaults_within_bounds() {
    assert!(pool::DEFAULT_BACKEND_SLOTS >= 1);
    assert!(pool::DEFAULT_COPY_SLOTS >= 1);
    assert!(pool::DEFAULT_BACKEND_SLOTS <= pool::MAX_SLOTS);
    assert!(pool::DEFAULT_COPY_SLOTS <= pool::MAX_SLOTS);
}

#[test]
fn test_stop_warning_fires_before_open_timeout() {
    assert!(timing::DEFAULT_STOP_WARN_MS < timing::DEFAULT_OPEN_TIMEOUT_MS);
    assert!(timing::QUIESCENCE_POLL.as_millis() < timing::DEFAULT_STOP_WARN_MS as u128);
}

#[test]
fn test_default_tolerance_is_half_a_60fps_frame() {
    assert_eq!(sync::DEFAULT_TOLERANCE_US, 1_000_000 / 60 / 2);
}

#[test]
fn test_version_is_not_empty() {
    assert!(!app_info::version().is_empty());
}
