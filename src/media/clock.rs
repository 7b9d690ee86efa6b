// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide capture clock
//!
//! Every buffer timestamp is a monotonic microsecond count since the first
//! time the clock was read in this process. All contexts share the same
//! origin, which is what lets buffers from different domains be correlated.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static ORIGIN: OnceLock<Instant> = OnceLock::new();

fn origin() -> Instant {
    *ORIGIN.get_or_init(Instant::now)
}

/// Current capture time in microseconds
pub fn now_us() -> u64 {
    instant_to_us(Instant::now())
}

/// Convert an `Instant` to capture time
///
/// Instants taken before the clock origin map to 0.
pub fn instant_to_us(instant: Instant) -> u64 {
    let elapsed = instant.saturating_duration_since(origin());
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Convert capture time back to an `Instant`
pub fn us_to_instant(timestamp_us: u64) -> Instant {
    origin() + Duration::from_micros(timestamp_us)
}
