// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use std::time::Duration;

/// Buffer pool sizing
pub mod pool {
    /// Default number of backend pool slots per open stream
    ///
    /// Small on purpose: each slot is one frame of latency a slow consumer
    /// can build up before the backend starts dropping frames.
    pub const DEFAULT_BACKEND_SLOTS: usize = 4;

    /// Default number of slots in the dispatcher's copy-on-wrap pool
    pub const DEFAULT_COPY_SLOTS: usize = 3;

    /// Upper bound accepted from configuration
    pub const MAX_SLOTS: usize = 64;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Default deadline for backend open/start
    pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 3_000;

    /// Emit a warning if stop has been waiting for quiescence this long
    pub const DEFAULT_STOP_WARN_MS: u64 = 1_000;

    /// Interval at which a waiting stop re-checks the in-flight count
    pub const QUIESCENCE_POLL: Duration = Duration::from_millis(100);

    /// Minimum interval between two "frame dropped" warnings of one stream
    pub const DROP_WARN_INTERVAL: Duration = Duration::from_secs(1);

    /// Frame counter modulo for periodic debug logging
    pub const FRAME_LOG_INTERVAL: u64 = 300;
}

/// Audio constants
pub mod audio {
    /// Period of one audio buffer produced by the synthetic backend
    pub const PERIOD_MS: u32 = 10;

    /// Frequency of the synthetic test tone
    pub const TONE_HZ: f32 = 440.0;

    /// Amplitude of the synthetic test tone (full scale = 1.0)
    pub const TONE_AMPLITUDE: f32 = 0.25;
}

/// Synchronizer constants
pub mod sync {
    /// Default matching tolerance: half a frame period at 60 fps
    pub const DEFAULT_TOLERANCE_US: u64 = 8_333;
}

/// Application info constants
pub mod app_info {
    /// Directory name under the user config dir
    pub const CONFIG_DIR_NAME: &str = "media-capture";

    /// Config file name
    pub const CONFIG_FILE_NAME: &str = "config.json";

    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
