// SPDX-License-Identifier: MPL-2.0

//! Capture contexts and buffer delivery
//!
//! # Modules
//!
//! - [`engine`]: Device discovery and context creation
//! - [`context`]: Per-domain capture state machine
//! - [`state`]: Context lifecycle states
//! - [`dispatcher`]: Backend frame → consumer buffer delivery
//! - [`sync`]: Timestamp correlation across contexts
//! - [`channel`]: Copy-out adapter for async consumers

pub mod channel;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod state;
pub mod sync;

pub use channel::{ChannelStats, copy_channel};
pub use context::{CaptureContext, ContextSettings};
pub use dispatcher::{BufferCallback, DispatchStats};
pub use engine::CaptureEngine;
pub use state::ContextState;
pub use sync::{SyncOutcome, SyncStats, Synchronizer, Timestamped, half_frame_period_us, is_matched};
