// SPDX-License-Identifier: GPL-3.0-only

//! Capture context lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`CaptureContext`](super::CaptureContext)
///
/// ```text
/// Created ─configure─▶ Configured ─start─▶ Capturing ─stop─▶ Stopped
///    │                   ▲    │                                │  │
///    │                   └────┘ configure          configure ──┘  │ start
///    └──────────────── destroy (from any state) ───▶ Destroyed ◀──┘
/// ```
///
/// `Configuring` is only observable while a `configure` call is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Created,
    Configuring,
    Configured,
    Capturing,
    Stopped,
    Destroyed,
}

impl ContextState {
    /// States from which `configure` is accepted
    pub fn can_configure(&self) -> bool {
        matches!(
            self,
            ContextState::Created | ContextState::Configured | ContextState::Stopped
        )
    }

    /// States from which `start_capture` is accepted
    pub fn can_start(&self) -> bool {
        matches!(self, ContextState::Configured | ContextState::Stopped)
    }

    pub fn is_destroyed(&self) -> bool {
        *self == ContextState::Destroyed
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextState::Created => "created",
            ContextState::Configuring => "configuring",
            ContextState::Configured => "configured",
            ContextState::Capturing => "capturing",
            ContextState::Stopped => "stopped",
            ContextState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}
