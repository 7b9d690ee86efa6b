// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide logging service
//!
//! The engine logs through `tracing`. This module owns the one global
//! subscriber of the process:
//!
//! ```text
//! Registry
//!   ├─ reload::Layer<EnvFilter>   ← set_log_level
//!   ├─ fmt::Layer (stderr)        ← muted while a callback is installed
//!   └─ CallbackLayer              ← set_log_callback
//! ```
//!
//! Lifecycle: the service starts on [`init`] or on the first
//! [`set_log_level`] / [`set_log_callback`] call. [`shutdown`] mutes it and
//! drops the callback; after that only an explicit [`init`] brings it back.
//! The `RUST_LOG` environment variable, when set, overrides the initial level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{EnvFilter, filter_fn};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt as fmt_layer, reload};

/// Level used when neither configuration nor `RUST_LOG` says otherwise
pub const DEFAULT_LEVEL: LogLevel = LogLevel::Warn;

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warn,
            Level::INFO => LogLevel::Info,
            Level::DEBUG => LogLevel::Debug,
            Level::TRACE => LogLevel::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(LoggingError::InvalidLevel(other.to_string())),
        }
    }
}

/// One log event as handed to a log callback
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    /// Structured fields other than the message, in emission order
    pub fields: Vec<(String, String)>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Receiver of log records
///
/// Called synchronously on the thread that logged, including capture
/// producer threads. Must not block.
pub type LogCallback = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Errors of the logging service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    /// The service was shut down; call `init` first
    ShutDown,
    /// Level string could not be parsed
    InvalidLevel(String),
    /// Another global `tracing` subscriber is already installed
    SubscriberConflict(String),
    /// Filter reload failed
    Reload(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingError::ShutDown => write!(f, "Logging service was shut down"),
            LoggingError::InvalidLevel(level) => write!(f, "Invalid log level: {}", level),
            LoggingError::SubscriberConflict(msg) => {
                write!(f, "Another log subscriber is installed: {}", msg)
            }
            LoggingError::Reload(msg) => write!(f, "Failed to change log level: {}", msg),
        }
    }
}

impl std::error::Error for LoggingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Active,
    ShutDown,
}

struct Service {
    phase: Phase,
    reload: Option<reload::Handle<EnvFilter, Registry>>,
}

static SERVICE: Mutex<Service> = Mutex::new(Service {
    phase: Phase::Uninitialized,
    reload: None,
});

/// Checked on every event without taking the service lock
static ENABLED: AtomicBool = AtomicBool::new(false);
static CALLBACK: OnceLock<RwLock<Option<LogCallback>>> = OnceLock::new();

fn callback_slot() -> &'static RwLock<Option<LogCallback>> {
    CALLBACK.get_or_init(|| RwLock::new(None))
}

fn current_callback() -> Option<LogCallback> {
    callback_slot()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn replace_callback(callback: Option<LogCallback>) {
    *callback_slot()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = callback;
}

fn lock_service() -> std::sync::MutexGuard<'static, Service> {
    crate::util::lock(&SERVICE)
}

/// Collects event fields into a [`LogRecord`]
#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push((field.name().to_string(), format!("{:?}", value)));
        }
    }
}

/// Forwards events to the installed callback
struct CallbackLayer;

impl<S: Subscriber> Layer<S> for CallbackLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Some(callback) = current_callback() else {
            return;
        };

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        callback(&LogRecord {
            level: LogLevel::from(*metadata.level()),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
            timestamp: Utc::now(),
        });
    }
}

fn stderr_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed) && current_callback().is_none()
}

fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidLevel(format!("{}: {}", level, e)))
}

fn install(service: &mut Service, level: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(level)?,
    };
    let (filter_layer, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt_layer::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_filter(filter_fn(|_| stderr_enabled())),
        )
        .with(CallbackLayer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberConflict(e.to_string()))?;

    service.reload = Some(handle);
    Ok(())
}

/// Start the logging service with `level` (a level name or filter directive)
///
/// Idempotent while active. After [`shutdown`] this is the only way back.
pub fn init(level: &str) -> Result<(), LoggingError> {
    let mut service = lock_service();
    match service.phase {
        Phase::Active => return Ok(()),
        Phase::Uninitialized => install(&mut service, level)?,
        Phase::ShutDown => {
            if let Some(handle) = &service.reload {
                handle
                    .reload(build_filter(level)?)
                    .map_err(|e| LoggingError::Reload(e.to_string()))?;
            }
        }
    }
    service.phase = Phase::Active;
    ENABLED.store(true, Ordering::SeqCst);
    Ok(())
}

/// Make sure the service is running, starting it on first use
fn ensure_active() -> Result<(), LoggingError> {
    let phase = lock_service().phase;
    match phase {
        Phase::Active => Ok(()),
        Phase::ShutDown => Err(LoggingError::ShutDown),
        Phase::Uninitialized => init(DEFAULT_LEVEL.as_str()),
    }
}

/// Change the level filter (`"debug"`, `"media_capture=trace,warn"`, ...)
pub fn set_log_level(level: &str) -> Result<(), LoggingError> {
    ensure_active()?;
    let filter = build_filter(level)?;
    let service = lock_service();
    if let Some(handle) = &service.reload {
        handle
            .reload(filter)
            .map_err(|e| LoggingError::Reload(e.to_string()))?;
    }
    Ok(())
}

/// Route log records to `callback` instead of stderr, or back with `None`
pub fn set_log_callback(callback: Option<LogCallback>) -> Result<(), LoggingError> {
    ensure_active()?;
    replace_callback(callback);
    Ok(())
}

/// Mute the service and drop the callback
pub fn shutdown() {
    let mut service = lock_service();
    if service.phase == Phase::Active {
        service.phase = Phase::ShutDown;
    }
    ENABLED.store(false, Ordering::SeqCst);
    drop(service);
    replace_callback(None);
}

/// Whether the service is currently running
pub fn is_active() -> bool {
    lock_service().phase == Phase::Active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("off".parse::<LogLevel>(), Ok(LogLevel::Off));
        assert!(matches!(
            "loud".parse::<LogLevel>(),
            Err(LoggingError::InvalidLevel(_))
        ));
        assert!(LogLevel::Error < LogLevel::Trace);
    }

    #[test]
    fn test_visitor_splits_message_and_fields() {
        let mut visitor = RecordVisitor::default();
        visitor.message = "hello".into();
        visitor.fields.push(("frames".into(), "3".into()));
        let record = LogRecord {
            level: LogLevel::Info,
            target: "test".into(),
            message: visitor.message,
            fields: visitor.fields,
            timestamp: Utc::now(),
        };
        assert_eq!(record.field("frames"), Some("3"));
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn test_bad_directive_is_rejected() {
        assert!(matches!(
            build_filter("media_capture=[[["),
            Err(LoggingError::InvalidLevel(_))
        ));
    }
}
