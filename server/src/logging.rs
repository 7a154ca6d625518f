//! Structured logging setup
//!
//! A single global subscriber is installed on first use. The level sits
//! behind a reload layer so that each server start can apply its own level
//! without reinstalling the subscriber.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::error::SonarError;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Verbosity of the server log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Level for a C ABI code: 0 debug, 1 info, 2 warn, 3 error, anything
    /// else info
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Debug,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Info,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warn => 2,
            Self::Error => 3,
        }
    }

    /// Lenient parse used for environment values: unknown names are info
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::new(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = SonarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(SonarError::Config(format!("Invalid log level '{}'", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = SonarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(SonarError::Config(format!("Invalid log format '{}'", other))),
        }
    }
}

/// Install the global subscriber, or only change the level when one is
/// already installed by an earlier call.
pub fn init(level: LogLevel, format: LogFormat) {
    if FILTER_HANDLE.get().is_some() {
        set_level(level);
        return;
    }

    let (filter, handle) = reload::Layer::new(level.filter());
    let text = (format == LogFormat::Text).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_line_number(true)
            .with_ansi(true)
    });
    let json = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .with_current_span(false)
    });

    // another subscriber may already own the process (tests, embedding apps)
    if tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Change the level of the installed subscriber, installing a text one
/// when none exists yet
pub fn set_level(level: LogLevel) {
    match FILTER_HANDLE.get() {
        Some(handle) => {
            if let Err(e) = handle.reload(level.filter()) {
                eprintln!("failed to change log level: {}", e);
            }
        }
        None => init(level, LogFormat::Text),
    }
}

/// Logs how long a named operation took when dropped
#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    started: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        debug!("⏱️ {} started", name);
        Self {
            name,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("⏱️ {} took {:?}", self.name, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_codes() {
        assert_eq!(LogLevel::from_code(0), LogLevel::Debug);
        assert_eq!(LogLevel::from_code(1), LogLevel::Info);
        assert_eq!(LogLevel::from_code(2), LogLevel::Warn);
        assert_eq!(LogLevel::from_code(3), LogLevel::Error);
        assert_eq!(LogLevel::from_code(-7), LogLevel::Info);
        assert_eq!(LogLevel::from_code(42), LogLevel::Info);
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            assert_eq!(LogLevel::from_code(level.code()), level);
        }
    }

    #[test]
    fn test_level_names() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::from_name("verbose"), LogLevel::Info);
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_log_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_twice_only_changes_level() {
        init(LogLevel::Warn, LogFormat::Text);
        init(LogLevel::Debug, LogFormat::Json);
        set_level(LogLevel::Info);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("unit");
        assert!(timer.elapsed() < std::time::Duration::from_secs(5));
    }
}
