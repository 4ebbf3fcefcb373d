//! Severity levels understood by [`Logger`][crate::Logger].

use std::{fmt, str::FromStr};

use nu_ansi_term::{Color, Style};

use crate::ConfigurationError;

/// Severity of a log record, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Diagnostic detail, usually disabled in production.
    Debug,

    /// Normal operational messages.
    Info,

    /// Something unexpected that the service recovered from.
    Warning,

    /// An operation failed.
    Error,

    /// The service cannot continue serving correctly.
    Critical,
}

impl Level {
    /// All levels, from least to most severe.
    pub const ALL: [Self; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    /// The upper-case name written into log records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    pub(crate) fn style(self) -> Style {
        match self {
            Self::Debug => Color::Cyan.normal(),
            Self::Info => Color::Green.normal(),
            Self::Warning => Color::Yellow.normal(),
            Self::Error => Color::Red.normal(),
            Self::Critical => Color::Red.on(Color::White),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" | "fatal" => Ok(Self::Critical),
            _ => Err(ConfigurationError::InvalidLevel(s.to_string())),
        }
    }
}
