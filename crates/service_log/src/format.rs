//! Rendering of [`LogRecord`]s into output lines.

mod colorized;
mod structured;

use std::{fmt, str::FromStr};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{ConfigurationError, LogRecord};

/// Output format of a [`Logger`][crate::Logger], fixed at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordFormat {
    /// One compact JSON object per line, suitable for log aggregation.
    ///
    /// Keys: `timestamp`, `level`, `service`, `message`, `trace_id` and `span_id` (only while a
    /// trace is active), followed by the record's fields.
    #[default]
    Structured,

    /// `[timestamp] LEVEL service: message {key=value, ...}`, coloured by level on terminals.
    Colorized,
}

impl RecordFormat {
    /// Renders `record` as a single newline-terminated line.
    ///
    /// `ansi` enables colour codes; it only affects [`RecordFormat::Colorized`]. Rendering is
    /// pure: the same record always produces the same bytes.
    pub fn render(self, record: &LogRecord, ansi: bool) -> Vec<u8> {
        match self {
            Self::Structured => structured::render(record),
            Self::Colorized => colorized::render(record, ansi).into_bytes(),
        }
    }

    pub(crate) fn supports_ansi(self) -> bool {
        matches!(self, Self::Colorized)
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured => f.write_str("structured"),
            Self::Colorized => f.write_str("colorized"),
        }
    }
}

impl FromStr for RecordFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" | "json" => Ok(Self::Structured),
            "colorized" | "colored" | "text" | "console" => Ok(Self::Colorized),
            _ => Err(ConfigurationError::InvalidFormat(s.to_string())),
        }
    }
}

fn rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}

/// Replaces line breaks so that a record never spans several lines.
fn escape_line_breaks(text: &str) -> std::borrow::Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        text.replace('\n', "\\n").replace('\r', "\\r").into()
    } else {
        text.into()
    }
}
