//! Human-readable, optionally coloured rendering.

use std::fmt::Write;

use nu_ansi_term::Color;
use serde_json::Value;
use time::{OffsetDateTime, macros::format_description};

use super::escape_line_breaks;
use crate::{LogRecord, keys};

pub(super) fn render(record: &LogRecord, ansi: bool) -> String {
    let timestamp = format!("[{}]", human_timestamp(record.timestamp));
    let service = escape_line_breaks(&record.service);
    let message = escape_line_breaks(&record.message);
    let fields = fields_text(record);

    let mut line = String::new();
    // Writing into a `String` cannot fail.
    let _ = if ansi {
        write!(
            line,
            "{} {} {}: {}",
            Color::Cyan.paint(timestamp),
            record.level.style().paint(record.level.as_str()),
            Color::Purple.paint(&*service),
            message,
        )
    } else {
        write!(
            line,
            "{timestamp} {} {service}: {message}",
            record.level
        )
    };

    if !fields.is_empty() {
        let fields = format!("{{{fields}}}");
        let _ = if ansi {
            write!(line, " {}", Color::White.dimmed().paint(fields))
        } else {
            write!(line, " {fields}")
        };
    }

    line.push('\n');
    line
}

fn human_timestamp(timestamp: OffsetDateTime) -> String {
    let format = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6] [offset_hour sign:mandatory]:[offset_minute]"
    );
    timestamp
        .format(format)
        .unwrap_or_else(|_| super::rfc3339(timestamp))
}

/// `trace_id=…, span_id=…, key=value, …` with the trace identifiers first.
fn fields_text(record: &LogRecord) -> String {
    let mut entries = Vec::with_capacity(record.fields.len().saturating_add(2));

    if let Some(trace) = &record.trace {
        entries.push(format!(
            "{}={}",
            keys::TRACE_ID,
            escape_line_breaks(trace.trace_id())
        ));
        entries.push(format!(
            "{}={}",
            keys::SPAN_ID,
            escape_line_breaks(trace.span_id())
        ));
    }

    entries.extend(
        record
            .fields
            .iter()
            .filter(|(key, _)| !keys::is_reserved(key))
            .map(|(key, value)| {
                let key = escape_line_breaks(key);
                match value {
                    Value::String(text) => format!("{key}={}", escape_line_breaks(text)),
                    other => format!("{key}={other}"),
                }
            }),
    );

    entries.join(", ")
}
