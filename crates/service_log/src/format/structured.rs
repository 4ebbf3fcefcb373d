//! JSON-lines rendering.

use serde::ser::{SerializeMap, Serializer};
use serde_json::{Map, Value, ser::CompactFormatter};

use crate::{LogRecord, keys};

pub(super) fn render(record: &LogRecord) -> Vec<u8> {
    let mut buffer = serialize(record).unwrap_or_else(|error| fallback(record, &error));
    buffer.push(b'\n');
    buffer
}

/// Serializes the reserved keys first, then every non-reserved field at the top level.
fn serialize(record: &LogRecord) -> Result<Vec<u8>, serde_json::Error> {
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, CompactFormatter);
    let mut map_serializer = serializer.serialize_map(None)?;

    map_serializer.serialize_entry(keys::TIMESTAMP, &super::rfc3339(record.timestamp))?;
    map_serializer.serialize_entry(keys::LEVEL, record.level.as_str())?;
    map_serializer.serialize_entry(keys::SERVICE, &*record.service)?;
    map_serializer.serialize_entry(keys::MESSAGE, &record.message)?;

    if let Some(trace) = &record.trace {
        map_serializer.serialize_entry(keys::TRACE_ID, trace.trace_id())?;
        map_serializer.serialize_entry(keys::SPAN_ID, trace.span_id())?;
    }

    for (key, value) in record
        .fields
        .iter()
        .filter(|(key, _)| !keys::is_reserved(key))
    {
        map_serializer.serialize_entry(key, value)?;
    }

    map_serializer.end()?;
    Ok(buffer)
}

/// A minimal record used if the full one cannot be serialized.
fn fallback(record: &LogRecord, error: &serde_json::Error) -> Vec<u8> {
    let object: Map<String, Value> = [
        (keys::TIMESTAMP, Value::from(super::rfc3339(record.timestamp))),
        (keys::LEVEL, Value::from(record.level.as_str())),
        (keys::SERVICE, Value::from(&*record.service)),
        (keys::MESSAGE, Value::from(record.message.as_str())),
        ("serialization_error", Value::from(error.to_string())),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();

    Value::Object(object).to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::{Fields, Level, TraceSpan};

    fn record(fields: Fields, trace: Option<TraceSpan>) -> LogRecord {
        LogRecord {
            timestamp: datetime!(2025-01-08 10:30:45.123456 UTC),
            level: Level::Info,
            service: Arc::from("api_gateway"),
            message: "Request received".to_string(),
            fields,
            trace,
        }
    }

    fn parse(line: &[u8]) -> Map<String, Value> {
        let text = std::str::from_utf8(line).expect("utf-8 output");
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1, "record spans several lines: {text}");
        serde_json::from_str(text).expect("valid json")
    }

    #[test]
    fn reserved_keys_come_first_in_fixed_order() {
        let line = render(&record(Fields::new(), Some(TraceSpan::new("T1", "S1"))));

        assert_eq!(
            String::from_utf8(line).expect("utf-8 output"),
            concat!(
                r#"{"timestamp":"2025-01-08T10:30:45.123456Z","level":"INFO","#,
                r#""service":"api_gateway","message":"Request received","#,
                r#""trace_id":"T1","span_id":"S1"}"#,
                "\n"
            )
        );
    }

    #[test]
    fn round_trip_contains_reserved_fields_and_extras() {
        let fields = Fields::new()
            .with("k", 1)
            .with("user", json!({ "id": 7, "roles": ["admin"] }));
        let parsed = parse(&render(&record(fields, None)));

        let expected = json!({
            "timestamp": "2025-01-08T10:30:45.123456Z",
            "level": "INFO",
            "service": "api_gateway",
            "message": "Request received",
            "k": 1,
            "user": { "id": 7, "roles": ["admin"] },
        });
        assert_eq!(Value::Object(parsed), expected);
    }

    #[test]
    fn trace_keys_are_omitted_without_a_trace() {
        let parsed = parse(&render(&record(Fields::new(), None)));

        assert!(!parsed.contains_key("trace_id"));
        assert!(!parsed.contains_key("span_id"));
    }

    #[test]
    fn reserved_keys_win_over_caller_fields() {
        let fields = Fields::new()
            .with("level", "DEBUG")
            .with("message", "spoofed")
            .with("trace_id", "forged")
            .with("extra", true);
        let line = render(&record(fields, Some(TraceSpan::new("T1", "S1"))));
        let text = String::from_utf8(line.clone()).expect("utf-8 output");
        let parsed = parse(&line);

        assert_eq!(parsed.get("level"), Some(&json!("INFO")));
        assert_eq!(parsed.get("message"), Some(&json!("Request received")));
        assert_eq!(parsed.get("trace_id"), Some(&json!("T1")));
        assert_eq!(parsed.get("extra"), Some(&json!(true)));
        assert_eq!(text.matches("\"level\"").count(), 1);
        assert_eq!(text.matches("\"trace_id\"").count(), 1);
    }

    #[test]
    fn multi_line_messages_stay_on_one_line() {
        let mut record = record(Fields::new(), None);
        record.message = "first\nsecond".to_string();

        let parsed = parse(&render(&record));
        assert_eq!(parsed.get("message"), Some(&json!("first\nsecond")));
    }

    #[test]
    fn rendering_is_deterministic() {
        let record = record(
            Fields::new().with("a", 1).with("b", "two"),
            Some(TraceSpan::new("T1", "S1")),
        );

        assert_eq!(render(&record), render(&record));
    }
}
