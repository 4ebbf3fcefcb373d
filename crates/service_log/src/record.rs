//! The [`LogRecord`] produced by every emit call and the caller-supplied [`Fields`] it carries.

use std::{error::Error, fmt, sync::Arc};

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{Level, TraceSpan, keys};

/// One logging event.
///
/// Records are built by the [`Logger`][crate::Logger] at the emit call, rendered and written
/// immediately, and then discarded. The fields are public so that records can be built by hand
/// and passed to [`RecordFormat::render`][crate::RecordFormat::render].
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    /// Wall-clock time of the emit call, in UTC.
    pub timestamp: OffsetDateTime,

    /// Severity of the record.
    pub level: Level,

    /// Name of the service that emitted the record.
    pub service: Arc<str>,

    /// Human readable message.
    pub message: String,

    /// Structured fields supplied by the caller (and the logger's static fields).
    pub fields: Fields,

    /// Identifiers of the trace active at the emit call, if any.
    pub trace: Option<TraceSpan>,
}

/// Structured key-value data attached to a log record.
///
/// Values are converted to JSON when they are inserted. A value that cannot be represented as
/// JSON (for example a map with non-string keys) is stored as its [`Debug`](fmt::Debug) text
/// instead, so the record is still emitted.
///
/// ```
/// use service_log::Fields;
///
/// let fields = Fields::new().with("order_id", 42).with("status", "created");
/// assert_eq!(fields.get("order_id"), Some(&serde_json::json!(42)));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields {
    values: Map<String, Value>,
    fallbacks: usize,
}

impl Fields {
    /// Creates an empty set of fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, returning `self` for chaining.
    #[must_use]
    pub fn with<V>(mut self, key: impl Into<String>, value: V) -> Self
    where
        V: Serialize + fmt::Debug,
    {
        self.insert(key, value);
        self
    }

    /// Adds a field, replacing any previous value under the same key.
    pub fn insert<V>(&mut self, key: impl Into<String>, value: V)
    where
        V: Serialize + fmt::Debug,
    {
        let value = match serde_json::to_value(&value) {
            Ok(value) => value,
            Err(_) => {
                self.fallbacks = self.fallbacks.saturating_add(1);
                Value::String(format!("{value:?}"))
            }
        };
        self.values.insert(key.into(), value);
    }

    /// Adds `error` under the `err` key, returning `self` for chaining.
    ///
    /// The value is the error's message followed by the messages of its sources, separated by
    /// `": "`.
    ///
    /// ```
    /// use service_log::Fields;
    ///
    /// let error = std::io::Error::other("connection reset");
    /// let fields = Fields::new().with_error(&error);
    /// assert_eq!(fields.get("err"), Some(&serde_json::json!("connection reset")));
    /// ```
    #[must_use]
    pub fn with_error<E>(mut self, error: &E) -> Self
    where
        E: Error + ?Sized,
    {
        self.insert_error(error);
        self
    }

    /// Adds `error` under the `err` key. See [`Fields::with_error`].
    pub fn insert_error<E>(&mut self, error: &E)
    where
        E: Error + ?Sized,
    {
        let mut chain = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        self.values.insert(keys::ERROR.to_string(), Value::String(chain));
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns `true` if a field named `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of values that had to be replaced by their textual form.
    pub(crate) fn serialization_fallbacks(&self) -> usize {
        self.fallbacks
    }

    pub(crate) fn insert_value(&mut self, key: String, value: Value) {
        self.values.insert(key, value);
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            fallbacks: 0,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect::<Map<String, Value>>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn values_are_converted_to_json() {
        let fields = Fields::new()
            .with("count", 3_u8)
            .with("tags", vec!["a", "b"])
            .with("nested", json!({ "ok": true }));

        assert_eq!(fields.get("count"), Some(&json!(3)));
        assert_eq!(fields.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(fields.get("nested"), Some(&json!({ "ok": true })));
        assert_eq!(fields.serialization_fallbacks(), 0);
    }

    #[test]
    fn unserializable_values_fall_back_to_debug_text() {
        let tuple_keyed = HashMap::from([((1, 2), "cell")]);
        let fields = Fields::new().with("grid", tuple_keyed).with("ok", 1);

        assert_eq!(
            fields.get("grid"),
            Some(&Value::String(r#"{(1, 2): "cell"}"#.to_string()))
        );
        assert_eq!(fields.get("ok"), Some(&json!(1)));
        assert_eq!(fields.serialization_fallbacks(), 1);
    }

    #[test]
    fn later_inserts_replace_earlier_values() {
        let mut fields = Fields::new().with("attempt", 1);
        fields.insert("attempt", 2);

        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("attempt"), Some(&json!(2)));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("payment declined")]
    struct Declined(#[source] std::io::Error);

    #[test]
    fn errors_are_stored_with_their_sources() {
        let error = Declined(std::io::Error::other("card expired"));
        let fields = Fields::new().with("order_id", 42).with_error(&error);

        assert_eq!(
            fields.get("err"),
            Some(&json!("payment declined: card expired"))
        );

        let boxed: Box<dyn Error + Send + Sync> = Box::new(error);
        let mut fields = Fields::new();
        fields.insert_error(boxed.as_ref());
        assert_eq!(
            fields.get("err"),
            Some(&json!("payment declined: card expired"))
        );
    }

    #[test]
    fn collect_from_pairs() {
        let fields: Fields = [("a", json!(1)), ("b", json!("two"))].into_iter().collect();

        let keys: Vec<_> = fields.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["a", "b"]);
    }
}
